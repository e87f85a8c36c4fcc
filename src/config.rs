use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;

use crate::view::SortOrder;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinSchema {
    Rankings,
    DashboardSummary,
    LanguageTrends,
    KeywordTrends,
    Projects,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum Field {
    Integer,
    Float,
    String {
        #[serde(default)]
        unknown_if_empty: bool,
    },
    Enum {
        values: Vec<String>,
    },
    Date,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SchemaSource {
    Builtin(BuiltinSchema),
    Inline {
        fields: IndexMap<String, Field>,
        #[serde(default)]
        passthrough: bool,
    },
}

#[derive(Deserialize, Debug, Clone)]
pub struct SortConfig {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

/// A derived column filled from a lookup table over another column.
#[derive(Deserialize, Debug, Clone)]
pub struct Category {
    pub field: String,
    #[serde(rename = "as")]
    pub name: String,
    #[serde(default)]
    pub map: IndexMap<String, String>,
    pub fallback: String,
}

fn default_page_size() -> usize {
    10
}

#[derive(Deserialize, Debug, Clone)]
pub struct Dataset {
    pub path: PathBuf,
    pub schema: SchemaSource,
    /// GroupKey column; enables collapsing to the latest row per key.
    pub key: Option<String>,
    /// Date column paired with `key`.
    pub date: Option<String>,
    /// Value column projected by forecasts.
    pub forecast: Option<String>,
    pub default_sort: Option<SortConfig>,
    pub category: Option<Category>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub datasets: IndexMap<String, Dataset>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    pub fn from_yaml(document: &str, base_dir: impl Into<PathBuf>) -> Result<Self, serde_yaml::Error> {
        let mut config: Config = serde_yaml::from_str(document)?;
        config.base_dir = base_dir.into();
        Ok(config)
    }

    /// Read a config file. Dataset paths are resolved against its directory.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let document = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Read {
                path: path.to_owned(),
                source,
            })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_yaml(&document, base_dir).map_err(|source| Error::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn dataset(&self, name: &str) -> Result<&Dataset, Error> {
        self.datasets
            .get(name)
            .ok_or_else(|| Error::UnknownDataset(name.to_owned()))
    }

    pub fn resolve(&self, dataset: &Dataset) -> PathBuf {
        if dataset.path.is_absolute() {
            dataset.path.clone()
        } else {
            self.base_dir.join(&dataset.path)
        }
    }
}
