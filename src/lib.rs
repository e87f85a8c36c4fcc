use std::path::PathBuf;

pub mod aggregate;
pub mod config;
pub mod dashboard;
pub mod forecast;
pub mod record;
pub mod reduce;
pub mod schema;
pub mod source;
pub mod view;
pub mod warning;

#[cfg(test)]
mod tests;

#[derive(Debug, thiserror::Error)]
#[error("{context}: {detail}")]
pub struct Error {
    pub context: Box<ErrorContext>,
    pub detail: Box<ErrorDetail>,
}

#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub dataset: String,
    pub path: Option<PathBuf>,
}

impl ErrorContext {
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            path: None,
        }
    }

    pub fn with_path(&self, path: impl Into<PathBuf>) -> Self {
        Self {
            dataset: self.dataset.clone(),
            path: Some(path.into()),
        }
    }

    pub fn error(&self, detail: ErrorDetail) -> Error {
        Error {
            context: Box::new(self.clone()),
            detail: Box::new(detail),
        }
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}({})", self.dataset, path.display()),
            None => f.write_str(&self.dataset),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorDetail {
    #[error("Failed to read CSV: {0}")]
    ReadCsv(std::io::Error),
    #[error("Failed to parse CSV: {0}")]
    ParseCsv(csv::Error),
    #[error("No records for `{key}`")]
    MissingEntity { key: String },
    #[error("No {0} configured for this dataset")]
    Unconfigured(&'static str),
    #[error("Forecast horizon must be positive")]
    ZeroHorizon,
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    View(#[from] view::Error),
}

impl Error {
    /// Load failures leave previously cached data in place.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            *self.detail,
            ErrorDetail::ReadCsv(_) | ErrorDetail::ParseCsv(_)
        )
    }

    pub fn is_missing_entity(&self) -> bool {
        matches!(*self.detail, ErrorDetail::MissingEntity { .. })
    }
}
