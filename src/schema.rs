//! Per-dataset field schemas.
//!
//! A [`FieldSchema`] fixes the shape of every typed record produced from a
//! CSV file. Builtin schemas cover the snapshot files the dashboards ship
//! with; custom schemas are compiled from configuration.

use indexmap::{IndexMap, IndexSet};

use crate::config;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Field `{field}` is not defined in the schema (referenced as {role})")]
    UnknownField { field: String, role: &'static str },
    #[error("Derived field `{0}` collides with a schema field")]
    Shadowed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Float,
    String { unknown_if_empty: bool },
    Enum { allowed: IndexSet<String> },
    Date,
}

impl FieldType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    fn enumeration<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        FieldType::Enum {
            allowed: values.into_iter().map(str::to_owned).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub(crate) fields: IndexMap<String, FieldType>,
    /// Keep columns that are not declared, verbatim as strings.
    pub(crate) passthrough: bool,
}

const TREND_DIRECTIONS: [&str; 3] = ["up", "down", "stable"];

impl FieldSchema {
    pub fn new(fields: impl IntoIterator<Item = (impl Into<String>, FieldType)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, ty)| (name.into(), ty))
                .collect(),
            passthrough: false,
        }
    }

    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.fields.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    pub fn get(&self, field: &str) -> Option<&FieldType> {
        self.fields.get(field)
    }

    pub fn passthrough(&self) -> bool {
        self.passthrough
    }

    /// Ensure a field referenced by a downstream stage is declared.
    pub fn require(&self, field: &str, role: &'static str) -> Result<&FieldType, Error> {
        self.fields.get(field).ok_or_else(|| Error::UnknownField {
            field: field.to_owned(),
            role,
        })
    }

    /// `influence_ranking.csv`
    pub fn rankings() -> Self {
        Self::new([
            ("ranking", FieldType::Integer),
            (
                "repo_name",
                FieldType::String {
                    unknown_if_empty: false,
                },
            ),
            (
                "language",
                FieldType::String {
                    unknown_if_empty: true,
                },
            ),
            ("influence_score", FieldType::Float),
            ("stars_score", FieldType::Float),
            ("activity_score", FieldType::Float),
            ("ranking_change", FieldType::Integer),
        ])
    }

    /// `dashboard_summary.csv`
    pub fn dashboard_summary() -> Self {
        Self::new([
            (
                "metric_name",
                FieldType::enumeration([
                    "total_projects",
                    "total_stars",
                    "avg_influence_score",
                    "main_language_count",
                ]),
            ),
            (
                "metric_value",
                FieldType::String {
                    unknown_if_empty: false,
                },
            ),
        ])
    }

    /// `language_trends_detailed.csv`
    pub fn language_trends() -> Self {
        Self::new([
            ("date", FieldType::Date),
            (
                "language",
                FieldType::String {
                    unknown_if_empty: true,
                },
            ),
            ("project_count", FieldType::Integer),
            ("avg_stars", FieldType::Float),
            ("avg_openrank", FieldType::Float),
            ("activity_score", FieldType::Float),
            ("popularity_index", FieldType::Float),
            ("trend_direction", FieldType::enumeration(TREND_DIRECTIONS)),
        ])
    }

    /// `keyword_trends.csv`
    pub fn keyword_trends() -> Self {
        Self::new([
            ("date", FieldType::Date),
            (
                "keyword_category",
                FieldType::String {
                    unknown_if_empty: true,
                },
            ),
            ("search_volume", FieldType::Integer),
            ("mention_count", FieldType::Integer),
            ("avg_stars_per_mention", FieldType::Float),
            ("influence_score", FieldType::Float),
            ("trend_direction", FieldType::enumeration(TREND_DIRECTIONS)),
            ("competitiveness", FieldType::Float),
            ("adoption_rate", FieldType::Float),
        ])
    }

    /// `projects_complete.csv`; undeclared metric columns pass through.
    pub fn projects() -> Self {
        Self::new([
            (
                "repo_name",
                FieldType::String {
                    unknown_if_empty: false,
                },
            ),
            (
                "language",
                FieldType::String {
                    unknown_if_empty: true,
                },
            ),
            ("latest_stars", FieldType::Integer),
            ("latest_activity", FieldType::Float),
            ("latest_openrank", FieldType::Float),
            ("latest_attention", FieldType::Float),
            ("latest_bus_factor", FieldType::Float),
            ("influence_score", FieldType::Float),
            ("code_churn_ratio", FieldType::Float),
            ("avg_issue_age", FieldType::Integer),
            ("latest_participants", FieldType::Integer),
            ("stars_total", FieldType::Integer),
            ("updated_at", FieldType::Integer),
        ])
        .with_passthrough(true)
    }

    pub fn builtin(name: config::BuiltinSchema) -> Self {
        match name {
            config::BuiltinSchema::Rankings => Self::rankings(),
            config::BuiltinSchema::DashboardSummary => Self::dashboard_summary(),
            config::BuiltinSchema::LanguageTrends => Self::language_trends(),
            config::BuiltinSchema::KeywordTrends => Self::keyword_trends(),
            config::BuiltinSchema::Projects => Self::projects(),
        }
    }

    pub fn compile(source: &config::SchemaSource) -> Self {
        match source {
            config::SchemaSource::Builtin(name) => Self::builtin(*name),
            config::SchemaSource::Inline {
                fields,
                passthrough,
            } => Self::new(fields.iter().map(|(name, def)| {
                let ty = match def {
                    config::Field::Integer => FieldType::Integer,
                    config::Field::Float => FieldType::Float,
                    config::Field::String { unknown_if_empty } => FieldType::String {
                        unknown_if_empty: *unknown_if_empty,
                    },
                    config::Field::Enum { values } => {
                        FieldType::enumeration(values.iter().map(String::as_str))
                    }
                    config::Field::Date => FieldType::Date,
                };
                (name.clone(), ty)
            }))
            .with_passthrough(*passthrough),
        }
    }
}
