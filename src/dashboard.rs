//! Per-dataset orchestration: load a CSV snapshot, coerce and reduce it, and
//! serve view models, forecasts and page aggregates from the cached records.

use std::{path::PathBuf, sync::Arc};

use futures::future::join_all;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    Error, ErrorContext, ErrorDetail, aggregate,
    config::{self, Config},
    forecast::{ForecastModel, LinearTrend, Period, TrendForecaster},
    record::{RawRow, TypedRecord, UNKNOWN},
    reduce::reduce_latest,
    schema::{self, FieldSchema, FieldType},
    source,
    view::{self, Filter, PageRequest, RecordFilter, SortSpec, ViewModel},
    warning,
};

const METRIC_NAME: &str = "metric_name";
const METRIC_VALUE: &str = "metric_value";

/// Everything needed to turn one CSV file into typed, optionally grouped records.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub name: String,
    pub path: PathBuf,
    pub schema: FieldSchema,
    /// Group key; with `date` set, records collapse to the latest per key.
    pub key: Option<String>,
    pub date: Option<String>,
    pub forecast: Option<String>,
    pub default_sort: Option<SortSpec>,
    /// Derived category column added to every record on load.
    pub category: Option<aggregate::Categorizer>,
    pub page: PageRequest,
}

impl DatasetSpec {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, schema: FieldSchema) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            schema,
            key: None,
            date: None,
            forecast: None,
            default_sort: None,
            category: None,
            page: PageRequest::DEFAULT,
        }
    }

    pub fn grouped_by(mut self, key: impl Into<String>, date: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self.date = Some(date.into());
        self
    }

    pub fn forecasting(mut self, field: impl Into<String>) -> Self {
        self.forecast = Some(field.into());
        self
    }

    pub fn sorted_by(mut self, sort: SortSpec) -> Self {
        self.default_sort = Some(sort);
        self
    }

    pub fn categorized(mut self, categorizer: aggregate::Categorizer) -> Self {
        self.category = Some(categorizer);
        self
    }

    /// Compile a configured dataset, checking every referenced field against
    /// its schema.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let ctx = ErrorContext::new(name);
        let dataset = config
            .dataset(name)
            .map_err(|e| ctx.error(ErrorDetail::Config(e)))?;
        let ctx = ctx.with_path(config.resolve(dataset));
        let spec = Self {
            name: name.to_owned(),
            path: config.resolve(dataset),
            schema: FieldSchema::compile(&dataset.schema),
            key: dataset.key.clone(),
            date: dataset.date.clone(),
            forecast: dataset.forecast.clone(),
            default_sort: dataset
                .default_sort
                .as_ref()
                .map(|sort: &config::SortConfig| SortSpec::new(&sort.field, sort.order)),
            category: dataset
                .category
                .as_ref()
                .map(|category: &config::Category| aggregate::Categorizer {
                    source: category.field.clone(),
                    target: category.name.clone(),
                    table: category.map.clone(),
                    fallback: category.fallback.clone(),
                }),
            page: PageRequest::first(dataset.page_size)
                .map_err(|e| ctx.error(ErrorDetail::View(e)))?,
        };
        spec.validate().map_err(|detail| ctx.error(detail))?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), ErrorDetail> {
        let referenced = [
            (self.key.as_deref(), "group key"),
            (self.date.as_deref(), "date field"),
            (self.forecast.as_deref(), "forecast field"),
            (self.default_sort.as_ref().map(|s| s.field.as_str()), "sort field"),
        ];
        for (field, role) in referenced {
            if let Some(field) = field {
                if self.derives(field) {
                    continue;
                }
                self.schema.require(field, role)?;
            }
        }
        if let Some(category) = &self.category {
            self.schema.require(&category.source, "category source")?;
            if self.schema.get(&category.target).is_some() {
                return Err(schema::Error::Shadowed(category.target.clone()).into());
            }
        }
        Ok(())
    }

    fn derives(&self, field: &str) -> bool {
        self.category.as_ref().is_some_and(|c| c.target == field)
    }

    fn grouping(&self) -> Option<(&str, &str)> {
        Some((self.key.as_deref()?, self.date.as_deref()?))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub dataset: String,
    pub rows: usize,
    pub entities: usize,
    /// Cells that failed to parse and were defaulted.
    pub warnings: Vec<String>,
}

/// Sort, filter and page position of one dashboard page.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub sort: Option<SortSpec>,
    pub filter: Option<Filter>,
    pub page: PageRequest,
}

#[derive(Debug, Default)]
struct Cache {
    /// Every coerced row, in file order.
    history: Vec<TypedRecord>,
    /// Latest row per key for grouped datasets, otherwise `history`.
    current: Vec<TypedRecord>,
}

pub struct DashboardAssembler {
    spec: DatasetSpec,
    forecaster: Arc<dyn TrendForecaster + Send + Sync>,
    cache: Cache,
    state: ViewState,
}

impl DashboardAssembler {
    pub fn new(spec: DatasetSpec) -> Self {
        let state = ViewState {
            sort: spec.default_sort.clone(),
            filter: None,
            page: spec.page,
        };
        Self {
            spec,
            forecaster: Arc::new(LinearTrend),
            cache: Cache::default(),
            state,
        }
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn TrendForecaster + Send + Sync>) -> Self {
        self.forecaster = forecaster;
        self
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &DatasetSpec {
        &self.spec
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    /// Cached records as served to views.
    pub fn records(&self) -> &[TypedRecord] {
        &self.cache.current
    }

    /// Every cached row, before reduction.
    pub fn all_records(&self) -> &[TypedRecord] {
        &self.cache.history
    }

    fn context(&self) -> ErrorContext {
        ErrorContext::new(&self.spec.name).with_path(&self.spec.path)
    }

    /// Read the dataset's CSV and replace the cache. On failure the previous
    /// cache stays in place.
    pub async fn load(&mut self) -> Result<LoadReport, Error> {
        match source::read_rows(&self.spec.path).await {
            Ok(rows) => Ok(self.load_rows(&rows)),
            Err(detail) => {
                let error = self.context().error(detail);
                warn!(dataset = %self.spec.name, %error, "failed to load dataset");
                Err(error)
            }
        }
    }

    /// Coerce and reduce already-parsed rows, fully replacing the cache.
    pub fn load_rows(&mut self, rows: &[RawRow]) -> LoadReport {
        let (history, warnings) = warning::collect_warnings(|| {
            rows.iter()
                .map(|row| {
                    let mut record = crate::record::coerce(row, &self.spec.schema);
                    if let Some(category) = &self.spec.category {
                        category.apply(&mut record);
                    }
                    record
                })
                .collect::<Vec<_>>()
        });
        let current = match self.spec.grouping() {
            Some((key, date)) => reduce_latest(&history, key, date)
                .into_values()
                .cloned()
                .collect(),
            None => history.clone(),
        };
        for message in &warnings {
            debug!(dataset = %self.spec.name, warning = message.as_str(), "cell defaulted");
        }
        info!(
            dataset = %self.spec.name,
            rows = history.len(),
            entities = current.len(),
            warnings = warnings.len(),
            "dataset loaded"
        );
        let report = LoadReport {
            dataset: self.spec.name.clone(),
            rows: history.len(),
            entities: current.len(),
            warnings,
        };
        self.cache = Cache { history, current };
        report
    }

    fn check_field(&self, field: &str, role: &'static str) -> Result<(), Error> {
        if self.spec.derives(field) {
            return Ok(());
        }
        if self.spec.schema.passthrough() && self.spec.schema.get(field).is_none() {
            return Ok(());
        }
        self.spec
            .schema
            .require(field, role)
            .map(|_| ())
            .map_err(|e| self.context().error(e.into()))
    }

    fn require_key(&self) -> Result<&str, Error> {
        self.spec
            .key
            .as_deref()
            .ok_or_else(|| self.context().error(ErrorDetail::Unconfigured("group key")))
    }

    fn require_grouping(&self) -> Result<(&str, &str), Error> {
        let key = self.require_key()?;
        let date = self
            .spec
            .date
            .as_deref()
            .ok_or_else(|| self.context().error(ErrorDetail::Unconfigured("date field")))?;
        Ok((key, date))
    }

    fn missing(&self, key: &str) -> Error {
        warn!(dataset = %self.spec.name, key, "no records for entity");
        self.context().error(ErrorDetail::MissingEntity {
            key: key.to_owned(),
        })
    }

    /// Headline metrics. Datasets of `metric_name`/`metric_value` rows map
    /// each known metric to its value, the last row winning. Other datasets
    /// report their record counts.
    pub fn summary_metrics(&self) -> IndexMap<String, String> {
        let schema = &self.spec.schema;
        let mut metrics = IndexMap::new();
        if let (Some(name_type), Some(_)) = (schema.get(METRIC_NAME), schema.get(METRIC_VALUE)) {
            let allowed = match name_type {
                FieldType::Enum { allowed } => Some(allowed),
                _ => None,
            };
            for record in &self.cache.current {
                let name = record.text(METRIC_NAME);
                if allowed.is_some_and(|allowed| !allowed.contains(&name)) {
                    continue;
                }
                metrics.insert(name, record.text(METRIC_VALUE));
            }
        } else {
            metrics.insert("records".to_owned(), self.cache.history.len().to_string());
            if self.spec.grouping().is_some() {
                metrics.insert("entities".to_owned(), self.cache.current.len().to_string());
            }
        }
        metrics
    }

    pub fn ranked_page(
        &self,
        sort: Option<&SortSpec>,
        filter: Option<&dyn RecordFilter>,
        page: PageRequest,
    ) -> Result<ViewModel, Error> {
        if let Some(sort) = sort {
            self.check_field(&sort.field, "sort field")?;
        }
        Ok(view::build_view(&self.cache.current, sort, filter, page))
    }

    pub fn top_n(&self, n: usize, field: &str) -> Result<ViewModel, Error> {
        self.check_field(field, "sort field")?;
        view::top_n(&self.cache.current, field, n, None).map_err(|e| self.context().error(e.into()))
    }

    /// Forecast the configured value field for one entity.
    pub fn forecast(&self, key: &str, horizon: usize) -> Result<ForecastModel, Error> {
        let field = self
            .spec
            .forecast
            .as_deref()
            .ok_or_else(|| self.context().error(ErrorDetail::Unconfigured("forecast field")))?;
        self.forecast_field(key, field, horizon)
    }

    /// Fit the entity's full history of `field`, ordered by date, and project
    /// `horizon` periods ahead.
    pub fn forecast_field(&self, key: &str, field: &str, horizon: usize) -> Result<ForecastModel, Error> {
        if horizon == 0 {
            return Err(self.context().error(ErrorDetail::ZeroHorizon));
        }
        self.check_field(field, "forecast field")?;
        let series = self.entity_rows(key, false)?;
        let historical = series
            .iter()
            .enumerate()
            .map(|(i, record)| Period {
                label: match &self.spec.date {
                    Some(date) => record.text(date),
                    None => (i + 1).to_string(),
                },
                value: record.number(field),
            })
            .collect();
        Ok(ForecastModel::build(self.forecaster.as_ref(), historical, horizon))
    }

    /// Rows for one entity from the full history, by date ascending or
    /// descending. Stable, so same-dated rows keep file order.
    fn entity_rows(&self, key: &str, newest_first: bool) -> Result<Vec<&TypedRecord>, Error> {
        let key_field = self.require_key()?;
        let mut rows: Vec<&TypedRecord> = self
            .cache
            .history
            .iter()
            .filter(|record| record.text(key_field) == key)
            .collect();
        if rows.is_empty() {
            return Err(self.missing(key));
        }
        if let Some(date) = &self.spec.date {
            let sort = SortSpec::new(
                date,
                if newest_first {
                    view::SortOrder::Desc
                } else {
                    view::SortOrder::Asc
                },
            );
            rows.sort_by(|a, b| sort.compare(a, b));
        }
        Ok(rows)
    }

    /// The current record for one entity.
    pub fn detail(&self, key: &str) -> Result<&TypedRecord, Error> {
        let key_field = self.require_key()?;
        self.cache
            .current
            .iter()
            .find(|record| record.text(key_field) == key)
            .ok_or_else(|| self.missing(key))
    }

    /// Every row for one entity, newest first.
    pub fn history(&self, key: &str) -> Result<Vec<&TypedRecord>, Error> {
        self.entity_rows(key, true)
    }

    pub fn distribution(&self, field: &str) -> Result<IndexMap<String, usize>, Error> {
        self.check_field(field, "distribution field")?;
        Ok(aggregate::count_by(&self.cache.current, field))
    }

    /// Distinct values to offer in a filter drop-down, without the unknown
    /// placeholder.
    pub fn filter_options(&self, field: &str) -> Result<Vec<String>, Error> {
        self.check_field(field, "filter field")?;
        Ok(aggregate::distinct_values(&self.cache.current, field, &[UNKNOWN]))
    }

    pub fn window_leaders(
        &self,
        value_field: &str,
        since: &str,
    ) -> Result<Vec<aggregate::KeyedValue>, Error> {
        let (key, date) = self.require_grouping()?;
        self.check_field(value_field, "value field")?;
        Ok(aggregate::window_average(
            &self.cache.history,
            key,
            date,
            value_field,
            since,
        ))
    }

    pub fn growth_leaders(
        &self,
        value_field: &str,
        from: &str,
        to: &str,
    ) -> Result<aggregate::GrowthLeaders, Error> {
        let (key, date) = self.require_grouping()?;
        self.check_field(value_field, "value field")?;
        Ok(aggregate::growth_leaders(
            &self.cache.history,
            key,
            date,
            value_field,
            from,
            to,
        ))
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) -> Result<(), Error> {
        if let Some(sort) = &sort {
            self.check_field(&sort.field, "sort field")?;
        }
        self.state.sort = sort;
        self.state.page = self.state.page.rewind();
        Ok(())
    }

    /// Flip the current sort direction, as clicking a sorted column header does.
    pub fn toggle_order(&mut self) {
        if let Some(sort) = &mut self.state.sort {
            sort.order = sort.order.flip();
            self.state.page = self.state.page.rewind();
        }
    }

    pub fn set_filter(&mut self, filter: Option<Filter>) {
        self.state.filter = filter;
        self.state.page = self.state.page.rewind();
    }

    pub fn set_page_size(&mut self, size: usize) -> Result<(), Error> {
        self.state.page = PageRequest::first(size).map_err(|e| self.context().error(e.into()))?;
        Ok(())
    }

    fn page_count(&self) -> usize {
        let matching = match &self.state.filter {
            Some(filter) => self
                .cache
                .current
                .iter()
                .filter(|record| filter.matches(record))
                .count(),
            None => self.cache.current.len(),
        };
        matching.div_ceil(self.state.page.size())
    }

    pub fn next_page(&mut self) -> bool {
        if self.state.page.index() < self.page_count() {
            self.state.page = self.state.page.next();
            true
        } else {
            false
        }
    }

    pub fn prev_page(&mut self) -> bool {
        match self.state.page.previous() {
            Some(page) => {
                self.state.page = page;
                true
            }
            None => false,
        }
    }

    pub fn current_page(&self) -> ViewModel {
        view::build_view(
            &self.cache.current,
            self.state.sort.as_ref(),
            self.state.filter.as_ref().map(|f| f as &dyn RecordFilter),
            self.state.page,
        )
    }
}

/// Load several dashboards concurrently. Results are in input order and a
/// failed load does not affect the others.
pub async fn load_all(assemblers: &mut [DashboardAssembler]) -> Vec<Result<LoadReport, Error>> {
    join_all(assemblers.iter_mut().map(|assembler| assembler.load())).await
}

#[cfg(test)]
mod tests {
    use indexmap::indexmap;

    use super::*;
    use crate::{config::BuiltinSchema, view::SortOrder};

    fn rows(csv: &str) -> Vec<RawRow> {
        source::parse_rows(csv).unwrap()
    }

    fn languages() -> DashboardAssembler {
        let spec = DatasetSpec::new(
            "languages",
            "language_trends_detailed.csv",
            FieldSchema::builtin(BuiltinSchema::LanguageTrends),
        )
        .grouped_by("language", "date")
        .forecasting("popularity_index");
        let mut assembler = DashboardAssembler::new(spec);
        assembler.load_rows(&rows(
            "date,language,project_count,total_stars,avg_stars,popularity_index,trend_direction\n\
             2025-01,Go,5,100,20,10,up\n\
             2025-02,Go,7,120,17,20,up\n\
             2025-02,Go,9,130,14,25,up\n\
             2025-01,Rust,4,80,20,30,stable\n\
             2025-03,Go,8,150,18,30,down\n",
        ));
        assembler
    }

    fn rankings(count: usize) -> DashboardAssembler {
        let spec = DatasetSpec::new("rankings", "influence_ranking.csv", FieldSchema::rankings())
            .sorted_by(SortSpec::desc("influence_score"));
        let mut csv = String::from("ranking,repo_name,language,influence_score\n");
        for i in 0..count {
            let language = if i % 2 == 0 { "Go" } else { "" };
            csv.push_str(&format!("{},repo{i},{language},{i}\n", i + 1));
        }
        let mut assembler = DashboardAssembler::new(spec);
        assembler.load_rows(&rows(&csv));
        assembler
    }

    #[test]
    fn grouped_load_reports_entities() {
        let assembler = languages();
        assert_eq!(assembler.records().len(), 2);
        assert_eq!(assembler.all_records().len(), 5);
        let go = assembler.detail("Go").unwrap();
        assert_eq!(go.text("date"), "2025-03");
    }

    #[test]
    fn load_replaces_cache() {
        let mut assembler = languages();
        let report = assembler.load_rows(&rows(
            "date,language,project_count\n2025-04,Zig,x\n",
        ));
        assert_eq!(report.rows, 1);
        assert_eq!(report.entities, 1);
        assert_eq!(report.warnings.len(), 1);
        assert!(assembler.detail("Go").unwrap_err().is_missing_entity());
    }

    #[test]
    fn forecast_uses_sorted_history() {
        let assembler = languages();
        let model = assembler.forecast("Go", 2).unwrap();
        let labels: Vec<_> = model.historical.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["2025-01", "2025-02", "2025-02", "2025-03"]);
        let projected: Vec<_> = model.projected.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(projected, ["2025-04", "2025-05"]);
        assert_eq!(model.error_buckets.values().sum::<usize>(), 3);

        assert!(assembler.forecast("Cobol", 2).unwrap_err().is_missing_entity());
        assert!(matches!(
            *assembler.forecast("Go", 0).unwrap_err().detail,
            ErrorDetail::ZeroHorizon
        ));
    }

    #[test]
    fn history_is_newest_first() {
        let assembler = languages();
        let history = assembler.history("Go").unwrap();
        let counts: Vec<_> = history.iter().map(|r| r.number("project_count")).collect();
        assert_eq!(counts, [8.0, 7.0, 9.0, 5.0]);
    }

    #[test]
    fn default_sort_and_paging_state() {
        let mut assembler = rankings(25);
        let first = assembler.current_page();
        assert_eq!(first.records[0].text("repo_name"), "repo24");
        assert_eq!(first.page_count(), 3);

        assert!(assembler.next_page());
        assert!(assembler.next_page());
        assert!(!assembler.next_page());
        assert_eq!(assembler.current_page().records.len(), 5);
        assert!(assembler.prev_page());
        assert_eq!(assembler.state().page.index(), 2);

        assembler.set_filter(Some(Filter::equals("language", "Go")));
        assert_eq!(assembler.state().page.index(), 1);
        assert_eq!(assembler.current_page().total_matching_count, 13);

        assembler.toggle_order();
        assert_eq!(
            assembler.current_page().records[0].text("repo_name"),
            "repo0"
        );
        assert!(!assembler.prev_page());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut assembler = rankings(3);
        assert!(assembler.top_n(3, "stars").is_err());
        assert!(
            assembler
                .set_sort(Some(SortSpec::new("nope", SortOrder::Asc)))
                .is_err()
        );
        assert!(assembler.forecast("repo1", 1).is_err());
        assert!(assembler.growth_leaders("influence_score", "a", "b").is_err());
    }

    #[test]
    fn distribution_and_options() {
        let assembler = rankings(5);
        assert_eq!(
            assembler.distribution("language").unwrap(),
            indexmap! { "Go".to_string() => 3usize, "Unknown".to_string() => 2 }
        );
        assert_eq!(assembler.filter_options("language").unwrap(), ["Go"]);
    }

    #[test]
    fn summary_metrics_keep_known_names() {
        let spec = DatasetSpec::new("summary", "dashboard_summary.csv", FieldSchema::dashboard_summary());
        let mut assembler = DashboardAssembler::new(spec);
        assembler.load_rows(&rows(
            "metric_name,metric_value\n\
             total_projects,10\n\
             bogus,1\n\
             total_projects,12\n\
             main_language_count,7\n",
        ));
        assert_eq!(
            assembler.summary_metrics(),
            indexmap! {
                "total_projects".to_string() => "12".to_string(),
                "main_language_count".to_string() => "7".to_string(),
            }
        );
        assert_eq!(rankings(4).summary_metrics()["records"], "4");
    }

    #[test]
    fn config_validation() {
        let config = Config::from_yaml(
            "datasets:\n  languages:\n    path: l.csv\n    schema: language_trends\n    key: lang\n",
            "/data",
        )
        .unwrap();
        let error = DatasetSpec::from_config(&config, "languages").unwrap_err();
        assert!(matches!(*error.detail, ErrorDetail::Schema(_)));
        assert!(DatasetSpec::from_config(&config, "missing").is_err());
    }

    #[test]
    fn derived_category_must_not_shadow_schema() {
        let config = Config::from_yaml(
            "datasets:\n  ranked:\n    path: r.csv\n    schema: rankings\n    category:\n      field: language\n      as: repo_name\n      fallback: Other\n",
            "/data",
        )
        .unwrap();
        let error = DatasetSpec::from_config(&config, "ranked").unwrap_err();
        assert!(matches!(
            *error.detail,
            ErrorDetail::Schema(schema::Error::Shadowed(_))
        ));
    }

    #[test]
    fn derived_category_is_sortable_and_filterable() {
        let spec = DatasetSpec::new("rankings", "influence_ranking.csv", FieldSchema::rankings())
            .categorized(aggregate::Categorizer {
                source: "language".into(),
                target: "domain".into(),
                table: indexmap! { "Go".to_string() => "Backend".to_string() },
                fallback: "Tools".into(),
            });
        let mut assembler = DashboardAssembler::new(spec);
        assembler.load_rows(&rows("repo_name,language\na,Go\nb,\nc,Go\n"));
        assert_eq!(
            assembler.distribution("domain").unwrap(),
            indexmap! { "Backend".to_string() => 2usize, "Tools".to_string() => 1 }
        );
        assembler
            .set_sort(Some(SortSpec::new("domain", SortOrder::Desc)))
            .unwrap();
        assembler.set_filter(Some(Filter::equals("domain", "Backend")));
        let page = assembler.current_page();
        assert_eq!(page.total_matching_count, 2);
        assert_eq!(page.records[0].text("domain"), "Backend");
    }

    #[tokio::test]
    async fn failed_load_keeps_cache() {
        let mut assembler = languages();
        let error = assembler.load().await.unwrap_err();
        assert!(error.is_load_failure());
        assert_eq!(assembler.records().len(), 2);
    }
}
