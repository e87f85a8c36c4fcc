use indexmap::indexmap;

use crate::{
    ErrorDetail,
    config::Config,
    dashboard::{self, DashboardAssembler, DatasetSpec},
    forecast::{LinearTrend, TrendForecaster},
    view::{Filter, PageRequest, SortOrder, SortSpec},
};

const CONFIG: &str = "src/tests/fixtures/dashboard.yaml";

async fn assembler(config: &Config, name: &str) -> DashboardAssembler {
    let mut assembler = DashboardAssembler::new(DatasetSpec::from_config(config, name).unwrap());
    assembler.load().await.unwrap();
    assembler
}

fn names(view: &crate::view::ViewModel, field: &str) -> Vec<String> {
    view.records.iter().map(|r| r.text(field)).collect()
}

#[tokio::test]
async fn rankings_page_through_default_sort() {
    let config = Config::load(CONFIG).await.unwrap();
    let mut rankings = DashboardAssembler::new(DatasetSpec::from_config(&config, "rankings").unwrap());
    let report = rankings.load().await.unwrap();
    assert_eq!(report.rows, 7);
    assert_eq!(report.entities, 7);
    assert_eq!(report.warnings.len(), 1);

    let first = rankings.current_page();
    assert_eq!(
        names(&first, "repo_name"),
        ["golang/go", "rust-lang/rust", "tokio-rs/tokio"]
    );
    assert_eq!(first.page_count(), 3);

    assert!(rankings.next_page());
    assert_eq!(
        names(&rankings.current_page(), "repo_name"),
        ["pallets/flask", "torvalds/linux", "kubernetes/kubernetes"]
    );
    assert!(rankings.next_page());
    let last = rankings.current_page();
    assert_eq!(names(&last, "repo_name"), ["awesome/lists"]);
    assert_eq!(last.records[0].text("language"), "Unknown");
    assert!(!rankings.next_page());

    rankings.set_filter(Some(Filter::equals("language", "Rust")));
    let rust = rankings.current_page();
    assert_eq!(rust.page_index, 1);
    assert_eq!(rust.total_matching_count, 2);
    assert_eq!(names(&rust, "repo_name"), ["rust-lang/rust", "tokio-rs/tokio"]);
}

#[tokio::test]
async fn rankings_aggregates() {
    let config = Config::load(CONFIG).await.unwrap();
    let rankings = assembler(&config, "rankings").await;

    assert_eq!(
        rankings.distribution("language").unwrap(),
        indexmap! {
            "Go".to_string() => 2usize,
            "Rust".to_string() => 2,
            "Python".to_string() => 1,
            "C".to_string() => 1,
            "Unknown".to_string() => 1,
        }
    );
    assert_eq!(
        rankings.filter_options("language").unwrap(),
        ["C", "Go", "Python", "Rust"]
    );

    let top = rankings.top_n(2, "activity_score").unwrap();
    assert_eq!(names(&top, "repo_name"), ["torvalds/linux", "rust-lang/rust"]);
    assert_eq!(top.total_matching_count, 7);

    let search = Filter::contains("repo_name", "RUST");
    let page = rankings
        .ranked_page(
            Some(&SortSpec::new("repo_name", SortOrder::Asc)),
            Some(&search),
            PageRequest::first(10).unwrap(),
        )
        .unwrap();
    assert_eq!(names(&page, "repo_name"), ["rust-lang/rust"]);
}

#[tokio::test]
async fn summary_metrics() {
    let config = Config::load(CONFIG).await.unwrap();
    let summary = assembler(&config, "summary").await;
    assert_eq!(
        summary.summary_metrics(),
        indexmap! {
            "total_projects".to_string() => "7".to_string(),
            "total_stars".to_string() => "1520000".to_string(),
            "avg_influence_score".to_string() => "82.69".to_string(),
            "main_language_count".to_string() => "4".to_string(),
        }
    );
}

#[tokio::test]
async fn language_detail_and_forecast() {
    let config = Config::load(CONFIG).await.unwrap();
    let languages = assembler(&config, "languages").await;
    assert_eq!(languages.records().len(), 3);

    let go = languages.detail("Go").unwrap();
    assert_eq!(go.text("date"), "2025-11");
    assert_eq!(go.number("project_count"), 7.0);

    let history = languages.history("Go").unwrap();
    let counts: Vec<_> = history.iter().map(|r| r.number("project_count")).collect();
    assert_eq!(counts, [7.0, 9.0, 6.0, 5.0]);

    let rust = languages.forecast("Rust", 3).unwrap();
    assert_eq!(rust.slope, 10.0);
    assert_eq!(rust.intercept, 50.0);
    let projected: Vec<_> = rust
        .projected
        .iter()
        .map(|p| (p.label.as_str(), p.value))
        .collect();
    assert_eq!(
        projected,
        [("2025-12", 80.0), ("2026-01", 90.0), ("2026-02", 100.0)]
    );

    let go = languages.forecast("Go", 1).unwrap();
    assert!((go.slope - 4.1).abs() < 1e-9);
    assert!((go.projected[0].value - 57.0).abs() < 1e-9);
    assert_eq!(go.error_buckets["0-10%"], 2);
    assert_eq!(go.error_buckets["10-20%"], 1);
    assert_eq!(go.error_buckets.values().sum::<usize>(), 3);

    let leaders = languages
        .window_leaders("popularity_index", "2025-10")
        .unwrap();
    let keys: Vec<_> = leaders.iter().map(|l| l.key.as_str()).collect();
    assert_eq!(keys, ["Rust", "Python", "Go"]);
    assert_eq!(leaders[2].value, 49.0);

    let missing = languages.detail("Haskell").unwrap_err();
    assert!(missing.is_missing_entity());
    assert!(languages.forecast("Haskell", 3).unwrap_err().is_missing_entity());
}

#[tokio::test]
async fn keyword_growth() {
    let config = Config::load(CONFIG).await.unwrap();
    let keywords = assembler(&config, "keywords").await;
    assert_eq!(
        names(&keywords.current_page(), "keyword_category"),
        ["AI/ML", "Web", "Blockchain"]
    );

    let growth = keywords
        .growth_leaders("search_volume", "2025-09", "2026-01")
        .unwrap();
    let rising = growth.rising.unwrap();
    assert_eq!(rising.key, "AI/ML");
    assert_eq!(rising.percent, 60.0);
    let falling = growth.falling.unwrap();
    assert_eq!(falling.key, "Blockchain");
    assert_eq!(falling.percent, -50.0);
}

#[tokio::test]
async fn projects_keep_extra_columns() {
    let config = Config::load(CONFIG).await.unwrap();
    let projects = assembler(&config, "projects").await;
    let go = projects.detail("golang/go").unwrap();
    assert_eq!(go.text("homepage"), "https://go.dev");
    assert_eq!(go.number("latest_stars"), 120000.0);
    assert_eq!(go.number("latest_participants"), 0.0);

    let page = projects
        .ranked_page(
            Some(&SortSpec::desc("homepage")),
            None,
            PageRequest::first(10).unwrap(),
        )
        .unwrap();
    assert_eq!(
        names(&page, "repo_name"),
        ["rust-lang/rust", "golang/go", "pallets/flask", "someone/dotfiles"]
    );
    assert!(projects.detail("someone/else").unwrap_err().is_missing_entity());
}

#[tokio::test]
async fn projects_filter_by_derived_domain() {
    let config = Config::load(CONFIG).await.unwrap();
    let projects = assembler(&config, "projects").await;
    assert_eq!(projects.detail("pallets/flask").unwrap().text("domain"), "AI/ML");
    assert_eq!(projects.detail("someone/dotfiles").unwrap().text("domain"), "Tools");
    assert_eq!(
        projects.filter_options("domain").unwrap(),
        ["AI/ML", "Backend", "Tools"]
    );

    let filter = Filter::All(vec![
        Filter::contains("repo_name", "GO"),
        Filter::equals("language", "Go"),
        Filter::equals("domain", "Backend"),
    ]);
    let page = projects
        .ranked_page(None, Some(&filter), PageRequest::first(10).unwrap())
        .unwrap();
    assert_eq!(names(&page, "repo_name"), ["golang/go"]);

    let backend = Filter::equals("domain", "Backend");
    let page = projects
        .ranked_page(
            Some(&SortSpec::desc("latest_stars")),
            Some(&backend),
            PageRequest::first(10).unwrap(),
        )
        .unwrap();
    assert_eq!(names(&page, "repo_name"), ["golang/go", "rust-lang/rust"]);
}

#[tokio::test]
async fn one_failed_load_does_not_block_others() {
    let config = Config::load(CONFIG).await.unwrap();
    let mut assemblers: Vec<_> = ["rankings", "archive", "languages"]
        .into_iter()
        .map(|name| DashboardAssembler::new(DatasetSpec::from_config(&config, name).unwrap()))
        .collect();
    let results = dashboard::load_all(&mut assemblers).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().dataset, "rankings");
    let error = results[1].as_ref().unwrap_err();
    assert!(error.is_load_failure());
    assert!(error.to_string().starts_with("archive("));
    assert_eq!(results[2].as_ref().unwrap().entities, 3);

    assert!(assemblers[1].records().is_empty());
    assert_eq!(assemblers[2].records().len(), 3);
}

#[tokio::test]
async fn configured_fields_must_exist() {
    let config = Config::from_yaml(
        r#"
datasets:
  languages:
    path: language_trends_detailed.csv
    schema: language_trends
    key: language
    date: date
    forecast: stars
  ranked:
    path: influence_ranking.csv
    schema: rankings
    page_size: 0
"#,
        "src/tests/fixtures",
    )
    .unwrap();
    let error = DatasetSpec::from_config(&config, "languages").unwrap_err();
    assert!(matches!(*error.detail, ErrorDetail::Schema(_)));
    let error = DatasetSpec::from_config(&config, "ranked").unwrap_err();
    assert!(matches!(*error.detail, ErrorDetail::View(_)));
    let error = DatasetSpec::from_config(&config, "keywords").unwrap_err();
    assert!(matches!(*error.detail, ErrorDetail::Config(_)));
}

struct Flat;

impl TrendForecaster for Flat {
    fn forecast(&self, series: &[f64], horizon: usize) -> crate::forecast::Forecast {
        let last = series.last().copied().unwrap_or_default();
        crate::forecast::Forecast {
            slope: 0.0,
            intercept: last,
            projected: vec![last; horizon],
        }
    }

    fn backtest_errors(&self, series: &[f64]) -> Vec<f64> {
        LinearTrend.backtest_errors(series)
    }
}

#[tokio::test]
async fn forecaster_is_replaceable() {
    let config = Config::load(CONFIG).await.unwrap();
    let languages = assembler(&config, "languages")
        .await
        .with_forecaster(std::sync::Arc::new(Flat));
    let model = languages.forecast("Go", 2).unwrap();
    let values: Vec<_> = model.projected.iter().map(|p| p.value).collect();
    assert_eq!(values, [52.0, 52.0]);
}
