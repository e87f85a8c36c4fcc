use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;
use trendboard::{
    config::Config,
    dashboard::{DashboardAssembler, DatasetSpec},
    view::{Filter, PageRequest, RecordFilter, SortOrder, SortSpec},
};

#[derive(Parser)]
struct Opts {
    #[clap(short, long, env = "TRENDBOARD_CONFIG")]
    config: PathBuf,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Headline metrics of a dataset
    Summary { dataset: String },
    /// One page of the ranked table
    Rank {
        dataset: String,
        #[clap(long)]
        sort: Option<String>,
        #[clap(long, default_value_t = SortOrder::Asc)]
        order: SortOrder,
        /// Exact match, `FIELD=VALUE`; repeatable
        #[clap(long = "eq", value_parser = parse_assignment)]
        equals: Vec<(String, String)>,
        /// Case-insensitive substring match, `FIELD=TEXT`
        #[clap(long, value_parser = parse_assignment)]
        search: Option<(String, String)>,
        #[clap(long, default_value_t = 1)]
        page: usize,
        #[clap(long)]
        page_size: Option<usize>,
    },
    /// Leaderboard by a numeric field
    Top {
        dataset: String,
        field: String,
        #[clap(short, default_value_t = 10)]
        n: usize,
    },
    Forecast {
        dataset: String,
        key: String,
        #[clap(long, default_value_t = 3)]
        horizon: usize,
    },
    Detail { dataset: String, key: String },
    /// Every row of one entity, newest first
    History { dataset: String, key: String },
    Distribution { dataset: String, field: String },
    /// Fastest riser and faller between two periods
    Growth {
        dataset: String,
        field: String,
        #[clap(long)]
        from: String,
        #[clap(long)]
        to: String,
    },
}

impl Command {
    fn dataset(&self) -> &str {
        match self {
            Command::Summary { dataset }
            | Command::Rank { dataset, .. }
            | Command::Top { dataset, .. }
            | Command::Forecast { dataset, .. }
            | Command::Detail { dataset, .. }
            | Command::History { dataset, .. }
            | Command::Distribution { dataset, .. }
            | Command::Growth { dataset, .. } => dataset,
        }
    }
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    let (field, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got `{s}`"))?;
    Ok((field.trim().to_owned(), value.to_owned()))
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let config = Config::load(&opts.config)
        .await
        .with_context(|| format!("load config from {}", opts.config.display()))?;
    let spec = DatasetSpec::from_config(&config, opts.command.dataset())?;
    let mut assembler = DashboardAssembler::new(spec);
    let report = assembler.load().await?;
    if !report.warnings.is_empty() {
        tracing::warn!(
            dataset = %report.dataset,
            count = report.warnings.len(),
            "some cells were defaulted"
        );
    }

    match opts.command {
        Command::Summary { .. } => print(&assembler.summary_metrics()),
        Command::Rank {
            sort,
            order,
            equals,
            search,
            page,
            page_size,
            ..
        } => {
            let mut filters: Vec<Filter> = equals
                .into_iter()
                .map(|(field, value)| Filter::equals(field, value))
                .collect();
            if let Some((field, needle)) = search {
                filters.push(Filter::contains(field, needle));
            }
            let sort = sort
                .map(|field| SortSpec::new(field, order))
                .or_else(|| assembler.spec().default_sort.clone());
            let size = page_size.unwrap_or(assembler.spec().page.size());
            let page = PageRequest::new(page, size)?;
            let filter = (!filters.is_empty()).then_some(Filter::All(filters));
            print(&assembler.ranked_page(
                sort.as_ref(),
                filter.as_ref().map(|f| f as &dyn RecordFilter),
                page,
            )?)
        }
        Command::Top { field, n, .. } => print(&assembler.top_n(n, &field)?),
        Command::Forecast { key, horizon, .. } => print(&assembler.forecast(&key, horizon)?),
        Command::Detail { key, .. } => print(assembler.detail(&key)?),
        Command::History { key, .. } => print(&assembler.history(&key)?),
        Command::Distribution { field, .. } => print(&assembler.distribution(&field)?),
        Command::Growth {
            field, from, to, ..
        } => print(&assembler.growth_leaders(&field, &from, &to)?),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(e) = run(opts).await {
        error!(?e, "critical error");
        std::process::exit(1);
    }
}
