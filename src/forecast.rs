//! Trend forecasting over monthly metric series.
//!
//! The default model is an ordinary least squares line fitted against the
//! 0-based index of each observation. Forecasts are clamped at zero because
//! every tracked metric is non-negative.

use chrono::{Months, NaiveDate};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::trace;

/// Upper bounds (exclusive) of the backtest error buckets, in percent.
const BUCKET_BOUNDS: [f64; 4] = [10.0, 20.0, 30.0, 50.0];

pub const BUCKET_LABELS: [&str; 5] = ["0-10%", "10-20%", "20-30%", "30-50%", "50%+"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    /// Closed-form OLS of `values` against x = 0..n. Fewer than two points
    /// give a flat line through the single value (or zero).
    pub fn ols(values: &[f64]) -> Self {
        let n = values.len();
        if n < 2 {
            return Self {
                slope: 0.0,
                intercept: values.first().copied().unwrap_or(0.0),
            };
        }
        let n_f = n as f64;
        let (sum_x, sum_y, sum_xy, sum_xx) = values.iter().enumerate().fold(
            (0.0, 0.0, 0.0, 0.0),
            |(sx, sy, sxy, sxx), (i, &y)| {
                let x = i as f64;
                (sx + x, sy + y, sxy + x * y, sxx + x * x)
            },
        );
        let slope = (n_f * sum_xy - sum_x * sum_y) / (n_f * sum_xx - sum_x * sum_x);
        let intercept = (sum_y - slope * sum_x) / n_f;
        Self { slope, intercept }
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub slope: f64,
    pub intercept: f64,
    pub projected: Vec<f64>,
}

/// A model that projects a series forward and can score itself on history.
pub trait TrendForecaster {
    fn forecast(&self, series: &[f64], horizon: usize) -> Forecast;

    /// One-step-ahead percentage errors, one per observation after the first.
    fn backtest_errors(&self, series: &[f64]) -> Vec<f64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LinearTrend;

impl TrendForecaster for LinearTrend {
    fn forecast(&self, series: &[f64], horizon: usize) -> Forecast {
        let fit = LinearFit::ols(series);
        let last = series.len().saturating_sub(1) as f64;
        let projected = (1..=horizon)
            .map(|k| fit.predict(last + k as f64).max(0.0))
            .collect();
        trace!(
            points = series.len(),
            slope = fit.slope,
            intercept = fit.intercept,
            "linear trend fitted"
        );
        Forecast {
            slope: fit.slope,
            intercept: fit.intercept,
            projected,
        }
    }

    fn backtest_errors(&self, series: &[f64]) -> Vec<f64> {
        (1..series.len())
            .map(|i| {
                let predicted = LinearFit::ols(&series[..i]).predict(i as f64);
                let actual = series[i];
                if actual == 0.0 {
                    0.0
                } else {
                    (predicted - actual).abs() / actual * 100.0
                }
            })
            .collect()
    }
}

/// Count errors into the fixed ranges `[0,10) [10,20) [20,30) [30,50) [50,∞)`.
pub fn bucket_errors(errors: &[f64]) -> IndexMap<String, usize> {
    let mut counts = [0usize; BUCKET_LABELS.len()];
    for &error in errors {
        let bucket = BUCKET_BOUNDS
            .iter()
            .position(|&bound| error < bound)
            .unwrap_or(BUCKET_BOUNDS.len());
        counts[bucket] += 1;
    }
    BUCKET_LABELS
        .iter()
        .zip(counts)
        .map(|(label, count)| (label.to_string(), count))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastModel {
    pub historical: Vec<Period>,
    pub projected: Vec<Period>,
    pub slope: f64,
    pub intercept: f64,
    pub error_buckets: IndexMap<String, usize>,
}

impl ForecastModel {
    /// Fit `forecaster` on a labelled series and project `horizon` periods.
    pub fn build(
        forecaster: &dyn TrendForecaster,
        historical: Vec<Period>,
        horizon: usize,
    ) -> Self {
        let values: Vec<f64> = historical.iter().map(|p| p.value).collect();
        let forecast = forecaster.forecast(&values, horizon);
        let labels = historical
            .last()
            .map(|p| next_period_labels(&p.label, horizon))
            .unwrap_or_else(|| (1..=horizon).map(|k| format!("+{k}")).collect());
        let projected = labels
            .into_iter()
            .zip(forecast.projected)
            .map(|(label, value)| Period { label, value })
            .collect();
        Self {
            error_buckets: bucket_errors(&forecaster.backtest_errors(&values)),
            historical,
            projected,
            slope: forecast.slope,
            intercept: forecast.intercept,
        }
    }
}

/// Continue a `YYYY-MM` or `YYYY-MM-DD` label by calendar month, keeping its
/// granularity. Labels that are not dates get a `+k` suffix.
pub fn next_period_labels(last: &str, horizon: usize) -> Vec<String> {
    let (date, monthly) = match NaiveDate::parse_from_str(last, "%Y-%m-%d") {
        Ok(date) => (Some(date), false),
        Err(_) => (
            NaiveDate::parse_from_str(&format!("{last}-01"), "%Y-%m-%d").ok(),
            true,
        ),
    };
    (1..=horizon)
        .map(|k| label_after(date, monthly, last, k))
        .collect()
}

fn label_after(date: Option<NaiveDate>, monthly: bool, last: &str, k: usize) -> String {
    let next = date
        .zip(u32::try_from(k).ok())
        .and_then(|(d, months)| d.checked_add_months(Months::new(months)));
    match next {
        Some(next) if monthly => next.format("%Y-%m").to_string(),
        Some(next) => next.format("%Y-%m-%d").to_string(),
        None => format!("{last}+{k}"),
    }
}
