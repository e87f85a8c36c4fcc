//! Page-level aggregates: distributions, filter options, leaderboards over a
//! date window, growth leaders, and benchmark normalisation.

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize;

use crate::record::{TypedRecord, Value};

/// Number of records per distinct value of `field`, in first-seen order.
pub fn count_by<'a>(
    records: impl IntoIterator<Item = &'a TypedRecord>,
    field: &str,
) -> IndexMap<String, usize> {
    let mut counts = IndexMap::new();
    for record in records {
        *counts.entry(record.text(field)).or_insert(0) += 1;
    }
    counts
}

/// Distinct non-empty values of `field`, minus `exclude`, sorted case-insensitively.
pub fn distinct_values<'a>(
    records: impl IntoIterator<Item = &'a TypedRecord>,
    field: &str,
    exclude: &[&str],
) -> Vec<String> {
    records
        .into_iter()
        .map(|record| record.text(field))
        .filter(|value| !value.is_empty() && !exclude.contains(&value.as_str()))
        .unique()
        .sorted_by(|a, b| a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedValue {
    pub key: String,
    pub value: f64,
}

/// Mean of `value_field` per key over records dated on or after `since`,
/// highest first. Equal means keep first-seen key order.
pub fn window_average<'a>(
    records: impl IntoIterator<Item = &'a TypedRecord>,
    key_field: &str,
    date_field: &str,
    value_field: &str,
    since: &str,
) -> Vec<KeyedValue> {
    let mut sums: IndexMap<String, (f64, usize)> = IndexMap::new();
    for record in records {
        if record.text(date_field).as_str() < since {
            continue;
        }
        let entry = sums.entry(record.text(key_field)).or_insert((0.0, 0));
        entry.0 += record.number(value_field);
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(key, (total, count))| KeyedValue {
            key,
            value: total / count as f64,
        })
        .sorted_by(|a, b| b.value.total_cmp(&a.value))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Growth {
    pub key: String,
    pub first: f64,
    pub last: f64,
    /// Percentage change from `first` to `last`.
    pub percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GrowthLeaders {
    pub rising: Option<Growth>,
    pub falling: Option<Growth>,
}

/// Compare each key's value at period `from` with its value at period `to`.
/// Keys missing either endpoint, or with a zero endpoint, are skipped. The
/// largest rise and the largest fall win; ties keep the first-seen key.
pub fn growth_leaders<'a>(
    records: impl IntoIterator<Item = &'a TypedRecord>,
    key_field: &str,
    date_field: &str,
    value_field: &str,
    from: &str,
    to: &str,
) -> GrowthLeaders {
    let mut endpoints: IndexMap<String, (Option<f64>, Option<f64>)> = IndexMap::new();
    for record in records {
        let date = record.text(date_field);
        let slot = endpoints.entry(record.text(key_field)).or_default();
        if date == from {
            slot.0 = Some(record.number(value_field));
        }
        if date == to {
            slot.1 = Some(record.number(value_field));
        }
    }

    let mut leaders = GrowthLeaders::default();
    for (key, pair) in endpoints {
        let (Some(first), Some(last)) = pair else {
            continue;
        };
        if first == 0.0 || last == 0.0 || first == last {
            continue;
        }
        let growth = Growth {
            percent: (last - first) / first * 100.0,
            key,
            first,
            last,
        };
        let slot = if last > first {
            &mut leaders.rising
        } else {
            &mut leaders.falling
        };
        let better = slot
            .as_ref()
            .is_none_or(|best| growth.percent.abs() > best.percent.abs());
        if better {
            *slot = Some(growth);
        }
    }
    leaders
}

/// Maps each value of `source` through `table` into a derived `target`
/// column. Values missing from the table get `fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Categorizer {
    pub source: String,
    pub target: String,
    pub table: IndexMap<String, String>,
    pub fallback: String,
}

impl Categorizer {
    pub fn categorize(&self, record: &TypedRecord) -> String {
        self.table
            .get(&record.text(&self.source))
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn apply(&self, record: &mut TypedRecord) {
        let category = self.categorize(record);
        record.insert(self.target.clone(), Value::Tag(category));
    }
}

/// Scale `value` to a 0-100 score against `benchmark`, capped at 100.
pub fn normalize(value: f64, benchmark: f64) -> f64 {
    if benchmark <= 0.0 {
        return 0.0;
    }
    (value / benchmark * 100.0).min(100.0)
}

/// Normalise each benchmarked field of `record`.
pub fn profile(record: &TypedRecord, benchmarks: &IndexMap<String, f64>) -> IndexMap<String, f64> {
    benchmarks
        .iter()
        .map(|(field, benchmark)| (field.clone(), normalize(record.number(field), *benchmark)))
        .collect()
}
