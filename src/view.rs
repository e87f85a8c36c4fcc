//! Ranked, filtered, paginated views over typed records.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{self, TypedRecord};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Page index must be at least 1")]
    ZeroPageIndex,
    #[error("Page size must be positive")]
    ZeroPageSize,
    #[error("Invalid sort order: {0}")]
    InvalidSortOrder(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn flip(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

impl FromStr for SortOrder {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(Error::InvalidSortOrder(other.to_owned())),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Desc)
    }

    /// Comparator with the direction applied. Reversing the comparator rather
    /// than the sorted output keeps ties in input order for both directions.
    pub fn compare(&self, a: &TypedRecord, b: &TypedRecord) -> Ordering {
        let ordering = record::compare(a.get(&self.field), b.get(&self.field));
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/// A predicate over typed records.
pub trait RecordFilter {
    fn matches(&self, record: &TypedRecord) -> bool;
}

impl<F> RecordFilter for F
where
    F: Fn(&TypedRecord) -> bool,
{
    fn matches(&self, record: &TypedRecord) -> bool {
        self(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Exact match; numeric fields compare by value.
    Equals { field: String, value: String },
    /// Case-insensitive substring match.
    Contains { field: String, needle: String },
    All(Vec<Filter>),
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Filter::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }
}

impl RecordFilter for Filter {
    fn matches(&self, record: &TypedRecord) -> bool {
        match self {
            Filter::Equals { field, value } => match record.get(field) {
                Some(cell) => cell.matches_text(value),
                None => value.is_empty(),
            },
            Filter::Contains { field, needle } => record
                .text(field)
                .to_lowercase()
                .contains(needle.trim().to_lowercase().as_str()),
            Filter::All(filters) => filters.iter().all(|filter| filter.matches(record)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    index: usize,
    size: usize,
}

impl PageRequest {
    pub const DEFAULT: PageRequest = PageRequest { index: 1, size: 10 };

    /// `index` is 1-based.
    pub fn new(index: usize, size: usize) -> Result<Self, Error> {
        if index == 0 {
            return Err(Error::ZeroPageIndex);
        }
        if size == 0 {
            return Err(Error::ZeroPageSize);
        }
        Ok(Self { index, size })
    }

    pub fn first(size: usize) -> Result<Self, Error> {
        Self::new(1, size)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn next(self) -> Self {
        Self {
            index: self.index.saturating_add(1),
            ..self
        }
    }

    pub fn previous(self) -> Option<Self> {
        (self.index > 1).then(|| Self {
            index: self.index - 1,
            ..self
        })
    }

    pub fn rewind(self) -> Self {
        Self { index: 1, ..self }
    }

    fn bounds(&self, len: usize) -> (usize, usize) {
        let start = (self.index - 1).saturating_mul(self.size).min(len);
        let end = start.saturating_add(self.size).min(len);
        (start, end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewModel {
    pub records: Vec<TypedRecord>,
    pub total_matching_count: usize,
    pub page_index: usize,
    pub page_size: usize,
}

impl ViewModel {
    pub fn page_count(&self) -> usize {
        self.total_matching_count.div_ceil(self.page_size)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Filter, stably sort, and slice one page out of `records`.
///
/// A page past the end is empty rather than an error; `total_matching_count`
/// always counts the whole filtered sequence.
pub fn build_view(
    records: &[TypedRecord],
    sort: Option<&SortSpec>,
    filter: Option<&dyn RecordFilter>,
    page: PageRequest,
) -> ViewModel {
    let mut filtered: Vec<&TypedRecord> = match filter {
        Some(filter) => records.iter().filter(|r| filter.matches(r)).collect(),
        None => records.iter().collect(),
    };
    if let Some(sort) = sort {
        filtered.sort_by(|a, b| sort.compare(a, b));
    }
    let total_matching_count = filtered.len();
    let (start, end) = page.bounds(total_matching_count);
    debug!(
        sort = sort.map(|s| s.field.as_str()),
        total = records.len(),
        matching = total_matching_count,
        page = page.index,
        "view built"
    );
    ViewModel {
        records: filtered[start..end].iter().map(|r| (*r).clone()).collect(),
        total_matching_count,
        page_index: page.index,
        page_size: page.size,
    }
}

/// Leaderboard: the first `n` records by `field`, descending.
pub fn top_n(
    records: &[TypedRecord],
    field: &str,
    n: usize,
    filter: Option<&dyn RecordFilter>,
) -> Result<ViewModel, Error> {
    Ok(build_view(
        records,
        Some(&SortSpec::desc(field)),
        filter,
        PageRequest::first(n)?,
    ))
}
