//! Collapse a time series of records to the latest record per group key.

use indexmap::IndexMap;

use crate::record::TypedRecord;

/// Keep one record per distinct `key_field` value: the one with the greatest
/// `date_field`, compared as strings. A later record replaces the current
/// best only when its date is strictly greater, so among records sharing the
/// maximal date the first one encountered wins.
///
/// The result is ordered by first appearance of each key.
pub fn reduce_latest<'a>(
    records: impl IntoIterator<Item = &'a TypedRecord>,
    key_field: &str,
    date_field: &str,
) -> IndexMap<String, &'a TypedRecord> {
    let mut latest: IndexMap<String, &'a TypedRecord> = IndexMap::new();
    for record in records {
        let key = record.text(key_field);
        match latest.get_mut(&key) {
            Some(best) => {
                if record.text(date_field) > best.text(date_field) {
                    *best = record;
                }
            }
            None => {
                latest.insert(key, record);
            }
        }
    }
    latest
}
