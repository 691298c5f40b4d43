//! Duplicate detection for the maintenance pass.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Given `(id, fingerprint)` rows in scan order, return the ids of every row
/// whose fingerprint was already seen earlier in the scan.
///
/// The first row per fingerprint survives, so callers must scan in ascending
/// id order for the earliest insert to be the one kept.
pub fn duplicate_ids<I>(rows: I) -> Vec<i64>
where
    I: IntoIterator<Item = (i64, String)>,
{
    let mut first_seen: HashMap<String, i64> = HashMap::new();
    let mut doomed = Vec::new();

    for (id, fingerprint) in rows {
        match first_seen.entry(fingerprint) {
            Entry::Occupied(_) => doomed.push(id),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }
    }

    doomed
}
