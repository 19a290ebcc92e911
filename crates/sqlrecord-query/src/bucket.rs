//! Grouping related records by owner key.
//!
//! A relation query returns the related records for every owner at once.
//! [`build_buckets`] groups them under the [`ModelKey`] each owner will
//! look up. For via relations the keys go through a [`ViaMap`] that
//! translates between the related records' keyspace and the owners'.

use indexmap::{IndexMap, IndexSet};
use sqlrecord_core::ModelKey;

use crate::query::IndexBy;
use crate::record::{Record, UniqueRecords};

/// Owner key -> related records.
pub type Buckets = IndexMap<ModelKey, Vec<Record>>;

/// Owner key -> related records keyed by `index_by`.
pub type IndexedBuckets = IndexMap<ModelKey, IndexMap<String, Record>>;

/// Key under the current link -> keys under the owners' link.
pub type ViaMap = IndexMap<ModelKey, IndexSet<ModelKey>>;

/// The rows of a via step and how they link.
#[derive(Debug, Clone, Copy)]
pub struct ViaInfo<'a> {
    /// Link of the via step (via column -> owner property)
    pub link: &'a IndexMap<String, String>,
    /// Records the via step returned
    pub rows: &'a [Record],
    /// Map returned by the via step's own via, for multi-hop chains
    pub nested: Option<&'a ViaMap>,
}

/// Group `related` by owner key.
///
/// Without a via step each record is keyed by its values under the
/// link's related-side columns; an array-valued column puts it in one
/// bucket per element. With a via step the keys are translated through
/// the via rows, and the translation map is returned for the caller to
/// thread into the next level.
pub fn build_buckets(
    link: &IndexMap<String, String>,
    related: &[Record],
    via: Option<ViaInfo<'_>>,
) -> (Buckets, Option<ViaMap>) {
    let related_columns: Vec<&String> = link.keys().collect();
    let mut buckets = Buckets::new();

    let Some(via) = via else {
        for record in related {
            // an array value may repeat an element
            let keys: IndexSet<ModelKey> = record.keys(&related_columns).into_iter().collect();
            for key in keys {
                buckets.entry(key).or_default().push(record.clone());
            }
        }
        return (buckets, None);
    };

    let owner_properties: Vec<&String> = link.values().collect();
    let via_columns: Vec<&String> = via.link.keys().collect();
    let mut map = ViaMap::new();
    for row in via.rows {
        let owner_keys = row.keys(&via_columns);
        if owner_keys.is_empty() {
            continue;
        }
        for key in row.keys(&owner_properties) {
            map.entry(key)
                .or_default()
                .extend(owner_keys.iter().cloned());
        }
    }
    if let Some(nested) = via.nested {
        map = map_via(&map, nested);
    }

    let mut unique: IndexMap<ModelKey, UniqueRecords> = IndexMap::new();
    for record in related {
        for key in record.keys(&related_columns) {
            let Some(owner_keys) = map.get(&key) else {
                continue;
            };
            for owner_key in owner_keys {
                unique.entry(owner_key.clone()).or_default().push(record);
            }
        }
    }
    buckets.extend(unique.into_iter().map(|(key, records)| (key, records.into_vec())));
    (buckets, Some(map))
}

/// Compose `map` with the map of the next via level.
///
/// Every key of `map` ends up mapped to the union of what its targets map
/// to in `nested`; keys whose targets are all unknown are dropped.
pub fn map_via(map: &ViaMap, nested: &ViaMap) -> ViaMap {
    let mut result = ViaMap::new();
    for (key, targets) in map {
        let composed: IndexSet<ModelKey> = targets
            .iter()
            .filter_map(|target| nested.get(target))
            .flatten()
            .cloned()
            .collect();
        if !composed.is_empty() {
            result.insert(key.clone(), composed);
        }
    }
    result
}

/// Re-key each bucket by `index_by`.
pub fn index_buckets(buckets: Buckets, index_by: &IndexBy) -> IndexedBuckets {
    buckets
        .into_iter()
        .map(|(key, records)| (key, index_records(&records, index_by)))
        .collect()
}

/// Key records by `index_by`; later records win on collisions.
pub fn index_records(records: &[Record], index_by: &IndexBy) -> IndexMap<String, Record> {
    records
        .iter()
        .map(|record| (index_by.key_for(record), record.clone()))
        .collect()
}
