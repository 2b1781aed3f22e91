use crate::common::constants::MIGRATION_BATCH_SIZE;
use crate::errors::MinileafResult;
use crate::store::StorageEngine;

/// Streams every document from `source` into `destination` in fixed-size
/// batches, preserving ids and values. Useful for switching a collection
/// between engine kinds, e.g. outgrowing the WAL engine's all-in-RAM
/// working set.
pub fn migrate(
    source: &dyn StorageEngine,
    destination: &dyn StorageEngine,
) -> MinileafResult<u64> {
    migrate_batched(source, destination, MIGRATION_BATCH_SIZE)
}

pub fn migrate_batched(
    source: &dyn StorageEngine,
    destination: &dyn StorageEngine,
    batch_size: usize,
) -> MinileafResult<u64> {
    let batch_size = batch_size.max(1);
    let ids = source.ids()?;
    let mut moved = 0u64;
    for chunk in ids.chunks(batch_size) {
        for id in chunk {
            if let Some(document) = source.find_by_id(id)? {
                destination.upsert(id.clone(), document)?;
                moved += 1;
            }
        }
    }
    log::info!("Migrated {} documents", moved);
    Ok(moved)
}
