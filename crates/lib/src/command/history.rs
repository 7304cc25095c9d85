//! Bounded command history: keep only the most recent [`MAX_RECORDS`] runs.

use crate::store::HistoryStore;

/// History size kept after every insert.
pub const MAX_RECORDS: usize = 200;

/// Delete the oldest records until at most `max` remain. Deletion is per record and best-effort:
/// a failed delete is logged and pruning continues. Returns the number of records removed.
pub async fn prune(store: &dyn HistoryStore, max: usize) -> usize {
    let all = match store.all().await {
        Ok(all) => all,
        Err(e) => {
            log::warn!("reading command history for pruning failed: {}", e);
            return 0;
        }
    };
    if all.len() <= max {
        return 0;
    }
    let excess = all.len() - max;
    let mut removed = 0;
    for entry in all.iter().take(excess) {
        match store.delete(&entry.id).await {
            Ok(()) => removed += 1,
            Err(e) => log::warn!("deleting command history record {} failed: {}", entry.id, e),
        }
    }
    log::debug!("pruned {} of {} excess command history record(s)", removed, excess);
    removed
}
