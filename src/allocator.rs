//! Task id allocation

use crate::lease::LeaseTable;
use crate::queue::QueueStore;
use crate::task::TaskId;

/// Next id for a task admitted to `queue`.
///
/// `0` when the queue holds nothing, pending or leased; otherwise one past
/// the largest id alive in either structure. Both stores must be read under
/// the same lock that guards the subsequent append.
pub fn allocate_id(queues: &QueueStore, leases: &LeaseTable, queue: &str) -> TaskId {
    match queues.max_id(queue).max(leases.max_id(queue)) {
        Some(max) => max + 1,
        None => 0,
    }
}
