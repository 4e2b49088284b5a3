use std::sync::Mutex;

use tracing::debug;

use crate::{CoreError, CoreResult};

/// 2024-01-01T00:00:00Z
pub const EPOCH_MILLIS: i64 = 1_704_067_200_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const NODE_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + NODE_BITS;

pub const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

/// Process-wide 64-bit id generator: 41 bits of milliseconds since
/// [`EPOCH_MILLIS`], 10 bits of node id, 12 bits of per-millisecond sequence.
///
/// Ids are strictly increasing within a process. When the wall clock steps
/// backwards, or a millisecond's sequence is exhausted, the allocator keeps
/// counting on a logical clock instead of blocking.
pub struct IdAllocator {
    node_id: i64,
    state: Mutex<ClockState>,
}

struct ClockState {
    last_millis: i64,
    sequence: i64,
}

impl IdAllocator {
    pub fn new(node_id: u16) -> CoreResult<Self> {
        if node_id > MAX_NODE_ID {
            return Err(CoreError::InvalidArgument(format!(
                "node id must be between 0 and {}",
                MAX_NODE_ID
            )));
        }

        Ok(Self {
            node_id: i64::from(node_id),
            state: Mutex::new(ClockState {
                last_millis: -1,
                sequence: 0,
            }),
        })
    }

    pub fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        // The state is two integers; a panic elsewhere cannot leave it torn.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut millis = now.max(state.last_millis);
        if millis == state.last_millis {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                millis += 1;
            }
        } else {
            state.sequence = 0;
        }

        if millis > now {
            debug!("Id allocator running {} ms ahead of the wall clock", millis - now);
        }
        state.last_millis = millis;

        ((millis - EPOCH_MILLIS) << TIMESTAMP_SHIFT) | (self.node_id << NODE_SHIFT) | state.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn timestamp_millis(id: i64) -> i64 {
        (id >> TIMESTAMP_SHIFT) + EPOCH_MILLIS
    }

    fn node_of(id: i64) -> i64 {
        (id >> NODE_SHIFT) & i64::from(MAX_NODE_ID)
    }

    #[test]
    fn rejects_out_of_range_node() {
        assert!(IdAllocator::new(MAX_NODE_ID).is_ok());
        assert!(IdAllocator::new(MAX_NODE_ID + 1).is_err());
    }

    #[test]
    fn strictly_increasing_and_decodable() {
        let ids = IdAllocator::new(5).unwrap();
        let before = chrono::Utc::now().timestamp_millis();

        let mut last = 0;
        for _ in 0..20_000 {
            let id = ids.next_id();
            assert!(id > last);
            assert_eq!(node_of(id), 5);
            last = id;
        }

        assert!(timestamp_millis(last) >= before);
    }

    #[test]
    fn unique_across_threads() {
        let ids = Arc::new(IdAllocator::new(1).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..2_000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 16_000);
    }
}
