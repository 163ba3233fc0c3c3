//! Generation of optimistic-concurrency tokens.
//!
//! A `tx_id` is a time-ordered UUID (version 7). The shared [`ContextV7`]
//! keeps ids drawn within the same millisecond strictly increasing, which
//! the CAS protocol relies on: per document, the sequence of successful
//! writes is linearized by `tx_id`.

use std::sync::{Mutex, OnceLock};

use uuid::timestamp::context::ContextV7;
use uuid::timestamp::{ClockSequence, Timestamp};
use uuid::Uuid;

/// `ContextV7` is not `Sync` (it uses unsynchronized `Cell`s internally), so
/// it must be guarded to be shared across threads as a static.
struct SyncContextV7(Mutex<ContextV7>);

impl ClockSequence for SyncContextV7 {
    type Output = u64;

    fn generate_sequence(&self, seconds: u64, subsec_nanos: u32) -> Self::Output {
        self.0.lock().unwrap().generate_sequence(seconds, subsec_nanos)
    }

    fn generate_timestamp_sequence(
        &self,
        seconds: u64,
        subsec_nanos: u32,
    ) -> (Self::Output, u64, u32) {
        self.0
            .lock()
            .unwrap()
            .generate_timestamp_sequence(seconds, subsec_nanos)
    }
}

fn context() -> &'static SyncContextV7 {
    static CONTEXT: OnceLock<SyncContextV7> = OnceLock::new();
    CONTEXT.get_or_init(|| SyncContextV7(Mutex::new(ContextV7::new())))
}

/// Draw the next `tx_id`. Strictly increasing within the process.
#[must_use]
pub fn next_tx_id() -> Uuid {
    Uuid::new_v7(Timestamp::now(context()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_strictly_increase() {
        let mut previous = next_tx_id();
        for _ in 0..1000 {
            let id = next_tx_id();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn ids_are_version_7() {
        assert_eq!(next_tx_id().get_version_num(), 7);
    }
}
