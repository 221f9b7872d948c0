use std::sync::atomic::{AtomicU64, Ordering};

use ipcemit_frame::{CorrelationId, MAX_CORRELATION_ID};

/// Process-wide allocator behind every emitter's calls.
static SEQUENCE: Sequence = Sequence::new();

/// Correlation id allocator.
///
/// Ids run 1, 2, ... up to [`MAX_CORRELATION_ID`] and then wrap back to 1.
/// Zero is never handed out.
#[derive(Debug, Default)]
pub struct Sequence {
    last: AtomicU64,
}

impl Sequence {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// The allocator shared by every [`IpcEmitter`](crate::IpcEmitter) in the
    /// process. ACK demultiplexers match replies by id alone, so two emitters
    /// on one endpoint must never hold the same id at once.
    pub fn global() -> &'static Sequence {
        &SEQUENCE
    }

    #[cfg(test)]
    pub(crate) const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next(&self) -> CorrelationId {
        let advance = |n: u64| n % MAX_CORRELATION_ID + 1;
        let previous = match self
            .last
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(advance(n)))
        {
            Ok(n) | Err(n) => n,
        };
        match CorrelationId::new(advance(previous)) {
            Some(id) => id,
            None => unreachable!("advance() always yields a value in 1..=MAX_CORRELATION_ID"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn starts_at_one_and_increments() {
        let seq = Sequence::new();
        assert_eq!(seq.next().get(), 1);
        assert_eq!(seq.next().get(), 2);
        assert_eq!(seq.next().get(), 3);
    }

    #[test]
    fn wraps_back_to_one() {
        let seq = Sequence::starting_after(MAX_CORRELATION_ID - 1);
        assert_eq!(seq.next().get(), MAX_CORRELATION_ID);
        assert_eq!(seq.next().get(), 1);
    }

    #[test]
    fn global_sequence_is_one_instance() {
        assert!(std::ptr::eq(Sequence::global(), Sequence::global()));
        let first = Sequence::global().next().get();
        let second = Sequence::global().next().get();
        assert!(second > first);
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let seq = Arc::new(Sequence::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || (0..1000).map(|_| seq.next().get()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 4000);
    }
}
