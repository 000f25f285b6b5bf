// Generation-guarded writes into a watch channel.
//
// Each background task is handed the generation current when it was
// spawned. Owners bump the generation (under the watch lock) when they
// stop or replace the task, so writes from a superseded task are rejected
// even if the task is still running on another worker thread.

use tokio::sync::watch;

pub(crate) trait Generational {
    fn generation(&self) -> u64;
}

/// Apply `update` only if `generation` is still current. Receivers are
/// notified when `update` returns `true`.
///
/// Returns `false` if the writer has been superseded.
pub(crate) fn publish_if_current<T, F>(tx: &watch::Sender<T>, generation: u64, update: F) -> bool
where
    T: Generational,
    F: FnOnce(&mut T) -> bool,
{
    let mut current = false;
    tx.send_if_modified(|value| {
        if value.generation() != generation {
            return false;
        }
        current = true;
        update(value)
    });
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        generation: u64,
        hits: u32,
    }

    impl Generational for Counter {
        fn generation(&self) -> u64 {
            self.generation
        }
    }

    #[test]
    fn stale_writer_is_rejected() {
        let (tx, rx) = watch::channel(Counter::default());
        assert!(publish_if_current(&tx, 0, |c| {
            c.hits += 1;
            true
        }));
        tx.send_modify(|c| c.generation += 1);
        assert!(!publish_if_current(&tx, 0, |c| {
            c.hits += 1;
            true
        }));
        assert_eq!(rx.borrow().hits, 1);
    }

    #[test]
    fn unchanged_update_does_not_notify() {
        let (tx, rx) = watch::channel(Counter::default());
        assert!(publish_if_current(&tx, 0, |_| false));
        assert!(!rx.has_changed().unwrap());
    }
}
