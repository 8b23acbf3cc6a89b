use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Receiver;

type Continuation = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct LatchInner {
    interacted: AtomicBool,
    waiting: Mutex<Vec<Continuation>>,
}

/// One-shot latch set by the first pointer/key interaction.
///
/// Work that needs a user-initiated audio context waits here. Pending
/// continuations run exactly once, on the call that latches; the latch is
/// never reset.
#[derive(Clone, Default)]
pub struct GestureLatch {
    inner: Arc<LatchInner>,
}

impl GestureLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_user_gestured(&self) -> bool {
        self.inner.interacted.load(Ordering::Acquire)
    }

    /// Record an interaction. Returns `true` only for the call that latched.
    pub fn mark_interacted(&self) -> bool {
        let pending = {
            let mut waiting = self
                .inner
                .waiting
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if self.inner.interacted.swap(true, Ordering::AcqRel) {
                return false;
            }
            std::mem::take(&mut *waiting)
        };
        log::info!("First user gesture, flushing {} pending action(s)", pending.len());
        for f in pending {
            f();
        }
        true
    }

    /// Run `f` after the first gesture, or right away if it already happened.
    pub fn on_first_gesture<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut waiting = self
                .inner
                .waiting
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.inner.interacted.load(Ordering::Acquire) {
                waiting.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Channel that yields once the gate has latched.
    pub fn wait_for_first_gesture(&self) -> Receiver<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.on_first_gesture(move || {
            let _ = tx.try_send(());
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_unlatched() {
        let latch = GestureLatch::new();
        assert!(!latch.has_user_gestured());
    }

    #[test]
    fn latches_once() {
        let latch = GestureLatch::new();
        assert!(latch.mark_interacted());
        assert!(!latch.mark_interacted());
        assert!(latch.has_user_gestured());
    }

    #[test]
    fn pending_continuations_run_exactly_once() {
        let latch = GestureLatch::new();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            latch.on_first_gesture(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
        latch.mark_interacted();
        assert_eq!(count.load(Ordering::SeqCst), 3);
        latch.mark_interacted();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn late_continuation_runs_immediately() {
        let latch = GestureLatch::new();
        latch.mark_interacted();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        latch.on_first_gesture(move || r.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_resolves_after_gesture() {
        let latch = GestureLatch::new();
        let rx = latch.wait_for_first_gesture();
        assert!(rx.try_recv().is_err());
        latch.clone().mark_interacted();
        assert!(rx.try_recv().is_ok());
        // Already latched: resolves immediately
        assert!(latch.wait_for_first_gesture().try_recv().is_ok());
    }
}
