use std::sync::{Arc, Mutex, PoisonError};

use super::analyser::AnalyserHandle;

/// Single-slot pointer to the analyser the visual layer should read.
///
/// Written by backends (set on confirmed start, cleared on stop) and by the
/// source controller (cleared on every switch). Read once per frame.
#[derive(Clone, Default)]
pub struct AnalyserRegistry {
    active: Arc<Mutex<Option<Arc<AnalyserHandle>>>>,
}

impl AnalyserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active analyser. Last writer wins.
    pub fn set_active(&self, handle: Option<Arc<AnalyserHandle>>) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = handle;
    }

    pub fn clear(&self) {
        self.set_active(None);
    }

    /// Clear only if `handle` is the one currently active.
    pub fn clear_if(&self, handle: &Arc<AnalyserHandle>) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, handle)) {
            *active = None;
            true
        } else {
            false
        }
    }

    pub fn get_active(&self) -> Option<Arc<AnalyserHandle>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Tap rate of the active analyser.
    pub fn sample_rate(&self) -> Option<u32> {
        self.get_active().map(|h| h.sample_rate())
    }

    /// Fill `buf` from the active analyser. Returns `false` and leaves `buf`
    /// untouched when nothing is active.
    pub fn sample_frequencies(&self, buf: &mut [u8]) -> bool {
        match self.get_active() {
            Some(handle) => {
                handle.sample_frequencies(buf);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::analyser::AnalyserOptions;

    fn handle() -> Arc<AnalyserHandle> {
        Arc::new(AnalyserHandle::new(AnalyserOptions {
            fft_size: 64,
            ..Default::default()
        }))
    }

    #[test]
    fn empty_registry_leaves_buffer_untouched() {
        let reg = AnalyserRegistry::new();
        let mut buf = [42u8; 16];
        assert!(!reg.sample_frequencies(&mut buf));
        assert!(buf.iter().all(|&b| b == 42));
    }

    #[test]
    fn active_registry_writes_whole_buffer() {
        let reg = AnalyserRegistry::new();
        reg.set_active(Some(handle()));
        let mut buf = [42u8; 48];
        assert!(reg.sample_frequencies(&mut buf));
        // Silence and padding both come out as 0
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn last_writer_wins() {
        let reg = AnalyserRegistry::new();
        let a = handle();
        let b = handle();
        reg.set_active(Some(a.clone()));
        reg.set_active(Some(b.clone()));
        assert_eq!(reg.get_active().unwrap().id(), b.id());
    }

    #[test]
    fn clear_if_only_clears_matching_handle() {
        let reg = AnalyserRegistry::new();
        let a = handle();
        let b = handle();
        reg.set_active(Some(a.clone()));
        assert!(!reg.clear_if(&b));
        assert!(reg.is_active());
        assert!(reg.clear_if(&a));
        assert!(reg.get_active().is_none());
    }

    #[test]
    fn clones_share_the_slot() {
        let reg = AnalyserRegistry::new();
        let view = reg.clone();
        reg.set_active(Some(handle()));
        assert!(view.is_active());
        view.clear();
        assert!(!reg.is_active());
    }

    #[test]
    fn sample_rate_follows_active_handle() {
        let reg = AnalyserRegistry::new();
        assert_eq!(reg.sample_rate(), None);
        let h = handle();
        h.set_sample_rate(22050);
        reg.set_active(Some(h));
        assert_eq!(reg.sample_rate(), Some(22050));
    }
}
