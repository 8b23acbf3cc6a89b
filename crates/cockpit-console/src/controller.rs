use crossbeam_channel::{Receiver, Sender};

use crate::audio::AnalyserRegistry;
use crate::backend::Backends;
use crate::runtime::AudioRuntime;
use crate::store::{Source, Store};

/// A change of the selected source seen by the store watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceChange {
    pub from: Source,
    pub to: Source,
    pub generation: u64,
}

/// What one stop phase did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchReport {
    pub target: Option<Source>,
    pub stopped: Vec<Source>,
    pub failed: Vec<(Source, String)>,
}

/// Stops every backend but the selected one whenever the source changes.
///
/// Clearing the analyser registry happens inside the store watcher, in the
/// same call that changed the source. Stopping backends needs the backends,
/// which live on the console thread, so the watcher only queues the change
/// and [`SourceController::process`] runs the stop phase. It never starts
/// the new source.
pub struct SourceController {
    changes: Receiver<SourceChange>,
}

impl SourceController {
    pub fn install(store: &Store, registry: &AnalyserRegistry) -> Self {
        let (tx, rx): (Sender<SourceChange>, Receiver<SourceChange>) =
            crossbeam_channel::unbounded();
        let registry = registry.clone();
        store.subscribe(move |prev, next| {
            if prev.player.source == next.player.source {
                return;
            }
            registry.clear();
            let change = SourceChange {
                from: prev.player.source,
                to: next.player.source,
                generation: next.generation,
            };
            log::debug!("Source change queued: {} -> {}", change.from, change.to);
            let _ = tx.send(change);
        });
        Self { changes: rx }
    }

    pub fn has_pending(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Run the stop phase for all queued changes at once. Overlapping
    /// switches collapse into one pass against the currently selected
    /// source, so the last selection wins.
    pub fn process(&self, backends: &mut Backends, rt: &AudioRuntime) -> Option<SwitchReport> {
        let mut queued = self.changes.try_iter();
        let first = queued.next()?;
        let last = queued.last().unwrap_or(first);
        let to = rt.store.source();
        if last.to != to {
            log::debug!("Queued target {} superseded by {to}", last.to);
        }
        log::info!("Switching source {} -> {to}", first.from);
        Some(self.on_source_change(backends, rt, to))
    }

    /// Clear the registry, stop every other backend, then reset `playing`.
    /// A failing stop is logged and does not keep the others from stopping.
    pub fn on_source_change(
        &self,
        backends: &mut Backends,
        rt: &AudioRuntime,
        to: Source,
    ) -> SwitchReport {
        rt.registry.clear();

        let mut report = SwitchReport {
            target: Some(to),
            ..Default::default()
        };
        for source in Source::ALL {
            if source == to {
                continue;
            }
            match backends.stop(source, rt) {
                Ok(()) => report.stopped.push(source),
                Err(e) => {
                    log::warn!("Stopping {source} failed: {e}");
                    report.failed.push((source, e.to_string()));
                }
            }
        }

        rt.store.set_play_state(false);
        // The new source publishes its own track once it confirms a start
        rt.store.set_track(None);
        report
    }
}
