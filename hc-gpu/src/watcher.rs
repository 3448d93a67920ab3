//! Corrective watcher for the GPU clock files
//!
//! Other tools (and the firmware, on some resume paths) rewrite the overdrive
//! table or force the performance level. The watcher listens for modify events
//! on those files, waits for them to settle, then asks the controller to
//! reconcile.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::controller::Shared;
use crate::Result;
use hc_error::HcError;

enum WatchMsg {
    Changed(PathBuf),
    Stop,
}

/// Per-path trailing-edge debounce
#[derive(Debug)]
pub(crate) struct Debouncer {
    delay: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub(crate) fn new(delay: Duration) -> Self {
        Self { delay, pending: HashMap::new() }
    }

    /// Record an event; a later event for the same path pushes its deadline out
    pub(crate) fn arm(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.delay);
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return every path whose deadline has passed
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.pending.remove(path);
        }
        due
    }
}

/// Running file watcher. Dropping it stops the thread.
pub(crate) struct CorrectiveWatcher {
    _watcher: RecommendedWatcher,
    tx: Sender<WatchMsg>,
    handle: Option<JoinHandle<()>>,
}

impl CorrectiveWatcher {
    pub(crate) fn spawn(shared: Arc<Shared>, paths: Vec<PathBuf>, delay: Duration) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let event_tx = tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        for path in event.paths {
                            let _ = event_tx.send(WatchMsg::Changed(path));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "GPU file watch error"),
            },
            Config::default(),
        )
        .map_err(|e| HcError::Watch(e.to_string()))?;

        let mut watched = 0usize;
        for path in &paths {
            match watcher.watch(path, RecursiveMode::NonRecursive) {
                Ok(()) => watched += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Cannot watch GPU clock file"),
            }
        }
        if watched == 0 {
            return Err(HcError::Watch("no GPU clock file could be watched".into()));
        }

        let handle = thread::Builder::new()
            .name("gpu-watcher".into())
            .spawn(move || run_watch_loop(shared, rx, delay))?;

        info!(files = watched, "GPU corrective watcher started");
        Ok(Self { _watcher: watcher, tx, handle: Some(handle) })
    }
}

impl Drop for CorrectiveWatcher {
    fn drop(&mut self) {
        let _ = self.tx.send(WatchMsg::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("GPU watcher thread panicked");
            }
        }
    }
}

fn run_watch_loop(shared: Arc<Shared>, rx: Receiver<WatchMsg>, delay: Duration) {
    let mut debouncer = Debouncer::new(delay);

    loop {
        let msg = match debouncer.next_deadline() {
            Some(deadline) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                rx.recv_timeout(wait)
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match msg {
            Ok(WatchMsg::Changed(path)) => {
                debug!(path = %path.display(), "GPU clock file modified");
                debouncer.arm(path, Instant::now());
            }
            Ok(WatchMsg::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if !debouncer.take_due(Instant::now()).is_empty() {
            if let Err(e) = shared.reconcile() {
                warn!(error = %e, "Corrective reconcile failed");
            }
        }
    }
    debug!("GPU watcher loop stopped");
}
