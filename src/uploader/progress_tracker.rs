use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use super::payload::UploadOutcome;

pub type ProgressCallback = Box<dyn FnMut(f32) + Send>;
pub type CompletionCallback = Box<dyn FnOnce(UploadOutcome) + Send>;

/// Fraction of `total` covered by `sent`, clamped to [0, 1]. An empty body is complete.
pub fn progress_fraction(sent: u64, total: u64) -> f32 {
    if total == 0 {
        return 1.0;
    }
    (sent as f64 / total as f64).clamp(0.0, 1.0) as f32
}

struct GateState {
    on_complete: Option<CompletionCallback>,
    last_fraction: Option<f32>,
    progress_thread: Option<ThreadId>,
}

/// Caller callbacks for one upload.
///
/// Progress is forwarded only while the outcome is still pending and only when it
/// does not go backwards. The outcome is delivered at most once; delivering it drops
/// the progress callback, so no progress can follow it.
///
/// No lock on the outcome slot is held while caller code runs, so callbacks may
/// cancel their own upload. An outcome delivered from another thread waits for an
/// in-flight progress callback to return first.
#[derive(Clone)]
pub struct UploadCallbacks {
    state: Arc<Mutex<GateState>>,
    on_progress: Arc<Mutex<Option<ProgressCallback>>>,
    upload_id: u64,
}

impl UploadCallbacks {
    pub fn new<P, C>(upload_id: u64, on_progress: P, on_complete: C) -> Self
    where
        P: FnMut(f32) + Send + 'static,
        C: FnOnce(UploadOutcome) + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(GateState {
                on_complete: Some(Box::new(on_complete)),
                last_fraction: None,
                progress_thread: None,
            })),
            on_progress: Arc::new(Mutex::new(Some(Box::new(on_progress)))),
            upload_id,
        }
    }

    pub fn upload_id(&self) -> u64 {
        self.upload_id
    }

    fn lock_state(&self, operation: &str) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e: PoisonError<_>| {
            log::error!(
                "Callback lock poisoned during {} for upload {}; recovering",
                operation,
                self.upload_id
            );
            e.into_inner()
        })
    }

    fn lock_progress(&self) -> MutexGuard<'_, Option<ProgressCallback>> {
        self.on_progress.lock().unwrap_or_else(|e: PoisonError<_>| {
            log::error!(
                "Progress callback panicked for upload {}; recovering",
                self.upload_id
            );
            e.into_inner()
        })
    }

    pub fn report_bytes(&self, sent: u64, total: u64) {
        self.report_fraction(progress_fraction(sent, total));
    }

    pub fn report_fraction(&self, fraction: f32) {
        if fraction.is_nan() {
            return;
        }
        let fraction = fraction.clamp(0.0, 1.0);

        // Lock order: progress slot, then state
        let mut on_progress = self.lock_progress();
        {
            let mut state = self.lock_state("progress update");
            if state.on_complete.is_none() {
                log::debug!("Ignoring progress for finished upload {}", self.upload_id);
                return;
            }
            if state.last_fraction.is_some_and(|last| fraction <= last) {
                return;
            }
            state.last_fraction = Some(fraction);
            state.progress_thread = Some(thread::current().id());
        }

        if let Some(callback) = on_progress.as_mut() {
            callback(fraction);
        }

        let finished = {
            let mut state = self.lock_state("progress update");
            state.progress_thread = None;
            state.on_complete.is_none()
        };
        if finished {
            let callback = on_progress.take();
            drop(on_progress);
            drop(callback);
        }
    }

    /// Deliver the outcome. Returns false if one was already delivered.
    pub fn complete(&self, outcome: UploadOutcome) -> bool {
        let (on_complete, inside_progress) = {
            let mut state = self.lock_state("completion");
            let inside_progress = state.progress_thread == Some(thread::current().id());
            (state.on_complete.take(), inside_progress)
        };

        let Some(on_complete) = on_complete else {
            log::debug!(
                "Dropping late outcome for upload {}: {:?}",
                self.upload_id,
                outcome
            );
            return false;
        };

        // Called from the progress callback: the slot is cleared once it returns
        if !inside_progress {
            let on_progress = self.lock_progress().take();
            drop(on_progress);
        }

        on_complete(outcome);
        true
    }

    pub fn is_complete(&self) -> bool {
        self.lock_state("completion check").on_complete.is_none()
    }

    pub fn sink(&self) -> ProgressSink {
        let callbacks = self.clone();
        ProgressSink::new(move |sent, total| callbacks.report_bytes(sent, total))
    }
}

/// Byte counter handed to a transport while it streams the request body.
#[derive(Clone)]
pub struct ProgressSink {
    report: Arc<dyn Fn(u64, u64) + Send + Sync>,
}

impl ProgressSink {
    pub fn new<F>(report: F) -> Self
    where
        F: Fn(u64, u64) + Send + Sync + 'static,
    {
        Self {
            report: Arc::new(report),
        }
    }

    pub fn bytes_sent(&self, sent: u64, total: u64) {
        (self.report)(sent, total);
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;

    type Recorded = Arc<Mutex<Vec<String>>>;

    fn recording_callbacks() -> (UploadCallbacks, Recorded) {
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let progress_events = events.clone();
        let complete_events = events.clone();

        let callbacks = UploadCallbacks::new(
            1,
            move |fraction| progress_events.lock().unwrap().push(format!("p{:.2}", fraction)),
            move |outcome: UploadOutcome| {
                let label = match outcome {
                    UploadOutcome::Success(ids) => format!("ok:{}", ids.join(",")),
                    UploadOutcome::Failure(e) => format!("err:{}", e),
                };
                complete_events.lock().unwrap().push(label);
            },
        );
        (callbacks, events)
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(progress_fraction(0, 100), 0.0);
        assert_eq!(progress_fraction(50, 100), 0.5);
        assert_eq!(progress_fraction(150, 100), 1.0);
        assert_eq!(progress_fraction(0, 0), 1.0);
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let (callbacks, events) = recording_callbacks();

        callbacks.report_fraction(0.25);
        callbacks.report_fraction(0.10);
        callbacks.report_fraction(0.25);
        callbacks.report_fraction(f32::NAN);
        callbacks.report_fraction(2.0);
        callbacks.report_bytes(10, 10);

        assert_eq!(*events.lock().unwrap(), vec!["p0.25", "p1.00"]);
    }

    #[test]
    fn test_outcome_delivered_once_and_stops_progress() {
        let (callbacks, events) = recording_callbacks();

        callbacks.report_fraction(0.5);
        assert!(!callbacks.is_complete());
        assert!(callbacks.complete(UploadOutcome::Success(vec!["abc123".to_string()])));
        assert!(callbacks.is_complete());

        callbacks.report_fraction(0.9);
        assert!(!callbacks.complete(UploadOutcome::Failure(AppError::UploadCancelled)));

        assert_eq!(*events.lock().unwrap(), vec!["p0.50", "ok:abc123"]);
    }

    #[test]
    fn test_sink_forwards_bytes() {
        let (callbacks, events) = recording_callbacks();
        let sink = callbacks.sink();

        sink.bytes_sent(1, 4);
        sink.bytes_sent(4, 4);

        assert_eq!(*events.lock().unwrap(), vec!["p0.25", "p1.00"]);
    }

    #[test]
    fn test_outcome_from_inside_progress_callback() {
        let events: Recorded = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<UploadCallbacks>>> = Arc::new(Mutex::new(None));

        let progress_events = events.clone();
        let progress_slot = slot.clone();
        let complete_events = events.clone();
        let callbacks = UploadCallbacks::new(
            7,
            move |fraction| {
                progress_events.lock().unwrap().push(format!("p{:.2}", fraction));
                if let Some(gate) = progress_slot.lock().unwrap().as_ref() {
                    assert!(gate.complete(UploadOutcome::Failure(AppError::UploadCancelled)));
                }
            },
            move |outcome: UploadOutcome| {
                complete_events.lock().unwrap().push(format!("{:?}", outcome.error().is_some()));
            },
        );
        *slot.lock().unwrap() = Some(callbacks.clone());

        callbacks.report_fraction(0.5);
        callbacks.report_fraction(0.75);

        assert!(callbacks.is_complete());
        assert!(!callbacks.complete(UploadOutcome::Success(vec!["late".to_string()])));
        assert_eq!(*events.lock().unwrap(), vec!["p0.50", "true"]);

        // Break the callback -> slot -> callbacks cycle
        slot.lock().unwrap().take();
    }
}
