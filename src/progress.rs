//! Progress-callback trait for per-lecture and per-stage events.
//!
//! Inject an [`Arc<dyn CourseProgressCallback>`] via
//! [`crate::config::CourseConfigBuilder::progress_callback`] to receive events
//! as the orchestrator works through the lectures and the global stages.
//!
//! # Example
//!
//! ```rust
//! use edgequake_coursenotes::{CourseProgressCallback, CourseConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl CourseProgressCallback for CountingCallback {
//!     fn on_lecture_complete(&self, name: &str, notes_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{} done ({} bytes of notes)", name, notes_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = CourseConfig::builder()
//!     .progress_callback(counter as Arc<dyn CourseProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Global stages that run after the per-lecture workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Structure,
    Synthesis,
    Compile,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Structure => "structure",
            Stage::Synthesis => "synthesis",
            Stage::Compile => "compile",
        };
        f.write_str(s)
    }
}

/// Called by the orchestrator as it processes lectures.
///
/// Lecture events may arrive concurrently from up to `max_workers` workers;
/// implementations must synchronise their own state. All methods default to
/// no-ops.
pub trait CourseProgressCallback: Send + Sync {
    /// Called once after discovery.
    ///
    /// # Arguments
    /// * `pending`: lectures that will be processed
    /// * `skipped`: lectures left alone because their notes already exist
    fn on_run_start(&self, pending: usize, skipped: usize) {
        let _ = (pending, skipped);
    }

    fn on_lecture_skipped(&self, name: &str) {
        let _ = name;
    }

    fn on_lecture_start(&self, name: &str) {
        let _ = name;
    }

    /// Called when a lecture's notes have been written.
    fn on_lecture_complete(&self, name: &str, notes_len: usize) {
        let _ = (name, notes_len);
    }

    fn on_lecture_error(&self, name: &str, error: &str) {
        let _ = (name, error);
    }

    /// Called when a global stage begins.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once after the last stage.
    fn on_run_complete(&self, succeeded: usize, failed: usize) {
        let _ = (succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl CourseProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CourseConfig`].
pub type ProgressCallback = Arc<dyn CourseProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        stages: Mutex<Vec<Stage>>,
    }

    impl CourseProgressCallback for TrackingCallback {
        fn on_lecture_start(&self, _name: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_lecture_complete(&self, _name: &str, _notes_len: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_lecture_error(&self, _name: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_stage(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(2, 1);
        cb.on_lecture_skipped("Lecture1");
        cb.on_lecture_start("Lecture2");
        cb.on_lecture_complete("Lecture2", 42);
        cb.on_lecture_error("Lecture3", "soffice missing");
        cb.on_stage(Stage::Synthesis);
        cb.on_run_complete(1, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_lecture_start("A");
        tracker.on_lecture_complete("A", 100);
        tracker.on_lecture_start("B");
        tracker.on_lecture_error("B", "timeout");
        tracker.on_stage(Stage::Structure);
        tracker.on_stage(Stage::Synthesis);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![Stage::Structure, Stage::Synthesis]
        );
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Compile.to_string(), "compile");
    }
}
