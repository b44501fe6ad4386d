use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Initializing,
    Running,
    Stopping,
    Finished,
    FinishedWithError,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::FinishedWithError | JobState::Cancelled
        )
    }
}

/// Point-in-time copy of [`JobProgress`].
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ProgressSnapshot {
    pub state: JobState,
    pub total_images: usize,
    pub started_images: usize,
    pub processed_images: usize,
    pub total_tiles: usize,
    pub processed_tiles: usize,
    pub last_error: Option<String>,
}

/// Process wide job state, shared between the driver, the workers and the caller.
///
/// The stop flag is the only thing workers poll; they check it at every loop
/// boundary and between pipeline steps.
#[derive(Debug, Default)]
pub struct JobProgress {
    state: Mutex<JobState>,
    stopping: AtomicBool,
    total_images: AtomicUsize,
    started_images: AtomicUsize,
    processed_images: AtomicUsize,
    total_tiles: AtomicUsize,
    processed_tiles: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl JobProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the stop flag, counters and error for the next run.
    pub fn reset(&self) {
        self.stopping.store(false, Ordering::Release);
        for counter in [
            &self.total_images,
            &self.started_images,
            &self.processed_images,
            &self.total_tiles,
            &self.processed_tiles,
        ] {
            counter.store(0, Ordering::Release);
        }
        *self.last_error.lock() = None;
        self.set_state(JobState::Initializing);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Requests cancellation. Running steps finish, nothing new starts.
    pub fn stop(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = JobState::Stopping;
        }
        info!("Stop requested");
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: JobState) {
        *self.state.lock() = state;
    }

    /// Records `message` and moves to [`JobState::FinishedWithError`].
    ///
    /// Sets the stop flag so sibling workers wind down. The first error wins.
    pub fn fail(&self, message: impl Into<String>) {
        {
            let mut last_error = self.last_error.lock();
            if last_error.is_none() {
                *last_error = Some(message.into());
            }
        }
        self.stopping.store(true, Ordering::Release);
        self.set_state(JobState::FinishedWithError);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn add_total_images(&self, count: usize) {
        self.total_images.fetch_add(count, Ordering::AcqRel);
    }

    pub fn add_total_tiles(&self, count: usize) {
        self.total_tiles.fetch_add(count, Ordering::AcqRel);
    }

    pub fn inc_started_image(&self) {
        self.started_images.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_image(&self) {
        self.processed_images.fetch_add(1, Ordering::AcqRel);
    }

    pub fn inc_tile(&self) {
        self.processed_tiles.fetch_add(1, Ordering::AcqRel);
    }

    pub fn processed_images(&self) -> usize {
        self.processed_images.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            state: self.state(),
            total_images: self.total_images.load(Ordering::Acquire),
            started_images: self.started_images.load(Ordering::Acquire),
            processed_images: self.processed_images.load(Ordering::Acquire),
            total_tiles: self.total_tiles.load(Ordering::Acquire),
            processed_tiles: self.processed_tiles.load(Ordering::Acquire),
            last_error: self.last_error(),
        }
    }
}
