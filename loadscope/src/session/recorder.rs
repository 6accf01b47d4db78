use chrono::Utc;
use log::{debug, info, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use super::{Marker, Sample, Session, SessionOutcome};
use crate::domain::RecorderError;
use crate::profile::LoadProfile;

/// Marker time resolution; markers are kept at least one step apart
const MARKER_STEP: Duration = Duration::from_micros(1);

/// Lock a shared recorder, recovering the data if a holder panicked
///
/// The recorder has no invariant a panic could break half-way, so the
/// poisoned guard is safe to keep using.
pub fn lock_recorder(recorder: &Mutex<SessionRecorder>) -> MutexGuard<'_, SessionRecorder> {
    recorder.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct SessionRecorder {
    session: Option<Session>,
    started: Option<Instant>,
}

impl SessionRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording a new session, discarding any previous one
    pub fn begin(&mut self, profile: LoadProfile, workers: usize, started: Instant) {
        if let Some(old) = &self.session {
            debug!(
                "Replacing previous session ({} samples, {} markers)",
                old.samples.len(),
                old.markers.len()
            );
        }
        self.session = Some(Session {
            profile,
            workers,
            started_at: Utc::now(),
            outcome: SessionOutcome::Running,
            samples: Vec::new(),
            markers: Vec::new(),
        });
        self.started = Some(started);
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_sealed())
    }

    /// Append a sample; returns `false` if it was dropped
    ///
    /// Samples arriving after the seal, or not strictly later than the
    /// previous sample, are dropped.
    pub fn record_sample(&mut self, sample: Sample) -> bool {
        let Some(session) = self.live_session() else {
            debug!("Dropping sample at {:?}: not recording", sample.elapsed);
            return false;
        };
        if let Some(last) = session.samples.last() {
            if sample.elapsed <= last.elapsed {
                warn!(
                    "Dropping out-of-order sample at {:?} (previous at {:?})",
                    sample.elapsed, last.elapsed
                );
                return false;
            }
        }
        session.samples.push(sample);
        true
    }

    /// Add a marker at the current time
    ///
    /// # Errors
    /// Returns [`RecorderError::NotRecording`] outside a run
    pub fn add_marker(&mut self, note: &str) -> Result<Marker, RecorderError> {
        let now = self.elapsed_now().ok_or(RecorderError::NotRecording)?;
        self.add_marker_at(now, note)
    }

    /// Add a marker at `elapsed`, moving it forward if it is not later
    /// than the previous marker
    ///
    /// A late marker moves to the current time, or to just after the
    /// previous marker if the clock has not advanced past it either. Line
    /// breaks in `note` become spaces.
    ///
    /// # Errors
    /// Returns [`RecorderError::NotRecording`] outside a run
    pub fn add_marker_at(&mut self, elapsed: Duration, note: &str) -> Result<Marker, RecorderError> {
        let elapsed = whole_steps(elapsed);
        let now = self.elapsed_now().map(whole_steps);
        let session = self.live_session().ok_or(RecorderError::NotRecording)?;

        let elapsed = match session.markers.last() {
            Some(prev) if elapsed <= prev.elapsed => {
                let moved = match now {
                    Some(now) if now > prev.elapsed => now,
                    _ => prev.elapsed + MARKER_STEP,
                };
                debug!("Marker at {elapsed:?} moved to {moved:?}");
                moved
            }
            _ => elapsed,
        };

        let marker = Marker { elapsed, note: single_line(note) };
        session.markers.push(marker.clone());
        Ok(marker)
    }

    /// Freeze the current session with `outcome`
    ///
    /// Sealing twice keeps the first outcome.
    pub fn seal(&mut self, outcome: SessionOutcome) -> Option<&Session> {
        let session = self.session.as_mut()?;
        if !session.is_sealed() {
            info!(
                "Session sealed: {} samples, {} markers ({outcome:?})",
                session.samples.len(),
                session.markers.len()
            );
            session.outcome = outcome;
        }
        Some(&*session)
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        self.session.as_ref().map_or(&[], |s| &s.samples)
    }

    #[must_use]
    pub fn markers(&self) -> &[Marker] {
        self.session.as_ref().map_or(&[], |s| &s.markers)
    }

    fn live_session(&mut self) -> Option<&mut Session> {
        self.session.as_mut().filter(|s| !s.is_sealed())
    }

    fn elapsed_now(&self) -> Option<Duration> {
        let started = self.started?;
        self.is_recording().then(|| Instant::now().saturating_duration_since(started))
    }
}

fn single_line(note: &str) -> String {
    note.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Round `elapsed` down to a whole number of [`MARKER_STEP`]s
fn whole_steps(elapsed: Duration) -> Duration {
    elapsed - Duration::from_nanos(u64::from(elapsed.subsec_nanos() % MARKER_STEP.subsec_nanos()))
}
