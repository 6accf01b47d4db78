//! # Session Recording
//!
//! A [`Session`] is one run: its profile, the samples taken while it ran and
//! the markers the user dropped into it. The [`SessionRecorder`] owns the
//! current session, appends to it while the run is live and seals it when
//! the run stops. Starting the next run replaces it wholesale.
//!
//! Both series are kept strictly increasing in time. A late sample is
//! dropped and a late marker is moved forward, so consumers never need to
//! sort.

mod recorder;

pub use recorder::{lock_recorder, SessionRecorder};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::domain::types::duration_secs;
use crate::profile::LoadProfile;

/// One sampler tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// Time since the run started
    #[serde(rename = "elapsed_s", serialize_with = "duration_secs::serialize")]
    pub elapsed: Duration,
    pub load_percent: f64,
    pub temperature_celsius: Option<f64>,
    pub power_watts: Option<f64>,
}

/// A user note pinned to a point in the run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    #[serde(rename = "elapsed_s", serialize_with = "duration_secs::serialize")]
    pub elapsed: Duration,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Running,
    Completed,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub profile: LoadProfile,
    pub workers: usize,
    pub started_at: DateTime<Utc>,
    pub outcome: SessionOutcome,
    pub samples: Vec<Sample>,
    pub markers: Vec<Marker>,
}

impl Session {
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.outcome != SessionOutcome::Running
    }
}
