//! Consecutive-failure tracking shared by the periodic tasks
//!
//! A single failed tick is logged and skipped. Only `threshold` failures in
//! a row turn into a [`RunFault`], which is published once per run through a
//! `watch` channel so the owner of the run can react.

use log::warn;
use std::fmt::Display;
use tokio::sync::watch;

use crate::domain::RunFault;

/// Per-run fault slot; the first published fault wins
pub type FaultSlot = watch::Sender<Option<RunFault>>;

#[derive(Debug)]
pub struct FaultTracker {
    task: &'static str,
    threshold: u32,
    consecutive: u32,
    total: u64,
}

impl FaultTracker {
    #[must_use]
    pub fn new(task: &'static str, threshold: u32) -> Self {
        Self { task, threshold: threshold.max(1), consecutive: 0, total: 0 }
    }

    pub fn record_ok(&mut self) {
        self.consecutive = 0;
    }

    /// Count a failed tick; returns the fault once the threshold is reached
    pub fn record_fault(&mut self, error: &dyn Display) -> Option<RunFault> {
        self.consecutive += 1;
        self.total += 1;
        warn!(
            "{} tick failed ({}/{}): {error}",
            self.task, self.consecutive, self.threshold
        );
        (self.consecutive >= self.threshold).then(|| RunFault {
            task: self.task,
            consecutive: self.consecutive,
            last_error: error.to_string(),
        })
    }

    /// Failed ticks over the whole run
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }
}

/// Store `fault` unless an earlier one is already recorded
pub fn publish_fault(slot: &FaultSlot, fault: RunFault) {
    slot.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(fault);
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_needs_consecutive_failures() {
        let mut tracker = FaultTracker::new("sampler", 3);
        assert!(tracker.record_fault(&"boom").is_none());
        assert!(tracker.record_fault(&"boom").is_none());
        tracker.record_ok();
        assert!(tracker.record_fault(&"boom").is_none());
        assert!(tracker.record_fault(&"boom").is_none());
        let fault = tracker.record_fault(&"last").unwrap();
        assert_eq!(fault.consecutive, 3);
        assert_eq!(fault.last_error, "last");
        assert_eq!(tracker.total(), 5);
    }

    #[test]
    fn test_first_fault_wins() {
        let (slot, rx) = watch::channel(None);
        let first = RunFault { task: "controller", consecutive: 5, last_error: "a".into() };
        let second = RunFault { task: "sampler", consecutive: 5, last_error: "b".into() };
        publish_fault(&slot, first.clone());
        publish_fault(&slot, second);
        assert_eq!(*rx.borrow(), Some(first));
    }
}
