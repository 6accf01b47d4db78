//! # Shared Control Register
//!
//! A POSIX shared-memory region holding one [`ControlSlot`] per worker. The
//! controlling process creates it before spawning workers; each worker
//! attaches by name and only ever touches its own slot.
//!
//! ## Single-writer discipline
//!
//! No lock protects the region. Correctness rests on every field having one
//! writer (see the table in `loadscope_common`):
//!
//! - the controller side writes `target_centi` and `stop` through
//!   [`TargetSink`];
//! - a worker writes only its own `windows` counter through [`WorkerSlot`].
//!
//! Reads and writes are plain atomic loads/stores, so a reader sees either
//! the old or the new value, never a torn one.

#![allow(unsafe_code)] // raw pointers into the mapped region

use log::debug;
use loadscope_common::{
    decode_percent, encode_percent, region_size, slot_offset, ControlSlot, RegisterHeader,
    MAX_SLOTS, REGISTER_MAGIC, REGISTER_VERSION, SLOTS_OFFSET, STOP_CLEAR, STOP_RAISED,
};
use shared_memory::{Shmem, ShmemConf};
use std::sync::atomic::Ordering;

use crate::domain::{Percent, RegisterError, SlotIndex};

/// Where the controller publishes targets
///
/// Implemented by [`ControlRegister`]; tests substitute a recording sink.
pub trait TargetSink: Send + Sync {
    /// Number of worker slots behind this sink
    fn slot_count(&self) -> usize;

    /// Write `target` into every slot
    fn publish_all(&self, target: Percent);

    /// Tell every worker to exit after its current window
    fn raise_stop_all(&self);

    /// Drive all targets to zero, then raise every stop flag
    fn quiesce(&self) {
        self.publish_all(Percent::ZERO);
        self.raise_stop_all();
    }
}

/// Mapped shared-memory region
///
/// `Shmem` holds a raw pointer and is therefore neither `Send` nor `Sync`.
struct SharedRegion(Shmem);

// SAFETY: the mapping stays valid for the lifetime of `Shmem`, and every
// access to its contents goes through atomics in `RegisterHeader` and
// `ControlSlot`.
unsafe impl Send for SharedRegion {}
// SAFETY: see above; `&SharedRegion` only ever hands out `&` to atomics.
unsafe impl Sync for SharedRegion {}

/// The control register, as seen from either side of the process boundary
pub struct ControlRegister {
    region: SharedRegion,
    os_id: String,
    slot_count: usize,
}

impl ControlRegister {
    /// Create a register with `slot_count` slots (controller side)
    ///
    /// All targets start at 0% with stop flags clear. The creating process
    /// owns the region: dropping the register unlinks it.
    ///
    /// # Errors
    /// Returns an error if the slot count is out of range or the shared
    /// memory object cannot be created
    pub fn create(os_id: &str, slot_count: usize) -> Result<Self, RegisterError> {
        if slot_count == 0 || slot_count > MAX_SLOTS {
            return Err(RegisterError::InvalidSlotCount {
                requested: slot_count,
                max: MAX_SLOTS,
            });
        }

        let shmem = ShmemConf::new().os_id(os_id).size(region_size(slot_count)).create()?;
        let register =
            Self { region: SharedRegion(shmem), os_id: os_id.to_string(), slot_count };

        for index in 0..slot_count {
            let slot = register.slot_unchecked(index);
            slot.target_centi.store(0, Ordering::Relaxed);
            slot.stop.store(STOP_CLEAR, Ordering::Relaxed);
            slot.windows.store(0, Ordering::Relaxed);
        }

        let header = register.header();
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_SLOTS
        header.slot_count.store(slot_count as u32, Ordering::Relaxed);
        header.version.store(REGISTER_VERSION, Ordering::Relaxed);
        // Magic last: a worker that sees it also sees the initialized slots
        header.magic.store(REGISTER_MAGIC, Ordering::Release);

        debug!("Created control register {os_id} with {slot_count} slots");
        Ok(register)
    }

    /// Attach to an existing register by name (worker side)
    ///
    /// # Errors
    /// Returns an error if the region does not exist, is too small, or does
    /// not carry a valid header
    pub fn open(os_id: &str) -> Result<Self, RegisterError> {
        let shmem = ShmemConf::new().os_id(os_id).open()?;
        let len = shmem.len();
        if len < SLOTS_OFFSET {
            return Err(RegisterError::RegionTooSmall {
                os_id: os_id.to_string(),
                len,
                needed: SLOTS_OFFSET,
            });
        }

        let mut register =
            Self { region: SharedRegion(shmem), os_id: os_id.to_string(), slot_count: 0 };

        let header = register.header();
        if header.magic.load(Ordering::Acquire) != REGISTER_MAGIC {
            return Err(RegisterError::BadMagic(os_id.to_string()));
        }
        let version = header.version.load(Ordering::Relaxed);
        if version != REGISTER_VERSION {
            return Err(RegisterError::VersionMismatch {
                found: version,
                expected: REGISTER_VERSION,
            });
        }
        let slot_count = header.slot_count.load(Ordering::Relaxed) as usize;
        let needed = region_size(slot_count);
        if slot_count == 0 || len < needed {
            return Err(RegisterError::RegionTooSmall { os_id: os_id.to_string(), len, needed });
        }

        register.slot_count = slot_count;
        Ok(register)
    }

    #[must_use]
    pub fn os_id(&self) -> &str {
        &self.os_id
    }

    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Target currently published in `slot`
    ///
    /// # Errors
    /// Returns an error if `slot` is out of range
    pub fn target(&self, slot: SlotIndex) -> Result<Percent, RegisterError> {
        let slot = self.slot(slot)?;
        Ok(Percent::clamped(decode_percent(slot.target_centi.load(Ordering::Acquire))))
    }

    /// Whether the stop flag of `slot` is raised
    ///
    /// # Errors
    /// Returns an error if `slot` is out of range
    pub fn stop_raised(&self, slot: SlotIndex) -> Result<bool, RegisterError> {
        Ok(self.slot(slot)?.stop.load(Ordering::Acquire) == STOP_RAISED)
    }

    /// Duty windows completed by the worker owning `slot`
    ///
    /// # Errors
    /// Returns an error if `slot` is out of range
    pub fn windows_completed(&self, slot: SlotIndex) -> Result<u64, RegisterError> {
        Ok(self.slot(slot)?.windows.load(Ordering::Relaxed))
    }

    /// Worker-side view of one slot
    ///
    /// # Errors
    /// Returns an error if `slot` is out of range
    pub fn worker_slot(&self, slot: SlotIndex) -> Result<WorkerSlot<'_>, RegisterError> {
        Ok(WorkerSlot { slot: self.slot(slot)? })
    }

    fn slot(&self, slot: SlotIndex) -> Result<&ControlSlot, RegisterError> {
        if slot.as_usize() >= self.slot_count {
            return Err(RegisterError::SlotOutOfRange { slot, slot_count: self.slot_count });
        }
        Ok(self.slot_unchecked(slot.as_usize()))
    }

    fn header(&self) -> &RegisterHeader {
        // SAFETY: the region is at least SLOTS_OFFSET bytes (checked on
        // create/open), page aligned, and RegisterHeader only holds atomics.
        unsafe { &*self.region.0.as_ptr().cast::<RegisterHeader>() }
    }

    fn slot_unchecked(&self, index: usize) -> &ControlSlot {
        // SAFETY: callers keep index < slot_count and the region is
        // region_size(slot_count) bytes. slot_offset() is a multiple of the
        // slot alignment and the mapping is page aligned.
        unsafe { &*self.region.0.as_ptr().add(slot_offset(index)).cast::<ControlSlot>() }
    }
}

impl TargetSink for ControlRegister {
    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn publish_all(&self, target: Percent) {
        let centi = encode_percent(target.value());
        for index in 0..self.slot_count {
            self.slot_unchecked(index).target_centi.store(centi, Ordering::Release);
        }
    }

    fn raise_stop_all(&self) {
        for index in 0..self.slot_count {
            self.slot_unchecked(index).stop.store(STOP_RAISED, Ordering::Release);
        }
    }
}

/// A worker's handle on its own slot
pub struct WorkerSlot<'a> {
    slot: &'a ControlSlot,
}

impl WorkerSlot<'_> {
    /// Current target, re-read at the start of every duty window
    #[must_use]
    pub fn target(&self) -> Percent {
        Percent::clamped(decode_percent(self.slot.target_centi.load(Ordering::Acquire)))
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.slot.stop.load(Ordering::Acquire) == STOP_RAISED
    }

    /// Record one completed duty window (the only field a worker writes)
    pub fn complete_window(&self) {
        self.slot.windows.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    static NEXT_ID: AtomicU32 = AtomicU32::new(0);

    fn unique_id(tag: &str) -> String {
        format!(
            "loadscope_test_{}_{}_{}",
            std::process::id(),
            tag,
            NEXT_ID.fetch_add(1, Ordering::Relaxed)
        )
    }

    #[test]
    fn test_create_starts_idle() {
        let register = ControlRegister::create(&unique_id("idle"), 4).unwrap();
        assert_eq!(register.slot_count(), 4);
        for i in 0..4 {
            assert_eq!(register.target(SlotIndex(i)).unwrap(), Percent::ZERO);
            assert!(!register.stop_raised(SlotIndex(i)).unwrap());
        }
    }

    #[test]
    fn test_publish_visible_through_second_mapping() {
        let id = unique_id("attach");
        let controller = ControlRegister::create(&id, 3).unwrap();
        let worker = ControlRegister::open(controller.os_id()).unwrap();
        assert_eq!(worker.os_id(), id);
        assert_eq!(worker.slot_count(), 3);

        controller.publish_all(Percent::clamped(62.5));
        let slot = worker.worker_slot(SlotIndex(2)).unwrap();
        assert_eq!(slot.target(), Percent::clamped(62.5));
        assert!(!slot.stop_requested());

        slot.complete_window();
        slot.complete_window();
        assert_eq!(controller.windows_completed(SlotIndex(2)).unwrap(), 2);
        assert_eq!(controller.windows_completed(SlotIndex(0)).unwrap(), 0);

        controller.quiesce();
        assert_eq!(slot.target(), Percent::ZERO);
        assert!(slot.stop_requested());
    }

    #[test]
    fn test_slot_out_of_range() {
        let register = ControlRegister::create(&unique_id("range"), 2).unwrap();
        let err = register.worker_slot(SlotIndex(2)).err().unwrap();
        assert!(matches!(err, RegisterError::SlotOutOfRange { slot_count: 2, .. }));
    }

    #[test]
    fn test_invalid_slot_count() {
        assert!(matches!(
            ControlRegister::create(&unique_id("zero"), 0),
            Err(RegisterError::InvalidSlotCount { requested: 0, .. })
        ));
    }

    #[test]
    fn test_open_missing_region_fails() {
        assert!(ControlRegister::open(&unique_id("missing")).is_err());
    }
}
