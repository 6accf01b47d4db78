//! # Shared Control Register Layout (controller ↔ workers)
//!
//! Defines the memory layout of the control register that the controlling
//! process shares with every load worker process. All types use `#[repr(C)]`
//! so both sides of the process boundary agree on offsets.
//!
//! ## Layout
//!
//! ```text
//! offset 0             SLOTS_OFFSET                       region_size(n)
//! ┌───────────────────┬──────────────┬──────────────┬─────┬──────────────┐
//! │  RegisterHeader   │ ControlSlot 0│ ControlSlot 1│ ... │ ControlSlot n│
//! └───────────────────┴──────────────┴──────────────┴─────┴──────────────┘
//! ```
//!
//! ## Ownership of fields
//!
//! Every field has exactly one writer, which is what lets the register work
//! without any lock:
//!
//! | field                       | writer              | reader            |
//! |-----------------------------|---------------------|-------------------|
//! | `RegisterHeader.*`          | controller (create) | workers (attach)  |
//! | `ControlSlot.target_centi`  | controller          | owning worker     |
//! | `ControlSlot.stop`          | controller          | owning worker     |
//! | `ControlSlot.windows`       | owning worker       | controller        |

#![no_std]

use core::sync::atomic::{AtomicU32, AtomicU64};

// ============================================================================
// Constants
// ============================================================================

/// Magic value written at offset 0 once the header is initialized ("LSCR")
pub const REGISTER_MAGIC: u32 = 0x4C53_4352;

/// Layout version, bumped whenever `RegisterHeader` or `ControlSlot` change
pub const REGISTER_VERSION: u32 = 1;

/// Upper bound on slots in one register (one slot per logical CPU)
pub const MAX_SLOTS: usize = 4096;

/// Target percentage is stored in hundredths of a percent
pub const CENTI_PER_PERCENT: u32 = 100;

/// Encoded value of 100%
pub const CENTI_PERCENT_MAX: u32 = 100 * CENTI_PER_PERCENT;

/// `ControlSlot.stop` value while the worker should keep running
pub const STOP_CLEAR: u32 = 0;

/// `ControlSlot.stop` value telling the worker to exit
pub const STOP_RAISED: u32 = 1;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Header at the start of the register region
///
/// Written once by the controller before any worker is spawned. Workers
/// validate `magic`, `version` and `slot_count` when they attach.
#[repr(C)]
pub struct RegisterHeader {
    pub magic: AtomicU32,
    pub version: AtomicU32,
    pub slot_count: AtomicU32,
    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: u32,
}

/// One worker's slot
///
/// **Memory Layout**: aligned to a cache line so that a worker spinning on
/// its own slot never shares a line with a neighbour's slot.
#[repr(C, align(64))]
pub struct ControlSlot {
    /// Target load in hundredths of a percent (`0..=CENTI_PERCENT_MAX`)
    pub target_centi: AtomicU32,

    /// `STOP_CLEAR` or `STOP_RAISED`
    pub stop: AtomicU32,

    /// Duty windows completed by the owning worker
    pub windows: AtomicU64,
}

/// Byte offset of slot 0 (header rounded up to slot alignment)
pub const SLOTS_OFFSET: usize = {
    let header = core::mem::size_of::<RegisterHeader>();
    let align = core::mem::align_of::<ControlSlot>();
    header.div_ceil(align) * align
};

/// Total bytes needed for a register with `slots` slots
#[must_use]
pub const fn region_size(slots: usize) -> usize {
    SLOTS_OFFSET + slots * core::mem::size_of::<ControlSlot>()
}

/// Byte offset of slot `index`
#[must_use]
pub const fn slot_offset(index: usize) -> usize {
    SLOTS_OFFSET + index * core::mem::size_of::<ControlSlot>()
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a percentage into the slot representation, clamping to [0, 100]
///
/// NaN encodes as 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn encode_percent(percent: f64) -> u32 {
    if percent.is_nan() || percent <= 0.0 {
        return 0;
    }
    if percent >= 100.0 {
        return CENTI_PERCENT_MAX;
    }
    // Round half up; the value is already known to be in (0, 100)
    let centi = (percent * f64::from(CENTI_PER_PERCENT) + 0.5) as u32;
    if centi > CENTI_PERCENT_MAX {
        CENTI_PERCENT_MAX
    } else {
        centi
    }
}

/// Decode the slot representation back into a percentage in [0, 100]
#[must_use]
pub fn decode_percent(centi: u32) -> f64 {
    let centi = if centi > CENTI_PERCENT_MAX { CENTI_PERCENT_MAX } else { centi };
    f64::from(centi) / f64::from(CENTI_PER_PERCENT)
}
