//! Newtypes and error enums shared by every layer of loadscope

pub mod errors;
pub mod types;

pub use types::{CpuId, Percent, Pid, SlotIndex};

pub use errors::{
    ControlError, ExportError, ProfileError, RecorderError, RegisterError, RunError, RunFault,
    SensorError,
};
