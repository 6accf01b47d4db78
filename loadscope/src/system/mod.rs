//! Host queries needed to size and place a run

pub mod cpu_utils;

pub use cpu_utils::{online_cpus, parse_cpu_list, worker_cpus};
