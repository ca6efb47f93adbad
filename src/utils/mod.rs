//! Utility helpers: logging, timing and status sampling

mod logger;
mod sampler;
mod timer;

pub use logger::{init_logger, LogLevel};
pub use sampler::{Sample, TimeoutSampler};
pub use timer::Timer;
