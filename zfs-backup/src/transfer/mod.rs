//! Moving send streams into the destination pool.

pub mod estimate;
pub mod pipeline;
pub mod progress;
pub mod progress_stream;
