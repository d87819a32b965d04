//! Per-actor episode storage.

pub mod trajectory_memory;


pub use trajectory_memory::TrajectoryMemory;
