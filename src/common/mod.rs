//! Low-level utilities shared by the filter stages.

pub mod linalg;
pub mod profiler;
