//! Shared integration-test helpers
//!
//! Concrete models plugged into the engine and tolerance-based comparison
//! functions.

#![allow(dead_code)]

pub mod assertions;
pub mod models;
