//! Launch policy.
//!
//! Maps environment markers and requested capabilities onto a launch
//! strategy.

pub mod strategy;

pub use strategy::{select_strategy, Capability};
