//! Test infrastructure for the fleet.
//!
//! Shared by the integration test binaries; not every binary uses every item.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
