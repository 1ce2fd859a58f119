//! Terminal rendering and report output for the `stampede` binary.
//!
//! The engine lives in the `stampede` crate. This crate only turns its
//! snapshots and results into something a person or a CI job can read.

pub mod display;
pub mod report;
pub mod summary;
