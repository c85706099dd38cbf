//! Integration test suite for mender.
//!
//! These tests drive whole remediation sessions through the public
//! `Orchestrator` API with a scripted model and recording handlers.
//!
//! # Test Categories
//!
//! - `lifecycle`: session start, teardown gating, failures
//! - `routing`: planning and handler dispatch order
//! - `interaction`: human prompts, resolution and the issue prompt guard
//!
//! No test starts a real model process.

mod fixtures;

mod interaction;
mod lifecycle;
