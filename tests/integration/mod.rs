//! Integration test suite for the research navigator.
//!
//! These tests run the full seven-node research graph against scripted
//! capabilities and verify the externally visible behavior: gating,
//! parallel retrieval, failure propagation and the final reply.
//!
//! # Test Categories
//!
//! - `end_to_end`: Query to reply, for answered, rejected and inconclusive runs
//! - `gate_rejection`: The gate's veto and what it prevents
//! - `parallel_retrieval`: Concurrency of the retrieval branches
//! - `failure_propagation`: Node failures and their dependents
//! - `resilience`: Timeouts, retries and cancellation
//! - `artifacts`: Per-node output files
//!
//! # CI Compatibility
//!
//! No test calls a real model or search backend.

mod fixtures;

mod failure_propagation;
mod gate_rejection;
mod parallel_retrieval;
