//! End-to-end tests driving the whole settlement pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;

mod compliance_tests;
mod http_tests;
mod settlement_tests;

pub use harness::{wait_for_evaluation, TestHarness, MERCHANT};
