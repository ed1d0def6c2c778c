//! Common test utilities for integration tests.
//!
//! - [`http_mock::MockHttpServer`] - `wiremock` wrapper for stubbing Congress.gov over real HTTP
//! - [`fake_api`] - scripted in-process Congress.gov built on `MockTransport`, plus
//!   builders for a ready-to-run `SyncContext`
//!
//! Each test binary uses a different subset, hence the `dead_code` allowance.

#![allow(dead_code)]

pub mod fake_api;
pub mod http_mock;
