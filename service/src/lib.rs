#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

pub mod config;
pub mod congress;
pub mod endpoints;
pub mod http;
pub mod sink;
pub mod state;
pub mod sync;
