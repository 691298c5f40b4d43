//! Keeper: library crate shared by the `keeper` binary and integration tests.
//!
//! Two processes are built from it: the web service (`api`) that adds and
//! removes encrypted tokens, and the batch runner (`jobs`) that periodically
//! replays every stored token through the dispatcher.

pub mod api;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod jobs;
pub mod models;
pub mod store;
pub mod vault;
