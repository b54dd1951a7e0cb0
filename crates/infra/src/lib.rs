//! Infrastructure layer: stores, remote authority client, config, and the
//! lifecycle engine that ties them together.

pub mod config;
pub mod lifecycle;
pub mod notify;
pub mod remote;
pub mod store;

mod integration_tests;
