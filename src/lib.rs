// Library root — exposes the harness core and the stub-client SDK for
// integration tests and for embedding in external test suites.
// The daemon entry points are src/main.rs and src/bin/understudy-stub.rs.

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod gateway;
pub mod handler;
pub mod harness;
pub mod logger;
pub mod matcher;
pub mod model;
pub mod pending;
pub mod registry;
pub mod rules;
pub mod traffic;
