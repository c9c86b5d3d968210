//! forge-server
//!
//! Multi-client async TCP server for the forge dispatcher.
//!
//! This crate glues together:
//! - `forge-core` (the dispatcher)
//! - `forge-protocol` (the wire format)
//! and exposes a `server::run(Config, engine)` entrypoint plus a demo
//! engine for the bundled binary.

pub mod config;
pub mod connection;
pub mod demo;
pub mod server;
