//! TIRANGA: timed three-colour betting round engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod engine;
pub mod game;
pub mod notify;
pub mod storage;
pub mod types;
