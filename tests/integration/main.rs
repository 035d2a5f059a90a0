//! End-to-end scenarios against the public `tiranga` API.

mod flaky_store;
mod scenarios;
