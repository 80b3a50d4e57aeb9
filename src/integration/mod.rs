//! End-to-end tests driving the router, plus shared test fixtures

pub mod fixtures;

mod e2e;
