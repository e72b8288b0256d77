//! Library crate for quiz-sync, exposing the session engine for binaries and
//! integration tests.

pub mod clock;
pub mod config;
pub mod error;
pub mod model;
pub mod scoring;
pub mod session;
pub mod store;
