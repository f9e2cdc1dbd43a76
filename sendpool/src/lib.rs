//! Operator-facing wiring for sendpool: configuration loading, the
//! long-running controller and CLI rendering.

pub mod config;
pub mod controller;
pub mod report;
