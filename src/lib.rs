// Library entry point for tracesmith.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod ir;
pub mod ports;
