//! Task-set generation
//!
//! This crate expands a configuration grid (strategy × reliability ×
//! difficulty × category) into `TestTask`s for the CLI.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod grid;

pub use grid::{GridConfig, GridError, TaskGrid};
