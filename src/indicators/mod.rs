// src/indicators/mod.rs

//! Formula-driven indicators.
//!
//! - [`tokenize`] extracts candidate identifiers from R expressions.
//! - [`resolver`] classifies references and produces a topological order,
//!   or the cycles that prevent one.

pub mod resolver;
pub mod tokenize;

pub use resolver::{IndicatorDeps, Resolution, classify, resolve, resolve_order};
