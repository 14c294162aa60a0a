#![warn(missing_docs)]
//! # glyphline-benchmarks
//!
//! Lightweight latency guardrails for the codec and capture hot paths.
//! Strict performance targets are environment-specific; the smoke tests in
//! `tests/` only catch order-of-magnitude regressions.
