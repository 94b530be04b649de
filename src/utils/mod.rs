//! Shared utility functions for nerforge.
//!
//! This module provides text helpers used across multiple modules.

pub mod text;

pub use text::{collapse_whitespace, match_key, normalize_text};
