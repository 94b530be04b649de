//! Category system for nerforge.
//!
//! This module provides the taxonomy that candidate lists are checked against.

mod taxonomy;

pub use taxonomy::{Hierarchy, Level};
