//! Progressive filter levels
//!
//! This module decides how strict matching is for a participant based on how
//! long they have been waiting.

pub mod policy;

pub use policy::{FilterLevel, FilterLevelInfo, FilterLevelPolicy};
