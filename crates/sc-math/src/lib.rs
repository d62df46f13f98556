//! Score prediction math utilities.

pub mod stable;

pub use stable::*;
