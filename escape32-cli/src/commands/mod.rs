//! Command implementations.
//!
//! Each operation is implemented in its own module for clean separation.

pub(crate) mod info;
pub(crate) mod ports;
pub(crate) mod update;
