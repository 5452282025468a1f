//! Host-binary helpers.

pub mod bootstrap;
