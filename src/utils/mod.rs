//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `popmqtt` crate.
//!
//! This module centralizes reusable components, such as the error types shared
//! by the packet, session and transport layers and the logging bootstrap.

pub mod error;
pub mod logging;

pub use error::{ClientError, ConfigError, PacketError};
