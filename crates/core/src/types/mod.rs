//! Core types for Newsdesk.
//!
//! This module provides type-safe wrappers for common identity concepts.

pub mod email;
pub mod id;
pub mod password;

pub use email::{Email, EmailError};
pub use id::*;
pub use password::{Password, PasswordError};
