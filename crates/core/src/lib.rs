//! Newsdesk Core - Shared types library.
//!
//! This crate provides the value types used across the Newsdesk identity components:
//! - `identity` - Session synchronization, route guarding, and the login flow
//! - `cli` - Command-line access to the hosted identity provider
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no async.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for identity IDs, emails, and passwords

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
