//! Newsdesk identity library.
//!
//! Decides whether a visitor is signed in, keeps the local profile row in
//! step with the identity provider's session lifecycle, and gates the
//! protected dashboard behind a login flow that remembers where the visitor
//! was going.
//!
//! # Components
//!
//! - [`services::IdentitySynchronizer`] - sole writer of the current user
//! - [`middleware::RouteGuard`] - per-screen session check and redirect
//! - [`services::LoginFlow`] - credential submission and password reset
//!
//! The identity provider and the profile table sit behind the
//! [`session::SessionStore`] and [`db::ProfileRepository`] traits, with
//! in-memory and hosted ([`supabase`]) implementations of each.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod navigation;
pub mod services;
pub mod session;
pub mod state;
pub mod supabase;
