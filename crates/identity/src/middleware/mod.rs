//! Screen-level middleware.

pub mod guard;

pub use guard::{GuardState, RouteGuard};
