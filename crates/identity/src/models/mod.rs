//! Domain models for the identity layer.

pub mod profile;
pub mod route;
pub mod session;

pub use profile::{CurrentUser, NewProfile, ProfilePatch, ProfileRow};
pub use route::{NavigationState, RouteGuardRequest};
pub use session::{AuthUser, Session, SessionEvent, StoredSession, storage_keys};
