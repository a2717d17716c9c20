//! Navigation state passed between the route guard and the login screen.

use serde::{Deserialize, Serialize};

/// Attached to a navigation the route guard denied.
///
/// Consumed once by the login flow to pick the post-login destination and to
/// show why the visitor ended up on the login screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteGuardRequest {
    /// Path the visitor was trying to reach.
    pub return_to: String,
    /// Banner text for the login screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RouteGuardRequest {
    #[must_use]
    pub fn new(return_to: impl Into<String>, reason: Option<String>) -> Self {
        Self {
            return_to: return_to.into(),
            reason,
        }
    }
}

/// State carried along with a navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavigationState {
    /// Denied by the route guard.
    Guard(RouteGuardRequest),
    /// Informational banner (e.g. "check your email").
    Message { message: String },
}

impl NavigationState {
    /// Banner text to render on arrival, if any.
    #[must_use]
    pub fn banner(&self) -> Option<&str> {
        match self {
            Self::Guard(request) => request.reason.as_deref(),
            Self::Message { message } => Some(message),
        }
    }
}
