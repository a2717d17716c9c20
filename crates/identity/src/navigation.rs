//! Navigation boundary.
//!
//! The route guard and the login flow never touch a router directly; they
//! ask a [`Navigator`] to go somewhere. [`HistoryNavigator`] keeps an
//! in-memory history stack, which is all the CLI and the tests need.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::add_breadcrumb;
use crate::models::{NavigationState, RouteGuardRequest};

/// Options for a single navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Replace the current history entry instead of pushing a new one.
    pub replace: bool,
    /// State delivered to the destination.
    pub state: Option<NavigationState>,
}

impl NavigateOptions {
    /// Replace the current entry, with no state.
    #[must_use]
    pub const fn replace() -> Self {
        Self {
            replace: true,
            state: None,
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: NavigationState) -> Self {
        self.state = Some(state);
        self
    }
}

/// Something that can move the visitor to another screen.
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str, options: NavigateOptions);
}

/// One entry of the history stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub path: String,
    pub state: Option<NavigationState>,
}

#[derive(Debug)]
struct History {
    entries: Vec<HistoryEntry>,
    navigations: usize,
}

/// In-memory browser-like history.
#[derive(Debug)]
pub struct HistoryNavigator {
    history: Mutex<History>,
}

impl Default for HistoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl HistoryNavigator {
    /// Start with a single entry at `initial_path`.
    #[must_use]
    pub fn new(initial_path: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(History {
                entries: vec![HistoryEntry {
                    path: initial_path.into(),
                    state: None,
                }],
                navigations: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The entry currently shown.
    #[must_use]
    pub fn current(&self) -> Option<HistoryEntry> {
        self.lock().entries.last().cloned()
    }

    #[must_use]
    pub fn current_path(&self) -> Option<String> {
        self.lock().entries.last().map(|entry| entry.path.clone())
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.lock().entries.clone()
    }

    /// Number of `navigate` calls so far.
    #[must_use]
    pub fn navigation_count(&self) -> usize {
        self.lock().navigations
    }

    /// Pop the current entry. Returns the entry now shown.
    pub fn back(&self) -> Option<HistoryEntry> {
        let mut history = self.lock();
        if history.entries.len() > 1 {
            history.entries.pop();
        }
        history.entries.last().cloned()
    }

    /// Take the route-guard request attached to the current entry.
    ///
    /// The request is removed from the entry, so a second call (a re-render,
    /// a refresh) gets `None`.
    pub fn take_guard_request(&self) -> Option<RouteGuardRequest> {
        let mut history = self.lock();
        let entry = history.entries.last_mut()?;
        match entry.state.take() {
            Some(NavigationState::Guard(request)) => Some(request),
            other => {
                entry.state = other;
                None
            }
        }
    }

    /// Banner text carried by the current entry.
    #[must_use]
    pub fn banner(&self) -> Option<String> {
        self.lock()
            .entries
            .last()
            .and_then(|entry| entry.state.as_ref())
            .and_then(NavigationState::banner)
            .map(str::to_owned)
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, path: &str, options: NavigateOptions) {
        let entry = HistoryEntry {
            path: path.to_owned(),
            state: options.state,
        };
        {
            let mut history = self.lock();
            history.navigations += 1;
            if options.replace {
                history.entries.pop();
            }
            history.entries.push(entry);
        }
        tracing::debug!(path, replace = options.replace, "Navigated");
        add_breadcrumb(
            "navigation",
            "Navigated",
            Some(&[
                ("path", path),
                ("replace", if options.replace { "true" } else { "false" }),
            ]),
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn guard_state(return_to: &str) -> NavigationState {
        NavigationState::Guard(RouteGuardRequest::new(
            return_to,
            Some("Please sign in to access the dashboard".to_owned()),
        ))
    }

    #[test]
    fn test_push_and_replace() {
        let nav = HistoryNavigator::new("/");
        nav.navigate("/dashboard", NavigateOptions::default());
        assert_eq!(nav.entries().len(), 2);
        nav.navigate("/login", NavigateOptions::replace());
        assert_eq!(nav.entries().len(), 2);
        assert_eq!(nav.current_path().as_deref(), Some("/login"));
        assert_eq!(nav.back().unwrap().path, "/");
    }

    #[test]
    fn test_guard_request_is_taken_once() {
        let nav = HistoryNavigator::new("/dashboard/articles");
        nav.navigate(
            "/login",
            NavigateOptions::replace().with_state(guard_state("/dashboard/articles")),
        );
        assert_eq!(
            nav.banner().as_deref(),
            Some("Please sign in to access the dashboard")
        );
        let request = nav.take_guard_request().unwrap();
        assert_eq!(request.return_to, "/dashboard/articles");
        assert!(nav.take_guard_request().is_none());
    }

    #[test]
    fn test_message_state_is_not_taken_as_guard_request() {
        let nav = HistoryNavigator::default();
        nav.navigate(
            "/login",
            NavigateOptions::default().with_state(NavigationState::Message {
                message: "Check your email".to_owned(),
            }),
        );
        assert!(nav.take_guard_request().is_none());
        assert_eq!(nav.banner().as_deref(), Some("Check your email"));
    }
}
