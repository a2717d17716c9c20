//! Identity services.

pub mod identity;
pub mod login;
pub mod provisioning;
pub mod reset;

pub use identity::{IdentitySynchronizer, StateHandler, Subscription, UserState};
pub use login::{LoginFlow, LoginOutcome, RESET_LINK_SENT, SessionSettle};
pub use provisioning::{ProvisionOutcome, Provisioner};
pub use reset::{ResetPolicy, ResetRetryState, dispatch_with_retry};
