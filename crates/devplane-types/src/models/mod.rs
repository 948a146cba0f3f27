//! Domain models shared by the daemon and the sentinel.

mod acl;
mod app;
mod collaborator;
mod devbox;
mod event;
mod identity;
mod route;
mod sentinel;

pub use acl::{AclPreset, AclRule, NetworkAcl, RuleAction};
pub use app::{App, AppState, is_valid_subdomain};
pub use collaborator::Collaborator;
pub use devbox::{Devbox, DevboxResources, DevboxState, is_valid_username};
pub use event::{Event, EventKind, ResourceType, Subscription};
pub use identity::{Identity, RequestId};
pub use route::{HttpRoute, HttpRoute as Route, PassthroughRoute, Protocol};
pub use sentinel::{CertEntry, SentinelMode, SentinelStatus};
