//! # DevPlane Types
//!
//! Core entity types, DTOs, and the transport-neutral error taxonomy shared
//! across the control-plane daemon and the sentinel binary.
//!
//! - **`error`** — `ErrorKind`/`AppError`, the taxonomy every component in
//!   this workspace classifies its failures into at the point it first
//!   crosses a boundary.
//! - **`models`** — domain entities: DevBox, App, Collaborator, routes,
//!   ACLs, events, and the ephemeral request identity.
//!
//! This crate sits at the bottom of the dependency graph:
//!
//! ```text
//!                devplane-types (this crate)
//!                        │
//!       ┌────────────────┼────────────────┐
//!       ▼                ▼                ▼
//!  devplane-core   devplane-server   devplane-sentinel
//! ```

pub mod error;
pub mod models;

pub use error::{AppError, AppResult, ErrorKind};
pub use models::{
    AclPreset, AclRule, Collaborator, Devbox, DevboxState, DevboxResources, Event, EventKind,
    Identity, PassthroughRoute, Protocol, RequestId, Route, RuleAction, Subscription,
};
