//! # DevPlane Core
//!
//! Transport-agnostic control-plane logic: request authentication, the
//! event bus, the persistence layer, the external-system adapters
//! (hypervisor, DNS, reverse proxy), the DevBox lifecycle engine, the App
//! deploy pipeline, and the network ACL engine.
//!
//! Nothing in this crate knows about axum, binary RPC framing, or the
//! sentinel's HA loop — those live in `devplane-server` and
//! `devplane-sentinel` respectively, both built on top of this crate.

pub mod acl;
pub mod adapters;
pub mod auth;
pub mod config;
pub mod event_bus;
pub mod lifecycle;
pub mod locks;
pub mod persistence;
pub mod pipeline;

pub use devplane_types::{error, models};
pub use devplane_types::{AppError, AppResult, ErrorKind};
