//! Typed request core for the platform's REST API.
//!
//! # Overview
//! Every generated service method delegates to one engine: [`send`] takes a
//! [`Config`] snapshot and a [`Descriptor`] and returns a
//! [`CancelableRequest`] that settles exactly once — as a typed value, a
//! classified [`ApiError`], or `Cancelled`.
//!
//! # Design
//! - Configuration is an explicit, passable object, never hidden module
//!   state; resolver fields are re-resolved on every call and never cached.
//! - A descriptor is immutable plain data: method, URL template, parameter
//!   maps, payload, per-status error messages.
//! - The transport call is the engine's only suspension point. No retries,
//!   no built-in timeout; callers race the handle against a timer and
//!   cancel on expiry.
//! - Cancellation is cooperative down to the transport: cancelling aborts
//!   the in-flight connection, and a late-arriving response can never
//!   re-settle an already-cancelled result.

pub mod cancelable;
pub mod config;
pub mod engine;
pub mod error;
pub mod request;

pub use cancelable::{CancelHandle, CancelableRequest};
pub use config::{Config, CredentialStore, CredentialsMode, PathEncoder, Resolvable};
pub use engine::{send, send_bytes};
pub use error::ApiError;
pub use request::{Descriptor, FormValue, Method, QueryValue};
