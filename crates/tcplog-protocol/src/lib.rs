//! # tcplog-protocol — shared telemetry contract
//!
//! Types, configuration, errors, and port traits shared by the encoder, the
//! transports, and the session manager. It carries no runtime dependencies
//! (no tokio) so the encoding crate can stay pure.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed string ids (SessionId, UserId, DeviceId)
//! - [`attribute`] — AttributeValue + Attribute
//! - [`event`] — Event + EventKind (one tagged union for every record shape)
//! - [`session`] — Session + SessionStatus
//! - [`config`] — TelemetryConfig, SinkKind, per-profile TelemetrySettings
//! - [`ports`] — Transport, TransportFactory, IdentityResolver, Clock
//! - [`error`] — TelemetryError, TelemetryResult

pub mod attribute;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod ports;
pub mod session;

// Re-export the most commonly used types at the crate root.
pub use attribute::{Attribute, AttributeValue};
pub use config::{BuildProfile, ProfileSettings, SinkKind, TelemetryConfig, TelemetrySettings};
pub use error::{TelemetryError, TelemetryResult};
pub use event::{Event, EventKind};
pub use ids::{DeviceId, SessionId, UserId};
pub use ports::{
    Clock, Framing, IdentityResolver, StaticIdentity, SystemClock, Transport, TransportFactory,
    TransportTarget, new_session_guid,
};
pub use session::{Session, SessionStatus};
