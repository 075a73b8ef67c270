//! Boundary ports between the session manager and its collaborators.
//!
//! Transports and identity/time sources are injected behind these traits so
//! a session manager can be built and tested without sockets, files, or the
//! wall clock.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Sessions hold their transport as `Box<dyn Transport>`.

use crate::error::TelemetryResult;
use crate::ids::{DeviceId, SessionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a transport expects session output to be framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One JSON document per session: header, comma-separated events array,
    /// trailer.
    Document,
    /// One standalone JSON object per line.
    Lines,
}

/// What a transport is being opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportTarget {
    pub session_id: SessionId,
}

/// An open delivery handle. Owned by exactly one session at a time.
#[async_trait]
pub trait Transport: Send {
    fn framing(&self) -> Framing;

    /// Hand all of `bytes` to the OS before returning.
    async fn write(&mut self, bytes: &[u8]) -> TelemetryResult<()>;

    async fn flush(&mut self) -> TelemetryResult<()>;

    /// Release the handle. Further writes fail.
    async fn close(&mut self) -> TelemetryResult<()>;
}

/// Opens transports for new sessions.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(&self, target: &TransportTarget) -> TelemetryResult<Box<dyn Transport>>;
}

/// Supplies user and device identity plus fresh session GUIDs.
pub trait IdentityResolver: Send + Sync {
    fn user_id(&self) -> UserId;

    fn device_id(&self) -> DeviceId;

    fn new_session_guid(&self) -> SessionId {
        new_session_guid()
    }
}

/// Random v4 GUID in canonical braced, upper-case form.
pub fn new_session_guid() -> SessionId {
    SessionId::from_string(uuid::Uuid::new_v4().braced().to_string().to_uppercase())
}

/// Identity fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user_id: UserId,
    device_id: DeviceId,
}

impl StaticIdentity {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: DeviceId::from_string(uuid::Uuid::new_v4().simple().to_string()),
        }
    }

    pub fn with_device_id(mut self, device_id: impl Into<DeviceId>) -> Self {
        self.device_id = device_id.into();
        self
    }
}

impl IdentityResolver for StaticIdentity {
    fn user_id(&self) -> UserId {
        self.user_id.clone()
    }

    fn device_id(&self) -> DeviceId {
        self.device_id.clone()
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
