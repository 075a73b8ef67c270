use std::sync::Arc;

use tcplog_encoding::{SessionHeader, encode_header, encode_record, encode_trailer};
use tcplog_protocol::{
    Attribute, Clock, DeviceId, Event, EventKind, Framing, IdentityResolver, Session,
    SessionId, SessionStatus, StaticIdentity, SystemClock, TelemetryConfig, TelemetryError,
    TelemetryResult, Transport, TransportFactory, TransportTarget, UserId,
};
use tcplog_transport::factory_for;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

#[derive(Default)]
pub struct SessionManagerBuilder {
    config: Option<TelemetryConfig>,
    identity: Option<Arc<dyn IdentityResolver>>,
    clock: Option<Arc<dyn Clock>>,
    transports: Option<Arc<dyn TransportFactory>>,
}

impl SessionManagerBuilder {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::default()
        }
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Override the transport chosen from the config's sink kind.
    pub fn transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Validates the config; an invalid one yields `ConfigInvalid` and no
    /// manager.
    pub fn build(self) -> TelemetryResult<SessionManager> {
        let config = self
            .config
            .ok_or_else(|| TelemetryError::ConfigInvalid("missing configuration".into()))?;
        if let Err(error) = config.validate() {
            warn!(%error, "telemetry configuration rejected");
            return Err(error);
        }

        let transports = self.transports.unwrap_or_else(|| factory_for(&config));
        Ok(SessionManager {
            identity: self
                .identity
                .unwrap_or_else(|| Arc::new(StaticIdentity::new("anonymous"))),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            transports,
            config,
            state: Mutex::new(ManagerState::default()),
        })
    }
}

#[derive(Default)]
struct ManagerState {
    user_override: Option<UserId>,
    pending_session_id: Option<SessionId>,
    last_session: Option<Session>,
    active: Option<ActiveSession>,
}

struct ActiveSession {
    session: Session,
    header: SessionHeader,
    transport: Box<dyn Transport>,
    framing: Framing,
    /// Events written so far, the session-start event included.
    events_written: u64,
}

impl ActiveSession {
    /// Trailer, flush, close. The handle is closed even when the trailer or
    /// flush fails; the first failure is returned.
    async fn finish(mut self) -> (Session, TelemetryResult<()>) {
        let trailer = encode_trailer(self.framing, &self.header);
        let mut result = self.transport.write(trailer.as_bytes()).await;
        if result.is_ok() {
            result = self.transport.flush().await;
        }
        let closed = self.transport.close().await;
        self.session.active = false;
        (self.session, result.and(closed))
    }
}

/// Gates all event emission behind an explicit session.
///
/// Every state-changing call holds one async mutex for its whole duration,
/// so starts, ends, and records never interleave on the transport.
///
/// Call [`SessionManager::end_session`] before the runtime shuts down.
/// Dropping a manager with a live session finishes it synchronously on a
/// multi-thread runtime. On a current-thread runtime the finish is spawned
/// and is lost if the runtime stops first; outside a runtime the transport
/// is released without a trailer.
pub struct SessionManager {
    config: TelemetryConfig,
    identity: Arc<dyn IdentityResolver>,
    clock: Arc<dyn Clock>,
    transports: Arc<dyn TransportFactory>,
    state: Mutex<ManagerState>,
}

impl SessionManager {
    pub fn builder(config: TelemetryConfig) -> SessionManagerBuilder {
        SessionManagerBuilder::new(config)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub async fn status(&self) -> SessionStatus {
        if self.state.lock().await.active.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::Idle
        }
    }

    /// The live session, or the most recently ended one (inert).
    pub async fn session(&self) -> Option<Session> {
        let state = self.state.lock().await;
        match &state.active {
            Some(active) => Some(active.session.clone()),
            None => state.last_session.clone(),
        }
    }

    pub async fn user_id(&self) -> UserId {
        let state = self.state.lock().await;
        match &state.active {
            Some(active) => active.session.user_id.clone(),
            None => self.resolve_user(&state),
        }
    }

    /// Id of the live session, else the id queued with `set_session_id`,
    /// else the id of the last session.
    pub async fn session_id(&self) -> Option<SessionId> {
        let state = self.state.lock().await;
        if let Some(active) = &state.active {
            return Some(active.session.session_id.clone());
        }
        state
            .pending_session_id
            .clone()
            .or_else(|| state.last_session.as_ref().map(|s| s.session_id.clone()))
    }

    fn resolve_user(&self, state: &ManagerState) -> UserId {
        state
            .user_override
            .clone()
            .unwrap_or_else(|| self.identity.user_id())
    }

    /// Identify the user for the next session. Rejected while a session is
    /// active.
    pub async fn set_user_id(&self, user_id: impl Into<UserId>) -> TelemetryResult<()> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            warn!("set_user_id called while a session is in progress, ignoring");
            return Err(TelemetryError::CalledOutOfOrder(
                "set_user_id during an active session".into(),
            ));
        }
        let user_id = user_id.into();
        info!(user_id = %user_id, "user id set");
        state.user_override = Some(user_id);
        Ok(())
    }

    /// Use `session_id` for the next session instead of generating one.
    /// Rejected while a session is active.
    pub async fn set_session_id(&self, session_id: impl Into<SessionId>) -> TelemetryResult<()> {
        let mut state = self.state.lock().await;
        if state.active.is_some() {
            warn!("set_session_id called while a session is in progress, ignoring");
            return Err(TelemetryError::CalledOutOfOrder(
                "set_session_id during an active session".into(),
            ));
        }
        let session_id = session_id.into();
        info!(session_id = %session_id, "session id set");
        state.pending_session_id = Some(session_id);
        Ok(())
    }

    /// Start a session, ending the current one first.
    ///
    /// On any failure the manager is left idle and nothing more is written.
    #[instrument(skip(self, attributes), fields(attributes = attributes.len()))]
    pub async fn start_session(&self, attributes: Vec<Attribute>) -> TelemetryResult<Session> {
        let mut state = self.state.lock().await;
        if let Some(previous) = state.active.take() {
            let (ended, result) = previous.finish().await;
            if let Err(error) = result {
                warn!(session_id = %ended.session_id, %error, "previous session ended uncleanly");
            }
            state.last_session = Some(ended);
        }

        let started_at = self.clock.now();
        let user_id = self.resolve_user(&state);
        let session_id = match &state.pending_session_id {
            Some(id) => id.clone(),
            None if self.config.generate_session_guid => self.identity.new_session_guid(),
            None => SessionId::derived(&user_id, started_at),
        };
        let device_id: Option<DeviceId> = self
            .config
            .generate_session_guid
            .then(|| self.identity.device_id());

        let target = TransportTarget {
            session_id: session_id.clone(),
        };
        let mut transport = match self.transports.open(&target).await {
            Ok(transport) => transport,
            Err(error) => {
                error!(session_id = %session_id, %error, "failed to open transport, session not started");
                return Err(error);
            }
        };

        let session = Session {
            session_id,
            user_id,
            device_id,
            started_at,
            active: true,
        };
        let header = SessionHeader::from_session(&session, self.config.timestamp_events);
        let framing = transport.framing();
        let bytes = encode_header(framing, &header, &Event::session_start(attributes));

        if let Err(error) = transport.write(bytes.as_bytes()).await {
            error!(session_id = %session.session_id, %error, "failed to write session header");
            if let Err(close_error) = transport.close().await {
                warn!(%close_error, "failed to close transport after header failure");
            }
            return Err(error);
        }

        state.pending_session_id = None;
        info!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            framing = ?framing,
            "session started"
        );
        state.last_session = Some(session.clone());
        state.active = Some(ActiveSession {
            session: session.clone(),
            header,
            transport,
            framing,
            events_written: 1,
        });
        Ok(session)
    }

    /// End the active session. A no-op when idle.
    ///
    /// The manager is idle afterwards even if the trailer could not be
    /// written; that failure is returned.
    #[instrument(skip(self))]
    pub async fn end_session(&self) -> TelemetryResult<()> {
        let mut state = self.state.lock().await;
        let Some(active) = state.active.take() else {
            debug!("end_session called with no active session");
            return Ok(());
        };
        let events = active.events_written;
        let (ended, result) = active.finish().await;
        match &result {
            Ok(()) => info!(
                session_id = %ended.session_id,
                user_id = %ended.user_id,
                events,
                "session ended"
            ),
            Err(error) => error!(session_id = %ended.session_id, %error, "session ended with a transport error"),
        }
        state.last_session = Some(ended);
        result
    }

    /// Push buffered bytes down to the transport. A no-op when idle.
    pub async fn flush_events(&self) -> TelemetryResult<()> {
        let mut state = self.state.lock().await;
        match state.active.as_mut() {
            Some(active) => {
                active.transport.flush().await?;
                debug!(session_id = %active.session.session_id, "events flushed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Encode `event` and send it on the active session.
    ///
    /// Idle managers drop the event with `CalledOutOfOrder`. A transport
    /// failure drops the event with `WriteFailed`; the session stays active
    /// until the caller ends it.
    pub async fn record(&self, event: Event) -> TelemetryResult<()> {
        let mut state = self.state.lock().await;
        let Some(active) = state.active.as_mut() else {
            warn!(event = event.name(), "record called before start_session, ignoring");
            return Err(TelemetryError::CalledOutOfOrder(format!(
                "{} recorded without an active session",
                event.name()
            )));
        };

        let bytes = encode_record(active.framing, &event, active.events_written == 0);
        match active.transport.write(bytes.as_bytes()).await {
            Ok(()) => {
                active.events_written += 1;
                debug!(
                    session_id = %active.session.session_id,
                    event = event.name(),
                    attributes = event.attributes.len(),
                    "event recorded"
                );
                Ok(())
            }
            Err(error) => {
                error!(
                    session_id = %active.session.session_id,
                    event = event.name(),
                    %error,
                    "event dropped"
                );
                Err(error)
            }
        }
    }

    pub async fn record_event(
        &self,
        name: impl Into<String>,
        attributes: Vec<Attribute>,
    ) -> TelemetryResult<()> {
        self.record(Event::new(name).with_attributes(attributes))
            .await
    }

    pub async fn record_item_purchase(
        &self,
        item_id: impl Into<String>,
        item_quantity: i64,
        attributes: Vec<Attribute>,
    ) -> TelemetryResult<()> {
        self.record(Event::item_purchase(item_id, item_quantity).with_attributes(attributes))
            .await
    }

    /// Item purchase priced in an in-game currency.
    pub async fn record_item_purchase_priced(
        &self,
        item_id: impl Into<String>,
        currency: impl Into<String>,
        per_item_cost: i64,
        item_quantity: i64,
    ) -> TelemetryResult<()> {
        self.record(Event::from_kind(EventKind::ItemPurchase {
            item_id: item_id.into(),
            item_quantity,
            currency: Some(currency.into()),
            per_item_cost: Some(per_item_cost),
        }))
        .await
    }

    pub async fn record_currency_purchase(
        &self,
        game_currency_type: impl Into<String>,
        game_currency_amount: i64,
        attributes: Vec<Attribute>,
    ) -> TelemetryResult<()> {
        self.record(
            Event::currency_purchase(game_currency_type, game_currency_amount)
                .with_attributes(attributes),
        )
        .await
    }

    /// Currency bought with real money.
    pub async fn record_real_currency_purchase(
        &self,
        game_currency_type: impl Into<String>,
        game_currency_amount: i64,
        real_currency_type: impl Into<String>,
        real_money_cost: f64,
        payment_provider: impl Into<String>,
    ) -> TelemetryResult<()> {
        self.record(Event::from_kind(EventKind::CurrencyPurchase {
            game_currency_type: game_currency_type.into(),
            game_currency_amount,
            real_currency_type: Some(real_currency_type.into()),
            real_money_cost: Some(real_money_cost),
            payment_provider: Some(payment_provider.into()),
        }))
        .await
    }

    pub async fn record_currency_given(
        &self,
        game_currency_type: impl Into<String>,
        game_currency_amount: i64,
        attributes: Vec<Attribute>,
    ) -> TelemetryResult<()> {
        self.record(
            Event::currency_given(game_currency_type, game_currency_amount)
                .with_attributes(attributes),
        )
        .await
    }

    pub async fn record_error(
        &self,
        error: impl Into<String>,
        attributes: Vec<Attribute>,
    ) -> TelemetryResult<()> {
        self.record(Event::error(error).with_attributes(attributes))
            .await
    }

    pub async fn record_progress(
        &self,
        progress_type: impl Into<String>,
        progress_hierarchy: impl Into<String>,
        attributes: Vec<Attribute>,
    ) -> TelemetryResult<()> {
        self.record(
            Event::progress(progress_type, progress_hierarchy).with_attributes(attributes),
        )
        .await
    }
}

fn log_ended_on_drop(ended: &Session, result: &TelemetryResult<()>) {
    match result {
        Ok(()) => info!(session_id = %ended.session_id, "session ended on drop"),
        Err(error) => {
            warn!(session_id = %ended.session_id, %error, "session ended on drop with a transport error")
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        let Some(active) = self.state.get_mut().active.take() else {
            return;
        };
        let session_id = active.session.session_id.clone();
        let Ok(handle) = Handle::try_current() else {
            warn!(
                %session_id,
                "session manager dropped outside a runtime, trailer not written"
            );
            return;
        };
        match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                let (ended, result) =
                    tokio::task::block_in_place(|| handle.block_on(active.finish()));
                log_ended_on_drop(&ended, &result);
            }
            _ => {
                // A current-thread runtime cannot block here; the trailer is
                // written only if the runtime keeps running.
                warn!(
                    %session_id,
                    "session manager dropped on a current-thread runtime, finishing in the background"
                );
                let _ = handle.spawn(async move {
                    let (ended, result) = active.finish().await;
                    log_ended_on_drop(&ended, &result);
                });
            }
        }
    }
}
