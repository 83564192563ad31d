use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use crate::config::EngineTunables;
use crate::error::{Error, Result};
use crate::ingest::backoff::Backoff;
use crate::ingest::connectors::{FeedProtocol, SubscriptionOp};
use crate::ingest::dispatcher::{Inbound, MessageDispatcher};
use crate::ingest::liveness::LivenessRecorder;
use crate::ingest::reconciler::{SubscriptionDiff, SubscriptionSet};
use crate::ingest::transport::{Connector, FeedSocket};
use crate::ingest::{Command, ConnectionPhase, StaleReport};
use crate::observability::metrics;
use crate::types::InstrumentSymbol;
use crate::utils::helper::join_symbols;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    pub handshake_timeout: Duration,
    pub ack_timeout: Duration,
    pub ack_retries: u32,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
    pub reconnect_multiplier: f64,
}

impl From<&EngineTunables> for ConnectionSettings {
    fn from(tunables: &EngineTunables) -> Self {
        ConnectionSettings {
            handshake_timeout: tunables.handshake_timeout(),
            ack_timeout: tunables.ack_timeout(),
            ack_retries: tunables.ack_retries,
            heartbeat_interval: tunables.heartbeat_interval(),
            heartbeat_timeout: tunables.heartbeat_timeout(),
            max_reconnect_attempts: tunables.max_reconnect_attempts,
            reconnect_base: tunables.reconnect_base(),
            reconnect_cap: tunables.reconnect_cap(),
            reconnect_multiplier: tunables.reconnect_multiplier,
        }
    }
}

/// Externally observable state of a feed connection.
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    pub session: u64,
    pub active: SubscriptionSet,
    pub consecutive_failures: u32,
}

/// Why a session stopped.
enum Halt {
    Shutdown,
    Fault(Error),
}

impl From<Error> for Halt {
    fn from(e: Error) -> Self {
        Halt::Fault(e)
    }
}

enum SessionEnd {
    Shutdown,
    /// Never reached STREAMING; counts against the reconnect budget.
    Failed(Error),
    /// Lost after STREAMING was reached.
    Dropped(Error),
}

enum AckOutcome {
    Acknowledged,
    Rejected(String),
    TimedOut { attempts: u32 },
}

/// Per-connection state. Lives only as long as one socket.
struct Session {
    id: u64,
    socket: Option<Box<dyn FeedSocket>>,
    active: SubscriptionSet,
    abandoned: Vec<InstrumentSymbol>,
    awaiting_pong_since: Option<Instant>,
    reconcile_pending: bool,
}

impl Session {
    fn new(id: u64, socket: Box<dyn FeedSocket>) -> Self {
        Session {
            id,
            socket: Some(socket),
            active: SubscriptionSet::new(),
            abandoned: Vec::new(),
            awaiting_pong_since: None,
            reconcile_pending: false,
        }
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        match self.socket.as_mut() {
            Some(socket) => socket.send(message).await,
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn recv(&mut self) -> Option<Result<Message>> {
        match self.socket.as_mut() {
            Some(socket) => socket.recv().await,
            None => None,
        }
    }

    async fn release(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if timeout(CLOSE_TIMEOUT, socket.close()).await.is_err() {
                tracing::debug!(session = self.id, "Close handshake timed out, dropping socket");
            }
        }
    }
}

/// Owns the single streaming connection of one feed and drives it through
/// DISCONNECTED -> CONNECTING -> SUBSCRIBING -> STREAMING -> CLOSING ->
/// RECONNECT_WAIT, until shutdown or an exhausted reconnect budget.
///
/// All mutation of connection state happens on this task. Reloads,
/// staleness reports and shutdown requests arrive on the command channel.
pub struct ConnectionManager {
    feed: String,
    protocol: Arc<dyn FeedProtocol>,
    connector: Arc<dyn Connector>,
    dispatcher: MessageDispatcher,
    settings: ConnectionSettings,
    commands: mpsc::Receiver<Command>,
    recorder: LivenessRecorder,
    status: watch::Sender<ConnectionStatus>,
    desired: SubscriptionSet,
    phase: ConnectionPhase,
    backoff: Backoff,
    consecutive_failures: u32,
    session_counter: u64,
    request_counter: u64,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: &str,
        protocol: Arc<dyn FeedProtocol>,
        connector: Arc<dyn Connector>,
        dispatcher: MessageDispatcher,
        settings: ConnectionSettings,
        desired: SubscriptionSet,
        commands: mpsc::Receiver<Command>,
        recorder: LivenessRecorder,
    ) -> (Self, watch::Receiver<ConnectionStatus>) {
        let (status, status_rx) = watch::channel(ConnectionStatus {
            phase: ConnectionPhase::Disconnected,
            session: 0,
            active: SubscriptionSet::new(),
            consecutive_failures: 0,
        });
        let backoff = Backoff::new(
            settings.reconnect_base,
            settings.reconnect_cap,
            settings.reconnect_multiplier,
        );

        let manager = ConnectionManager {
            feed: feed.to_string(),
            protocol,
            connector,
            dispatcher,
            settings,
            commands,
            recorder,
            status,
            desired,
            phase: ConnectionPhase::Disconnected,
            backoff,
            consecutive_failures: 0,
            session_counter: 0,
            request_counter: 0,
        };
        (manager, status_rx)
    }

    /// Runs until shutdown (`Ok`) or until the reconnect budget is spent.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.transition(ConnectionPhase::Connecting);

            match self.run_session().await {
                SessionEnd::Shutdown => {
                    self.transition(ConnectionPhase::ShuttingDown);
                    return Ok(());
                }
                SessionEnd::Dropped(e) => {
                    tracing::warn!(feed = %self.feed, error = %e, "Streaming connection lost");
                }
                SessionEnd::Failed(e) => {
                    self.consecutive_failures += 1;
                    self.status
                        .send_modify(|s| s.consecutive_failures = self.consecutive_failures);
                    tracing::warn!(
                        feed = %self.feed,
                        attempt = self.consecutive_failures,
                        max_attempts = self.settings.max_reconnect_attempts,
                        error = %e,
                        "Connection attempt failed"
                    );

                    if self.consecutive_failures >= self.settings.max_reconnect_attempts {
                        tracing::error!(
                            feed = %self.feed,
                            attempts = self.consecutive_failures,
                            "Reconnect budget exhausted, giving up"
                        );
                        self.transition(ConnectionPhase::ShuttingDown);
                        return Err(Error::MaxReconnectAttemptsExceeded {
                            attempts: self.consecutive_failures,
                        });
                    }
                }
            }

            self.transition(ConnectionPhase::ReconnectWait);
            let delay = self.backoff.next_delay();
            tracing::info!(
                feed = %self.feed,
                delay_ms = delay.as_millis() as u64,
                "Waiting before reconnect"
            );
            if let Err(Halt::Shutdown) = self.wait(delay).await {
                self.transition(ConnectionPhase::ShuttingDown);
                return Ok(());
            }

            self.recorder.record_reconnect();
            metrics::RECONNECTS.with_label_values(&[&self.feed]).inc();
        }
    }

    async fn run_session(&mut self) -> SessionEnd {
        let socket = match self.connect().await {
            Ok(socket) => socket,
            Err(Halt::Shutdown) => return SessionEnd::Shutdown,
            Err(Halt::Fault(e)) => {
                self.record_fault(&e);
                return SessionEnd::Failed(e);
            }
        };

        self.session_counter += 1;
        let mut session = Session::new(self.session_counter, socket);
        self.dispatcher.reset();
        tracing::info!(
            feed = %self.feed,
            venue = self.protocol.venue(),
            session = session.id,
            endpoint = %self.protocol.endpoint(),
            "Connected"
        );

        let mut reached_streaming = false;
        let halt = self.drive(&mut session, &mut reached_streaming).await;

        self.transition(ConnectionPhase::Closing);
        self.recorder.mark_disconnected();
        session.release().await;
        self.publish_active(&SubscriptionSet::new());

        let e = match halt {
            Halt::Shutdown => return SessionEnd::Shutdown,
            Halt::Fault(e) => e,
        };
        self.record_fault(&e);
        if reached_streaming {
            SessionEnd::Dropped(e)
        } else {
            SessionEnd::Failed(e)
        }
    }

    fn record_fault(&self, e: &Error) {
        let kind = e.kind();
        metrics::CONNECTION_ERRORS
            .with_label_values(&[&self.feed, kind.as_str()])
            .inc();
        tracing::debug!(feed = %self.feed, kind = kind.as_str(), error = %e, "Session ended");
    }

    async fn connect(&mut self) -> std::result::Result<Box<dyn FeedSocket>, Halt> {
        let connector = Arc::clone(&self.connector);
        let endpoint = self.protocol.endpoint().to_string();
        let handshake_timeout = self.settings.handshake_timeout;

        let attempt = timeout(handshake_timeout, connector.connect(&endpoint));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(socket)) => Ok(socket),
                        Ok(Err(e)) => Err(Halt::Fault(e)),
                        Err(_) => Err(Halt::Fault(Error::HandshakeTimeout(handshake_timeout))),
                    };
                }
                command = self.commands.recv() => {
                    if let Some(halt) = self.absorb_idle(command) {
                        return Err(halt);
                    }
                }
            }
        }
    }

    async fn drive(&mut self, session: &mut Session, reached_streaming: &mut bool) -> Halt {
        self.transition(ConnectionPhase::Subscribing);
        if let Err(halt) = self.subscribe_all(session).await {
            return halt;
        }

        self.enter_streaming(session);
        *reached_streaming = true;
        self.stream(session).await
    }

    async fn subscribe_all(&mut self, session: &mut Session) -> std::result::Result<(), Halt> {
        let targets: Vec<InstrumentSymbol> = self.desired.iter().cloned().collect();

        for symbol in targets {
            match self.request(session, SubscriptionOp::Subscribe, &symbol).await? {
                AckOutcome::Acknowledged => {
                    session.active.insert(symbol);
                    self.publish_active(&session.active);
                }
                AckOutcome::Rejected(reason) => {
                    let e = Error::SubscriptionRejected {
                        symbol: symbol.exchange().to_string(),
                        reason,
                    };
                    tracing::warn!(feed = %self.feed, error = %e, "Skipping instrument for this session");
                    session.abandoned.push(symbol);
                }
                AckOutcome::TimedOut { attempts } => {
                    return Err(Halt::Fault(Error::SubscriptionTimeout {
                        symbol: symbol.exchange().to_string(),
                        attempts,
                    }));
                }
            }
        }

        tracing::info!(
            feed = %self.feed,
            session = session.id,
            active = session.active.len(),
            rejected = session.abandoned.len(),
            "Subscriptions acknowledged"
        );
        Ok(())
    }

    fn enter_streaming(&mut self, session: &mut Session) {
        self.transition(ConnectionPhase::Streaming);
        self.recorder.mark_streaming(session.id);
        self.backoff.reset();
        self.consecutive_failures = 0;
        let id = session.id;
        self.status.send_modify(|s| {
            s.session = id;
            s.consecutive_failures = 0;
        });
        // Reloads accepted while subscribing are applied now.
        session.reconcile_pending = true;
    }

    async fn stream(&mut self, session: &mut Session) -> Halt {
        let period = self.settings.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if session.reconcile_pending {
                session.reconcile_pending = false;
                if let Err(halt) = self.reconcile(session).await {
                    return halt;
                }
                continue;
            }

            let pong_due = session
                .awaiting_pong_since
                .map(|since| since + self.settings.heartbeat_timeout);

            let step = tokio::select! {
                biased;
                command = self.commands.recv() => self.absorb_in_session(command, session),
                _ = deadline(pong_due) => {
                    Err(Halt::Fault(Error::HeartbeatTimeout(self.settings.heartbeat_timeout)))
                }
                inbound = session.recv() => self.on_inbound(session, inbound).await.map(|_| ()),
                _ = heartbeat.tick() => self.send_heartbeat(session).await,
            };

            if let Err(halt) = step {
                return halt;
            }
        }
    }

    /// Applies the difference between the session's active set and the
    /// desired set without touching unaffected subscriptions.
    async fn reconcile(&mut self, session: &mut Session) -> std::result::Result<(), Halt> {
        let unsubscribe = session.active.difference(&self.desired);
        let subscribe: Vec<InstrumentSymbol> = self
            .desired
            .difference(&session.active)
            .into_iter()
            .filter(|s| !session.abandoned.contains(s))
            .collect();

        if unsubscribe.is_empty() && subscribe.is_empty() {
            return Ok(());
        }

        tracing::info!(
            feed = %self.feed,
            session = session.id,
            subscribe = %join_symbols(&subscribe),
            unsubscribe = %join_symbols(&unsubscribe),
            "Applying subscription changes"
        );

        for symbol in unsubscribe {
            match self.request(session, SubscriptionOp::Unsubscribe, &symbol).await? {
                AckOutcome::Acknowledged => {
                    session.active.remove(&symbol);
                    self.dispatcher.forget(&symbol);
                    self.publish_active(&session.active);
                }
                AckOutcome::Rejected(reason) => {
                    tracing::warn!(feed = %self.feed, symbol = %symbol, reason = %reason, "Unsubscribe rejected");
                }
                AckOutcome::TimedOut { attempts } => {
                    tracing::warn!(feed = %self.feed, symbol = %symbol, attempts, "Unsubscribe not acknowledged");
                }
            }
        }

        for symbol in subscribe {
            match self.request(session, SubscriptionOp::Subscribe, &symbol).await? {
                AckOutcome::Acknowledged => {
                    tracing::info!(feed = %self.feed, symbol = %symbol, "Subscribed");
                    session.active.insert(symbol);
                    self.publish_active(&session.active);
                }
                AckOutcome::Rejected(reason) => {
                    tracing::warn!(feed = %self.feed, symbol = %symbol, reason = %reason, "Subscription rejected");
                    session.abandoned.push(symbol);
                }
                AckOutcome::TimedOut { attempts } => {
                    // retried on the next connection
                    tracing::warn!(feed = %self.feed, symbol = %symbol, attempts, "Subscription not acknowledged");
                    session.abandoned.push(symbol);
                }
            }
        }

        Ok(())
    }

    async fn request(
        &mut self,
        session: &mut Session,
        op: SubscriptionOp,
        symbol: &InstrumentSymbol,
    ) -> std::result::Result<AckOutcome, Halt> {
        let attempts = self.settings.ack_retries + 1;

        for attempt in 1..=attempts {
            let request_id = self.next_request_id();
            let message = self.protocol.subscription_request(op, request_id, symbol);
            session.send(message).await?;
            tracing::debug!(feed = %self.feed, symbol = %symbol, ?op, request_id, attempt, "Sent request");

            match self.await_ack(session, request_id).await? {
                Some((true, _)) => return Ok(AckOutcome::Acknowledged),
                Some((false, reason)) => return Ok(AckOutcome::Rejected(reason)),
                None => {
                    tracing::warn!(
                        feed = %self.feed,
                        symbol = %symbol,
                        ?op,
                        attempt,
                        "Acknowledgement timed out"
                    );
                }
            }
        }

        Ok(AckOutcome::TimedOut { attempts })
    }

    /// Waits for the ack of `request_id`, dispatching everything else that
    /// arrives meanwhile. `None` on timeout.
    async fn await_ack(
        &mut self,
        session: &mut Session,
        request_id: u64,
    ) -> std::result::Result<Option<(bool, String)>, Halt> {
        let deadline = Instant::now() + self.settings.ack_timeout;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Ok(None),
                command = self.commands.recv() => self.absorb_in_session(command, session)?,
                inbound = session.recv() => {
                    if let Inbound::Ack { request_id: id, success, message } =
                        self.on_inbound(session, inbound).await?
                    {
                        if id == request_id {
                            return Ok(Some((success, message)));
                        }
                        tracing::debug!(feed = %self.feed, request_id = id, "Ignoring stale acknowledgement");
                    }
                }
            }
        }
    }

    async fn on_inbound(
        &mut self,
        session: &mut Session,
        inbound: Option<Result<Message>>,
    ) -> std::result::Result<Inbound, Halt> {
        let message = match inbound {
            None => return Err(Halt::Fault(Error::ConnectionClosed)),
            Some(Err(e)) => return Err(Halt::Fault(e)),
            Some(Ok(message)) => message,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    tracing::warn!(feed = %self.feed, "Dropping non-UTF-8 binary frame");
                    return Ok(Inbound::Dropped);
                }
            },
            Message::Pong(_) => {
                session.awaiting_pong_since = None;
                return Ok(Inbound::Heartbeat);
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "no close frame".to_string());
                return Err(Halt::Fault(Error::Transport(format!("closed by peer: {}", reason))));
            }
            // pings are answered by the websocket layer
            Message::Ping(_) | Message::Frame(_) => return Ok(Inbound::Ignored),
        };

        let inbound = self.dispatcher.handle_text(&text, &session.active).await;
        match &inbound {
            Inbound::Accepted => self.recorder.record_message(),
            Inbound::Heartbeat => session.awaiting_pong_since = None,
            _ => {}
        }
        Ok(inbound)
    }

    async fn send_heartbeat(&mut self, session: &mut Session) -> std::result::Result<(), Halt> {
        // the pong deadline in `stream` owns the timeout
        if session.awaiting_pong_since.is_some() {
            return Ok(());
        }

        let request_id = self.next_request_id();
        session.send(self.protocol.heartbeat(request_id)).await?;
        session.awaiting_pong_since = Some(Instant::now());
        Ok(())
    }

    /// Sleeps out the reconnect delay while still honouring commands.
    async fn wait(&mut self, delay: Duration) -> std::result::Result<(), Halt> {
        let deadline = Instant::now() + delay;

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Ok(()),
                command = self.commands.recv() => {
                    if let Some(halt) = self.absorb_idle(command) {
                        return Err(halt);
                    }
                }
            }
        }
    }

    /// Commands outside a live session: only shutdown matters right away.
    fn absorb_idle(&mut self, command: Option<Command>) -> Option<Halt> {
        match command {
            Some(Command::Reload(diff)) => {
                self.accept_reload(diff);
                None
            }
            Some(Command::StaleDetected(_)) => {
                tracing::debug!(feed = %self.feed, phase = ?self.phase, "Ignoring staleness report");
                None
            }
            Some(Command::Shutdown) | None => Some(Halt::Shutdown),
        }
    }

    fn absorb_in_session(
        &mut self,
        command: Option<Command>,
        session: &mut Session,
    ) -> std::result::Result<(), Halt> {
        match command {
            Some(Command::Reload(diff)) => {
                self.accept_reload(diff);
                session.reconcile_pending = true;
                Ok(())
            }
            Some(Command::StaleDetected(report)) => self.on_stale(report, session),
            Some(Command::Shutdown) | None => Err(Halt::Shutdown),
        }
    }

    fn on_stale(&self, report: StaleReport, session: &Session) -> std::result::Result<(), Halt> {
        if self.phase != ConnectionPhase::Streaming || report.snapshot.session != session.id {
            tracing::debug!(
                feed = %self.feed,
                reported_session = report.snapshot.session,
                session = session.id,
                "Ignoring staleness report for another session"
            );
            return Ok(());
        }

        Err(Halt::Fault(Error::Stale {
            elapsed: report.snapshot.since_last_message,
            threshold: report.threshold,
        }))
    }

    fn accept_reload(&mut self, diff: SubscriptionDiff) {
        tracing::info!(
            feed = %self.feed,
            phase = ?self.phase,
            subscribe = %join_symbols(&diff.subscribe),
            unsubscribe = %join_symbols(&diff.unsubscribe),
            "Subscription reload accepted"
        );
        self.desired = diff.target;
    }

    fn transition(&mut self, to: ConnectionPhase) {
        if self.phase == to {
            return;
        }
        tracing::info!(feed = %self.feed, from = ?self.phase, to = ?to, "Connection phase transition");
        self.phase = to;
        metrics::CONNECTION_PHASE
            .with_label_values(&[&self.feed])
            .set(to.as_gauge());
        self.status.send_modify(|s| s.phase = to);
    }

    fn publish_active(&self, active: &SubscriptionSet) {
        metrics::ACTIVE_SUBSCRIPTIONS
            .with_label_values(&[&self.feed])
            .set(active.len() as i64);
        self.status.send_modify(|s| s.active = active.clone());
    }

    fn next_request_id(&mut self) -> u64 {
        self.request_counter += 1;
        self.request_counter
    }
}

/// Resolves at `at`, or never when there is nothing to wait for.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
