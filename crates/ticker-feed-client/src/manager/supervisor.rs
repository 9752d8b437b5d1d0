/*
[INPUT]:  Consumer commands, transport events, session timers, synthetic ticks
[OUTPUT]: Socket lifecycle, wire subscribe/unsubscribe, state transitions, fan-out
[POS]:    Manager layer - single owner of all feed state
[UPDATE]: When changing reconnection, heartbeat, or send-queue semantics
*/

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use ticker_feed_adapter::{
    Connection, Connector, Endpoint, FeedError, NORMAL_CLOSURE, OutboundMessage, Result,
    TickerMessage, TransportEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use super::cache::LastValueCache;
use super::registry::{Departure, Membership, SubscriptionRegistry, TickerCallback, deliver};
use super::router::{self, Routed};
use super::simulation::Simulator;
use super::state::{ConnectionState, StateBroadcaster, StateHandler};
use crate::config::FeedConfig;

pub(crate) enum Command {
    Subscribe {
        instrument_id: String,
        callback: TickerCallback,
    },
    Unsubscribe {
        instrument_id: String,
        callback: TickerCallback,
    },
    Send {
        text: String,
    },
    AddStateListener {
        id: u64,
        handler: StateHandler,
    },
    RemoveStateListener {
        id: u64,
    },
    SetAuthToken(Option<String>),
    Connect,
    Reconnect,
    Disconnect,
    Clear,
    Flush(oneshot::Sender<()>),
}

/// The socket session. Every timer lives inside the variant that needs it,
/// so replacing the link cancels them all.
enum Link {
    Idle,
    Opening {
        attempt: AbortOnDropHandle<Result<Connection>>,
        deadline: Pin<Box<Sleep>>,
    },
    Open {
        connection: Connection,
        heartbeat: Interval,
    },
    Waiting {
        retry: Pin<Box<Sleep>>,
    },
}

enum LinkEvent {
    Opened(Connection),
    OpenFailed(FeedError),
    TimedOut,
    Transport(TransportEvent),
    Lost,
    HeartbeatDue,
    RetryDue,
}

impl Link {
    async fn next_event(&mut self) -> LinkEvent {
        match self {
            Link::Idle => std::future::pending().await,
            Link::Opening { attempt, deadline } => {
                tokio::select! {
                    result = attempt => match result {
                        Ok(Ok(connection)) => LinkEvent::Opened(connection),
                        Ok(Err(err)) => LinkEvent::OpenFailed(err),
                        Err(err) => LinkEvent::OpenFailed(FeedError::WebSocket(err.to_string())),
                    },
                    _ = deadline.as_mut() => LinkEvent::TimedOut,
                }
            }
            Link::Open {
                connection,
                heartbeat,
            } => {
                tokio::select! {
                    event = connection.recv() => match event {
                        Some(event) => LinkEvent::Transport(event),
                        None => LinkEvent::Lost,
                    },
                    _ = heartbeat.tick() => LinkEvent::HeartbeatDue,
                }
            }
            Link::Waiting { retry } => {
                retry.as_mut().await;
                LinkEvent::RetryDue
            }
        }
    }

    fn connection(&self) -> Option<&Connection> {
        match self {
            Link::Open { connection, .. } => Some(connection),
            _ => None,
        }
    }

    fn is_active(&self) -> bool {
        !matches!(self, Link::Idle)
    }
}

pub(crate) struct FeedWorker {
    config: FeedConfig,
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    state: StateBroadcaster,
    registry: SubscriptionRegistry,
    cache: LastValueCache,
    outbox: VecDeque<String>,
    auth_token: Option<String>,
    link: Link,
    simulator: Option<Simulator>,
    ticks_rx: Option<mpsc::UnboundedReceiver<TickerMessage>>,
}

impl FeedWorker {
    pub(crate) fn new(
        config: FeedConfig,
        endpoint: Endpoint,
        connector: Arc<dyn Connector>,
        cmd_rx: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
        state: StateBroadcaster,
        cache: LastValueCache,
    ) -> Self {
        let (simulator, ticks_rx) = if config.simulate {
            let (simulator, ticks_rx) =
                Simulator::new(config.simulation_interval(), config.simulation_max_step_bps);
            (Some(simulator), Some(ticks_rx))
        } else {
            (None, None)
        };
        let auth_token = config.auth_token.clone().filter(|token| !token.is_empty());

        Self {
            config,
            endpoint,
            connector,
            cmd_rx,
            shutdown,
            state,
            registry: SubscriptionRegistry::default(),
            cache,
            outbox: VecDeque::new(),
            auth_token,
            link: Link::Idle,
            simulator,
            ticks_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        self.connect();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("ticker feed shutdown requested");
                    break;
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                event = self.link.next_event() => {
                    self.handle_link_event(event);
                }
                Some(tick) = next_tick(&mut self.ticks_rx) => {
                    router::deliver_ticker(tick, &self.cache, &self.registry);
                }
            }
        }

        self.disconnect();
        info!("ticker feed worker stopped");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe {
                instrument_id,
                callback,
            } => self.subscribe(instrument_id, callback),
            Command::Unsubscribe {
                instrument_id,
                callback,
            } => self.unsubscribe(&instrument_id, &callback),
            Command::Send { text } => self.send_text(text),
            Command::AddStateListener { id, handler } => self.state.add_listener(id, handler),
            Command::RemoveStateListener { id } => self.state.remove_listener(id),
            Command::SetAuthToken(token) => self.set_auth_token(token),
            Command::Connect => self.connect(),
            Command::Reconnect => self.reconnect(),
            Command::Disconnect => self.disconnect(),
            Command::Clear => self.clear(),
            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened(connection) => self.on_open(connection),
            LinkEvent::OpenFailed(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "ticker feed connection failed");
                self.link = Link::Idle;
                self.state.transition(ConnectionState::Error);
                self.schedule_reconnect();
            }
            LinkEvent::TimedOut => {
                let err = FeedError::Timeout {
                    timeout_ms: self.config.connect_timeout_ms,
                };
                warn!(error = %err, retryable = err.is_retryable(), "ticker feed connection timed out");
                self.link = Link::Idle;
                self.state.transition(ConnectionState::Error);
                self.schedule_reconnect();
            }
            LinkEvent::Transport(event) => self.on_transport(event),
            LinkEvent::Lost => self.on_close(None, "transport ended"),
            LinkEvent::HeartbeatDue => {
                if let Some(connection) = self.link.connection() {
                    match connection.send_message(&OutboundMessage::Ping) {
                        Ok(()) => debug!("heartbeat ping sent"),
                        Err(err) => debug!(error = %err, "heartbeat ping not sent"),
                    }
                }
            }
            LinkEvent::RetryDue => {
                self.link = Link::Idle;
                self.connect();
            }
        }
    }

    fn connect(&mut self) {
        if matches!(self.link, Link::Opening { .. } | Link::Open { .. }) {
            debug!(state = %self.state.current(), "connect ignored; connection already in progress");
            return;
        }

        if self.simulator.is_some() {
            if self.state.current().is_connected() {
                debug!("connect ignored; simulated feed already running");
                return;
            }
            self.state.transition(ConnectionState::Connecting);
            self.state.transition(ConnectionState::Connected);
            self.resume_simulation();
            return;
        }

        self.state.transition(ConnectionState::Connecting);

        let url = self.endpoint.connection_url(self.auth_token.as_deref());
        info!(
            environment = %self.endpoint.environment(),
            host = url.host_str().unwrap_or_default(),
            "connecting to ticker feed"
        );

        let connector = self.connector.clone();
        let attempt = tokio::spawn(async move { connector.connect(&url).await });
        self.link = Link::Opening {
            attempt: AbortOnDropHandle::new(attempt),
            deadline: Box::pin(sleep(self.config.connect_timeout())),
        };
    }

    fn on_open(&mut self, connection: Connection) {
        let period = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.link = Link::Open {
            connection,
            heartbeat,
        };

        self.state.transition(ConnectionState::Connected);
        info!("ticker feed connected");

        self.flush_outbox();
        self.resubscribe_all();
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Error(err) => {
                warn!(error = %err, "ticker feed socket error");
                self.state.transition(ConnectionState::Error);
            }
            TransportEvent::Closed { code, reason } => self.on_close(code, &reason),
            frame => {
                let Some(message) = router::decode(&frame) else {
                    return;
                };
                match router::route(message, &self.cache, &self.registry) {
                    Routed::PingRequested => {
                        if let Some(connection) = self.link.connection() {
                            if let Err(err) = connection.send_message(&OutboundMessage::Pong) {
                                debug!(error = %err, "heartbeat pong not sent");
                            }
                        }
                    }
                    Routed::PongIgnored | Routed::Unkeyed => {}
                    Routed::Ticker {
                        instrument_id,
                        delivered,
                    } => {
                        debug!(%instrument_id, delivered, "ticker update routed");
                    }
                }
            }
        }
    }

    /// Close handling for unrequested closures. Intentional closes drop the
    /// link before any close event can be observed.
    fn on_close(&mut self, code: Option<u16>, reason: &str) {
        self.link = Link::Idle;
        self.state.transition(ConnectionState::Disconnected);
        info!(?code, reason, "ticker feed connection closed");
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect_delay();
        self.link = Link::Waiting {
            retry: Box::pin(sleep(delay)),
        };
        self.state.transition(ConnectionState::Reconnecting);
        info!(delay_ms = self.config.reconnect_delay_ms, "ticker feed reconnect scheduled");
    }

    fn disconnect(&mut self) {
        let link = std::mem::replace(&mut self.link, Link::Idle);
        if let Some(connection) = link.connection() {
            connection.close(NORMAL_CLOSURE, "client disconnect");
        }
        drop(link);
        if let Some(simulator) = self.simulator.as_mut() {
            simulator.stop_all();
        }
        self.state.transition(ConnectionState::Disconnected);
    }

    fn reconnect(&mut self) {
        info!("ticker feed reconnect requested");
        self.disconnect();
        self.connect();
    }

    fn set_auth_token(&mut self, token: Option<String>) {
        let token = token.filter(|token| !token.is_empty());
        if token == self.auth_token {
            return;
        }
        self.auth_token = token;

        if self.simulator.is_some() || !self.link.is_active() {
            debug!("auth token updated; applies on next connect");
            return;
        }
        info!("auth token changed; reconnecting");
        self.reconnect();
    }

    fn subscribe(&mut self, instrument_id: String, callback: TickerCallback) {
        let membership = self.registry.add(&instrument_id, callback.clone());
        if membership == Membership::AlreadyRegistered {
            debug!(%instrument_id, "callback already subscribed");
            return;
        }

        let cached = self.cache.get(&instrument_id);
        if let Some(cached) = cached.as_ref() {
            deliver(&instrument_id, &callback, cached);
        }

        if membership == Membership::First {
            if let Some(simulator) = self.simulator.as_mut() {
                if self.state.current().is_connected() {
                    simulator.start(&instrument_id, cached.as_ref());
                }
            } else {
                self.send_subscription(&OutboundMessage::subscribe(&instrument_id));
            }
        } else {
            debug!(
                %instrument_id,
                subscribers = self.registry.subscriber_count(&instrument_id),
                "subscriber joined"
            );
        }
    }

    fn unsubscribe(&mut self, instrument_id: &str, callback: &TickerCallback) {
        match self.registry.remove(instrument_id, callback) {
            Departure::Last => {
                if let Some(simulator) = self.simulator.as_mut() {
                    simulator.stop(instrument_id);
                } else {
                    self.send_subscription(&OutboundMessage::unsubscribe(instrument_id));
                }
            }
            Departure::Left => debug!(%instrument_id, "subscriber left"),
            Departure::NotRegistered => debug!(%instrument_id, "unsubscribe ignored; not subscribed"),
        }
    }

    /// Subscription requests go out only on an open socket; the replay on the
    /// next open covers anything issued while offline.
    fn send_subscription(&self, message: &OutboundMessage) {
        let Some(connection) = self.link.connection() else {
            debug!("subscription change deferred until connected");
            return;
        };
        if let Err(err) = connection.send_message(message) {
            debug!(error = %err, "subscription change not sent");
        }
    }

    fn send_text(&mut self, text: String) {
        match self.link.connection() {
            Some(connection) => {
                if connection.send_text(text.clone()).is_err() {
                    self.outbox.push_back(text);
                }
            }
            None => {
                self.outbox.push_back(text);
                debug!(queued = self.outbox.len(), "message queued until connected");
            }
        }
    }

    fn flush_outbox(&mut self) {
        let Some(connection) = self.link.connection() else {
            return;
        };
        let mut flushed = 0usize;
        while let Some(text) = self.outbox.pop_front() {
            if connection.send_text(text.clone()).is_err() {
                self.outbox.push_front(text);
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            info!(flushed, "queued messages sent");
        }
    }

    fn resubscribe_all(&self) {
        let Some(connection) = self.link.connection() else {
            return;
        };
        let instruments = self.registry.active_instruments();
        for instrument_id in &instruments {
            if let Err(err) = connection.send_message(&OutboundMessage::subscribe(instrument_id)) {
                warn!(%instrument_id, error = %err, "resubscribe failed");
                return;
            }
        }
        if !instruments.is_empty() {
            info!(count = instruments.len(), "resubscribed active instruments");
        }
    }

    /// Restart a synthetic feed for every active instrument, continuing from
    /// its cached value.
    fn resume_simulation(&mut self) {
        let Some(simulator) = self.simulator.as_mut() else {
            return;
        };
        let instruments = self.registry.active_instruments();
        for instrument_id in &instruments {
            simulator.start(instrument_id, self.cache.get(instrument_id).as_ref());
        }
        if !instruments.is_empty() {
            info!(count = instruments.len(), "simulated feeds resumed");
        }
    }

    fn clear(&mut self) {
        self.registry.clear();
        self.cache.clear();
        self.outbox.clear();
        if let Some(simulator) = self.simulator.as_mut() {
            simulator.stop_all();
        }
        info!("ticker feed state cleared");
    }
}

async fn next_tick(
    ticks_rx: &mut Option<mpsc::UnboundedReceiver<TickerMessage>>,
) -> Option<TickerMessage> {
    match ticks_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
