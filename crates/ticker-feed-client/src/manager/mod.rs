/*
[INPUT]:  Feed configuration, a transport connector, consumer subscriptions
[OUTPUT]: TickerManager handle, subscription/listener disposers, state + cache access
[POS]:    Manager layer - public entry point for the ticker feed
[UPDATE]: When changing the consumer-facing API or worker ownership
*/

mod cache;
mod registry;
mod router;
mod simulation;
mod state;
mod supervisor;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use ticker_feed_adapter::{Connector, FeedError, Result, TickerMessage, WsConnector};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FeedConfig;
use supervisor::{Command, FeedWorker};

pub use cache::LastValueCache;
pub use registry::TickerCallback;
pub use state::{ConnectionState, StateHandler};

/// Handle to the ticker feed.
///
/// All feed state lives on one background worker; this handle only sends it
/// commands. Dropping the handle shuts the worker down and closes the socket.
pub struct TickerManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    cache: LastValueCache,
    shutdown: CancellationToken,
    next_listener_id: AtomicU64,
}

impl TickerManager {
    /// Start the feed over the real WebSocket transport.
    pub fn start(config: FeedConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Start the feed with a caller-supplied transport. Must be called from
    /// within a tokio runtime.
    pub fn with_connector(config: FeedConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate()?;
        let endpoint = config.endpoint()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| FeedError::Config(format!("ticker feed needs a tokio runtime: {err}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cache = LastValueCache::default();
        let shutdown = CancellationToken::new();

        info!(
            environment = %endpoint.environment(),
            simulate = config.simulate,
            "starting ticker feed"
        );

        let worker = FeedWorker::new(
            config,
            endpoint,
            connector,
            cmd_rx,
            shutdown.clone(),
            state::StateBroadcaster::new(state_tx),
            cache.clone(),
        );
        runtime.spawn(worker.run());

        Ok(Self {
            cmd_tx,
            state_rx,
            cache,
            shutdown,
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Register `callback` for `instrument_id`.
    ///
    /// The first subscriber for an instrument triggers a wire subscribe. A
    /// cached value, if any, is delivered to the new callback right after
    /// registration. The returned handle unsubscribes explicitly; dropping it
    /// leaves the subscription in place.
    pub fn subscribe(&self, instrument_id: &str, callback: TickerCallback) -> Subscription {
        let released = AtomicBool::new(instrument_id.is_empty());
        if instrument_id.is_empty() {
            debug!("subscribe ignored; empty instrument id");
        } else {
            self.command(Command::Subscribe {
                instrument_id: instrument_id.to_string(),
                callback: callback.clone(),
            });
        }

        Subscription {
            instrument_id: instrument_id.to_string(),
            callback,
            cmd_tx: self.cmd_tx.clone(),
            released,
        }
    }

    pub fn subscribe_fn<F>(&self, instrument_id: &str, callback: F) -> Subscription
    where
        F: Fn(&TickerMessage) + Send + Sync + 'static,
    {
        self.subscribe(instrument_id, Arc::new(callback))
    }

    /// Remove `callback` from `instrument_id`. Unknown pairs are ignored.
    pub fn unsubscribe(&self, instrument_id: &str, callback: &TickerCallback) {
        if instrument_id.is_empty() {
            return;
        }
        self.command(Command::Unsubscribe {
            instrument_id: instrument_id.to_string(),
            callback: callback.clone(),
        });
    }

    /// Register a state listener. It is called with the current state first,
    /// then on every transition.
    pub fn on_state_change<F>(&self, handler: F) -> StateListener
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.command(Command::AddStateListener {
            id,
            handler: Arc::new(handler),
        });
        StateListener {
            id,
            cmd_tx: self.cmd_tx.clone(),
            released: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn cached_data(&self, instrument_id: &str) -> Option<TickerMessage> {
        self.cache.get(instrument_id)
    }

    pub fn cache(&self) -> &LastValueCache {
        &self.cache
    }

    /// Replace the auth token. A changed token reconnects an active session.
    pub fn set_auth_token(&self, token: Option<String>) {
        self.command(Command::SetAuthToken(token));
    }

    /// Send an arbitrary JSON message, queueing it until the socket is open.
    pub fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.cmd_tx
            .send(Command::Send { text })
            .map_err(|_| FeedError::Closed)
    }

    pub fn connect(&self) {
        self.command(Command::Connect);
    }

    pub fn reconnect(&self) {
        self.command(Command::Reconnect);
    }

    /// Close the socket and cancel any pending reconnect.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Drop every subscription, cached value and queued message.
    pub fn clear(&self) {
        self.command(Command::Clear);
    }

    /// Wait until the worker has processed every command sent before this call.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Stop the worker, closing the socket with a normal closure.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn command(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("ticker feed worker gone; command dropped");
        }
    }
}

impl fmt::Debug for TickerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickerManager")
            .field("state", &self.state())
            .field("cached", &self.cache.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Drop for TickerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Disposer for one (instrument, callback) registration.
pub struct Subscription {
    instrument_id: String,
    callback: TickerCallback,
    cmd_tx: mpsc::UnboundedSender<Command>,
    released: AtomicBool,
}

impl Subscription {
    /// Remove this registration. Later calls are no-ops.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.cmd_tx.send(Command::Unsubscribe {
            instrument_id: self.instrument_id.clone(),
            callback: self.callback.clone(),
        });
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn callback(&self) -> &TickerCallback {
        &self.callback
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("instrument_id", &self.instrument_id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Disposer for a state listener
#[derive(Debug)]
pub struct StateListener {
    id: u64,
    cmd_tx: mpsc::UnboundedSender<Command>,
    released: AtomicBool,
}

impl StateListener {
    pub fn remove(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.cmd_tx.send(Command::RemoveStateListener { id: self.id });
    }
}
