//! Realtime chat client with automatic reconnection.
//!
//! ARCHITECTURE
//! ============
//! `ChatClient` is a handle owned by the application's composition root. Each
//! `connect()` spawns one driver task that owns the transport and the backoff
//! sleep; the handle talks to it through an unbounded command channel and a
//! shutdown signal. Listener callbacks run on the driver task, in the order
//! the transport delivered the frames.
//!
//! LIFECYCLE
//! =========
//! 1. `connect(url)` stops any previous driver and spawns a new one
//! 2. Driver opens a transport, rejoins the last project, notifies
//!    `connection_status {connected: true}`
//! 3. Unplanned loss notifies `{connected: false}` and consults the
//!    reconnection policy; the driver sleeps, then reopens against the same URL
//! 4. At the ceiling the driver emits one terminal status with an error and exits
//! 5. `disconnect()` stops the driver, cancelling any pending backoff
//!
//! ERROR HANDLING
//! ==============
//! Public methods never fail. Acting while disconnected returns `false` and
//! logs a warning; transport failures reach `error` listeners.

pub mod listeners;
pub mod reconnect;
pub mod transport;

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::protocol::{ClientFrame, ErrorPayload, OutgoingMessage, ServerFrame};

pub use listeners::{ClientEvent, ConnectionStatus, EventKind, ListenerId, Listeners, Subscription};
pub use reconnect::{ReconnectPolicy, ReconnectState, Step};
pub use transport::{ClientError, Connector, Transport, WsConnector};

/// Server base URL used when the caller has no configuration of its own.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// Error reported when `connect()` runs without a Tokio runtime.
pub const NO_RUNTIME_MESSAGE: &str = "connect requires a running tokio runtime";

// =============================================================================
// CLIENT HANDLE
// =============================================================================

pub struct ChatClient {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    listeners: Listeners,
    url: Option<String>,
    driver: Option<Driver>,
}

/// Handle to one running driver task.
struct Driver {
    shared: Arc<DriverShared>,
    commands: mpsc::UnboundedSender<ClientFrame>,
    shutdown: oneshot::Sender<()>,
}

thread_local! {
    /// Address of the `DriverShared` whose status gate this thread holds.
    static GATE_HOLDER: Cell<usize> = const { Cell::new(0) };
}

/// State written by the driver and read by the handle.
#[derive(Default)]
struct DriverShared {
    connected: AtomicBool,
    /// Set once the handle has let go of this driver; silences late notifications.
    stopped: AtomicBool,
    /// Serializes `connected` flips with the status events announcing them,
    /// so a handle-side disconnect cannot be overtaken by a driver-side connect.
    gate: Mutex<()>,
    state: Mutex<ReconnectState>,
    /// Last project joined on this driver, re-sent after every reconnect.
    room: Mutex<Option<String>>,
}

impl DriverShared {
    /// Run `f` holding the status gate. Reentrant for a listener that calls
    /// back into the client while the driver is delivering.
    fn gated<R>(&self, f: impl FnOnce() -> R) -> R {
        let me = std::ptr::from_ref(self).addr();
        if GATE_HOLDER.with(Cell::get) == me {
            return f();
        }
        let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = GATE_HOLDER.with(|h| h.replace(me));
        let out = f();
        GATE_HOLDER.with(|h| h.set(previous));
        out
    }

    fn state(&self) -> ReconnectState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition<R>(&self, f: impl FnOnce(ReconnectState) -> (ReconnectState, R)) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (next, out) = f(*state);
        *state = next;
        out
    }

    fn room(&self) -> Option<String> {
        self.room.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_room(&self, project_id: &str) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = Some(project_id.to_owned());
    }
}

impl ChatClient {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector, policy: ReconnectPolicy::default(), listeners: Listeners::new(), url: None, driver: None }
    }

    /// Client speaking WebSocket to the relay server.
    #[must_use]
    pub fn websocket() -> Self {
        Self::new(Arc::new(WsConnector))
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tear down any existing connection and connect to `url`.
    ///
    /// The URL is kept for reconnection. Returns `self` for chaining. Outside
    /// a Tokio runtime nothing is started and `error` listeners are told why.
    pub fn connect(&mut self, url: impl Into<String>) -> &mut Self {
        let url = url.into();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%url, "chat: connect called outside a tokio runtime");
            self.listeners.notify(&ClientEvent::Error(ErrorPayload { message: NO_RUNTIME_MESSAGE.to_owned() }));
            return self;
        };
        if let Some(previous) = self.driver.take() {
            debug!("chat: replacing existing connection");
            self.stop(previous);
        }

        let shared = Arc::new(DriverShared::default());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let ctx = DriverContext {
            connector: Arc::clone(&self.connector),
            policy: self.policy,
            listeners: self.listeners.clone(),
            shared: Arc::clone(&shared),
            url: url.clone(),
        };
        runtime.spawn(run_driver(ctx, commands_rx, shutdown_rx));

        info!(%url, "chat: connecting");
        self.url = Some(url);
        self.driver = Some(Driver { shared, commands: commands_tx, shutdown: shutdown_tx });
        self
    }

    /// Close the connection and cancel any pending reconnect. Terminal: no
    /// automatic reconnection follows.
    pub fn disconnect(&mut self) {
        if let Some(driver) = self.driver.take() {
            info!("chat: disconnecting");
            self.stop(driver);
        }
    }

    #[must_use]
    pub fn is_socket_connected(&self) -> bool {
        self.driver
            .as_ref()
            .is_some_and(|d| d.shared.connected.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn reconnect_state(&self) -> ReconnectState {
        self.driver
            .as_ref()
            .map_or(ReconnectState::Idle, |d| d.shared.state())
    }

    /// URL passed to the most recent `connect()`.
    #[must_use]
    pub fn last_url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Move this socket into the room for `project_id`.
    ///
    /// Returns `false` without emitting anything when not connected.
    pub fn join_project(&self, project_id: &str) -> bool {
        let Some(driver) = self.connected_driver() else {
            warn!(project_id, "chat: cannot join project, socket not connected");
            return false;
        };
        info!(project_id, "chat: joining project");
        if driver.commands.send(ClientFrame::JoinProject(project_id.to_owned())).is_err() {
            return false;
        }
        driver.shared.set_room(project_id);
        true
    }

    /// Emit a chat message. Fire-and-forget; the server echoes the stored
    /// record back as `new_message`.
    ///
    /// Returns `false` without emitting anything when not connected.
    pub fn send_message(&self, message: OutgoingMessage) -> bool {
        let Some(driver) = self.connected_driver() else {
            warn!(project_id = %message.project_id, "chat: cannot send message, socket not connected");
            return false;
        };
        debug!(project_id = %message.project_id, "chat: sending message");
        driver.commands.send(ClientFrame::ChatMessage(message)).is_ok()
    }

    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.listeners.add(kind, callback)
    }

    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        self.listeners.remove(kind, id)
    }

    #[must_use]
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    fn connected_driver(&self) -> Option<&Driver> {
        self.driver
            .as_ref()
            .filter(|d| d.shared.connected.load(Ordering::Acquire))
    }

    fn stop(&self, driver: Driver) {
        let Driver { shared, shutdown, .. } = driver;
        shared.gated(|| {
            shared.stopped.store(true, Ordering::Release);
            let was_connected = shared.connected.swap(false, Ordering::AcqRel);
            shared.transition(|state| (state.on_manual_disconnect(), ()));
            let _ = shutdown.send(());
            if was_connected {
                self.listeners
                    .notify(&ClientEvent::ConnectionStatus(ConnectionStatus::disconnected()));
            }
        });
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.shared.stopped.store(true, Ordering::Release);
            let _ = driver.shutdown.send(());
        }
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct DriverContext {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    listeners: Listeners,
    shared: Arc<DriverShared>,
    url: String,
}

enum Exit {
    /// The handle asked the driver to stop.
    Shutdown,
    /// The connection dropped without being asked to.
    Lost,
}

impl DriverContext {
    fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    fn notify(&self, event: ClientEvent) {
        self.shared.gated(|| {
            if !self.is_stopped() {
                self.listeners.notify(&event);
            }
        });
    }

    fn notify_error(&self, message: String) {
        self.notify(ClientEvent::Error(ErrorPayload { message }));
    }

    async fn on_connected(&self, transport: &mut dyn Transport) {
        if let Some(project_id) = self.shared.room() {
            match ClientFrame::JoinProject(project_id.clone()).encode() {
                Ok(text) => {
                    if let Err(e) = transport.send(text).await {
                        warn!(%project_id, error = %e, "chat: rejoin failed");
                    } else {
                        info!(%project_id, "chat: rejoined project");
                    }
                }
                Err(e) => warn!(error = %e, "chat: failed to encode rejoin"),
            }
        }

        self.shared.gated(|| {
            if self.is_stopped() {
                return;
            }
            self.shared.transition(|state| (state.on_connected(), ()));
            self.shared.connected.store(true, Ordering::Release);
            info!(url = %self.url, "chat: connected");
            self.listeners
                .notify(&ClientEvent::ConnectionStatus(ConnectionStatus::connected()));
        });
    }

    /// Record a lost or failed connection and announce it if the socket was up.
    fn on_lost(&self) -> Option<Step> {
        self.shared.gated(|| {
            if self.is_stopped() {
                return None;
            }
            let step = self.shared.transition(|state| state.on_lost(&self.policy));
            if self.shared.connected.swap(false, Ordering::AcqRel) {
                info!(url = %self.url, "chat: disconnected");
                self.listeners
                    .notify(&ClientEvent::ConnectionStatus(ConnectionStatus::disconnected()));
            }
            Some(step)
        })
    }

    fn dispatch(&self, text: &str) {
        match ServerFrame::decode(text) {
            Ok(ServerFrame::NewMessage(message)) => {
                debug!(id = %message.id, project_id = %message.project_id, "chat: new message");
                self.notify(ClientEvent::NewMessage(message));
            }
            Ok(ServerFrame::Error(payload)) => {
                warn!(message = %payload.message, "chat: server error");
                self.notify(ClientEvent::Error(payload));
            }
            Err(e) => warn!(error = %e, "chat: undecodable server frame"),
        }
    }
}

async fn run_driver(
    ctx: DriverContext,
    mut commands: mpsc::UnboundedReceiver<ClientFrame>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let opened = tokio::select! {
            _ = &mut shutdown => return,
            opened = ctx.connector.connect(&ctx.url) => opened,
        };

        match opened {
            Ok(mut transport) => {
                ctx.on_connected(transport.as_mut()).await;
                let exit = pump(&ctx, transport.as_mut(), &mut commands, &mut shutdown).await;
                if matches!(exit, Exit::Shutdown) {
                    if let Err(e) = transport.close().await {
                        debug!(error = %e, "chat: close failed");
                    }
                    return;
                }
            }
            Err(e) => {
                warn!(url = %ctx.url, error = %e, "chat: connect failed");
                ctx.notify_error(e.to_string());
            }
        }

        let Some(step) = ctx.on_lost() else { return };

        let mut dropped = 0usize;
        while commands.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "chat: discarded frames queued on a lost connection");
        }

        match step {
            Step::Retry { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis(), "chat: reconnecting");
                tokio::select! {
                    _ = &mut shutdown => return,
                    () = tokio::time::sleep(delay) => {}
                }
                if ctx.is_stopped() || ctx.shared.connected.load(Ordering::Acquire) {
                    return;
                }
            }
            Step::GiveUp => {
                error!(url = %ctx.url, attempts = ctx.shared.state().attempts(), "chat: max reconnection attempts reached, giving up");
                ctx.notify(ClientEvent::ConnectionStatus(ConnectionStatus::failed(reconnect::EXHAUSTED_MESSAGE)));
                return;
            }
        }
    }
}

/// Relay frames in both directions until the connection ends.
async fn pump(
    ctx: &DriverContext,
    transport: &mut dyn Transport,
    commands: &mut mpsc::UnboundedReceiver<ClientFrame>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Exit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => return Exit::Shutdown,
            command = commands.recv() => {
                let Some(frame) = command else { return Exit::Shutdown };
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "chat: failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = transport.send(text).await {
                    warn!(error = %e, "chat: send failed");
                    ctx.notify_error(e.to_string());
                    return Exit::Lost;
                }
            }
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => ctx.dispatch(&text),
                Some(Err(e)) => {
                    warn!(error = %e, "chat: receive failed");
                    ctx.notify_error(e.to_string());
                    return Exit::Lost;
                }
                None => return Exit::Lost,
            },
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
