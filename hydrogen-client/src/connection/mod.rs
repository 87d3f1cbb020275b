//! Connection actor: owns the single live WebSocket, reconnects on failure,
//! and correlates responses to pending requests. Grounded in the teacher's
//! `RequestManager` (`ws/manager.rs`), translating the spec's
//! receive-thread / reconnect-thread pair into one task driven by
//! `tokio::select!` over backend events and an instruction channel.

mod backend;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use tracing_futures::Instrument;
use uuid::Uuid;

use hydrogen_core::{Message, MessageType};

use crate::config::ClientConfig;
use crate::error::{ClientError, SharedErrorHandler, TracingErrorHandler};
use backend::{BackendDriver, WsBackend};

/// Synchronous, non-blocking callback for a registered message type. Runs
/// inline on the connection actor's task, per the spec's requirement that
/// Message Processor handlers never block the receive loop.
pub type HandlerFn = Arc<dyn Fn(&Message) + Send + Sync>;

/// Connection-state transition callback, spec §4.1's `setConnectionCallback`.
/// Invoked with the new `connected` value under `Shared::connection_callback`,
/// the "dedicated callback mutex" the spec calls for so a caller sees a
/// well-ordered sequence of transitions rather than interleaved calls.
pub type ConnectionCallback = Arc<dyn Fn(bool) + Send + Sync>;

const BROADCAST_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Reconnecting = 3,
    Exhausted = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Reconnecting,
            4 => ConnectionState::Exhausted,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

enum Instruction {
    Send(Message),
    SendAndWait(Message, oneshot::Sender<Result<Message, ClientError>>),
    RegisterPending(Uuid, oneshot::Sender<Result<Message, ClientError>>),
    RegisterHandler(MessageType, HandlerFn),
    UnregisterHandler(MessageType),
    Shutdown(oneshot::Sender<()>),
}

/// Shared state visible to every clone of [`ConnectionManager`] /
/// [`MessageProcessor`] without round-tripping through the actor.
struct Shared {
    state: AtomicU8,
    reconnect_attempts: AtomicUsize,
    instructions: mpsc::UnboundedSender<Instruction>,
    incoming: broadcast::Sender<Arc<Message>>,
    connection_callback: Mutex<Option<ConnectionCallback>>,
}

/// Public handle for connection lifecycle concerns: connect, disconnect,
/// and query reconnect state. Cheap to clone, analogous to the teacher's
/// `WsClient`.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Public handle for sending messages and registering per-type handlers.
/// A distinct type from [`ConnectionManager`] per the spec's component
/// split, but it shares the same underlying actor and instruction channel.
#[derive(Clone)]
pub struct MessageProcessor {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of reconnect attempts made since the last successful connect.
    /// Resets to zero on every successful [`WsBackend::connect`], mirroring
    /// `connection_manager.cpp`'s reconnect counter.
    pub fn reconnect_attempts(&self) -> usize {
        self.shared.reconnect_attempts.load(Ordering::Acquire)
    }

    /// Registers the single connection-state callback (spec §4.1), replacing
    /// any previously registered one. Invoked with `true`/`false` whenever
    /// the connected/disconnected boolean actually changes (connect success,
    /// disconnect, reconnect success, or reconnect exhaustion), not on every
    /// internal sub-state transition.
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        *self.shared.connection_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    pub fn clear_connection_callback(&self) {
        *self.shared.connection_callback.lock().unwrap() = None;
    }

    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.shared.instructions.send(Instruction::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

impl MessageProcessor {
    /// Fire-and-forget send. Used for `AT_MOST_ONCE` traffic and by the
    /// Message Queue Manager once it has decided a message is due.
    pub fn send(&self, message: Message) -> Result<(), ClientError> {
        self.shared
            .instructions
            .send(Instruction::Send(message))
            .map_err(|_| ClientError::DeadChannel)
    }

    /// Sends `message` and waits for a correlated `RESPONSE`, `ERROR`, or
    /// `DISCOVERY_RESPONSE` (matched on `originalMessageId`), up to `timeout`.
    pub async fn send_and_wait_for_response(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .instructions
            .send(Instruction::SendAndWait(message, tx))
            .map_err(|_| ClientError::DeadChannel)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::DeadChannel),
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    }

    /// Waits for a correlated response to a message already dispatched
    /// elsewhere (e.g. by the Message Queue Manager), without sending
    /// anything itself. Used for QoS-tracked commands, where delivery and
    /// retries are the queue manager's job but the caller still wants the
    /// server's actual response rather than a bare delivery acknowledgment.
    pub async fn await_response(&self, message_id: Uuid, timeout: Duration) -> Result<Message, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .instructions
            .send(Instruction::RegisterPending(message_id, tx))
            .map_err(|_| ClientError::DeadChannel)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::DeadChannel),
            Err(_) => Err(ClientError::Timeout(timeout)),
        }
    }

    /// Registers a synchronous handler for `message_type`, run inline on the
    /// receive loop for every inbound message of that type that did not
    /// correlate to a pending request. Replaces any previously registered
    /// handler for the same type.
    pub fn register_handler<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let _ = self
            .shared
            .instructions
            .send(Instruction::RegisterHandler(message_type, Arc::new(handler)));
    }

    pub fn unregister_handler(&self, message_type: MessageType) {
        let _ = self.shared.instructions.send(Instruction::UnregisterHandler(message_type));
    }

    /// Subscribes to every inbound message, correlated or not. Subsystems
    /// such as the Subscription Manager and Device Manager use this to
    /// watch for `EVENT` / `RESPONSE` traffic without competing for the
    /// single-handler-per-type registry.
    pub fn subscribe_incoming(&self) -> broadcast::Receiver<Arc<Message>> {
        self.shared.incoming.subscribe()
    }
}

struct PendingRequest {
    respond_to: oneshot::Sender<Result<Message, ClientError>>,
}

struct ConnectionActor {
    url: String,
    config: ClientConfig,
    instructions: mpsc::UnboundedReceiver<Instruction>,
    shared: Arc<Shared>,
    backend: Option<BackendDriver>,
    pending: HashMap<Uuid, PendingRequest>,
    handlers: HashMap<MessageType, HandlerFn>,
    error_handler: SharedErrorHandler,
    reconnect_attempts: usize,
    /// Last `connected` boolean the connection callback was notified with,
    /// so `set_state` only fires on an actual connected/disconnected flip
    /// rather than on every internal sub-state transition.
    last_connected_notified: bool,
}

/// Spawns the connection actor and returns the two facade handles, analogous
/// to `WsClient::connect` calling `RequestManager::connect` then `spawn`.
pub fn spawn(url: impl Into<String>, config: ClientConfig) -> (ConnectionManager, MessageProcessor) {
    spawn_with_error_handler(url, config, Arc::new(TracingErrorHandler))
}

pub fn spawn_with_error_handler(
    url: impl Into<String>,
    config: ClientConfig,
    error_handler: SharedErrorHandler,
) -> (ConnectionManager, MessageProcessor) {
    let (instructions_tx, instructions_rx) = mpsc::unbounded_channel();
    let (incoming_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

    let shared = Arc::new(Shared {
        state: AtomicU8::new(ConnectionState::Disconnected as u8),
        reconnect_attempts: AtomicUsize::new(0),
        instructions: instructions_tx,
        incoming: incoming_tx,
        connection_callback: Mutex::new(None),
    });

    let url = url.into();
    let span = tracing::info_span!("connection_actor", url = %url);
    let actor = ConnectionActor {
        url,
        config,
        instructions: instructions_rx,
        shared: shared.clone(),
        backend: None,
        pending: HashMap::new(),
        handlers: HashMap::new(),
        error_handler,
        reconnect_attempts: 0,
        last_connected_notified: false,
    };

    tokio::spawn(actor.run().instrument(span));

    (ConnectionManager { shared: shared.clone() }, MessageProcessor { shared })
}

impl ConnectionActor {
    /// Updates the published state and, if the connected/disconnected
    /// boolean actually flipped, invokes the registered connection callback
    /// under `Shared::connection_callback` (spec §4.1's "dedicated callback
    /// mutex" so the caller observes a well-ordered sequence of transitions).
    fn set_state(&mut self, state: ConnectionState) {
        self.shared.state.store(state as u8, Ordering::Release);
        let connected = state == ConnectionState::Connected;
        if connected != self.last_connected_notified {
            self.last_connected_notified = connected;
            let callback = self.shared.connection_callback.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(connected);
            }
        }
    }

    async fn connect_once(&mut self) -> Result<(), ClientError> {
        self.set_state(ConnectionState::Connecting);
        let (backend, driver) = WsBackend::connect(&self.url).await?;
        backend.spawn();
        self.backend = Some(driver);
        self.reconnect_attempts = 0;
        self.shared.reconnect_attempts.store(0, Ordering::Release);
        self.set_state(ConnectionState::Connected);
        info!(url = %self.url, "connected");
        Ok(())
    }

    async fn reconnect_loop(&mut self) -> Result<(), ClientError> {
        if !self.config.auto_reconnect {
            self.set_state(ConnectionState::Exhausted);
            return Err(ClientError::ReconnectExhausted);
        }
        self.set_state(ConnectionState::Reconnecting);
        loop {
            if self.config.max_reconnect_attempts != 0
                && self.reconnect_attempts >= self.config.max_reconnect_attempts
            {
                self.set_state(ConnectionState::Exhausted);
                return Err(ClientError::ReconnectExhausted);
            }
            self.reconnect_attempts += 1;
            self.shared.reconnect_attempts.store(self.reconnect_attempts, Ordering::Release);
            warn!(attempt = self.reconnect_attempts, "reconnecting");
            tokio::time::sleep(self.config.reconnect_interval).await;
            match self.connect_once().await {
                Ok(()) => {
                    self.resend_pending().await;
                    return Ok(());
                }
                Err(e) => {
                    self.error_handler.handle(&e);
                }
            }
        }
    }

    /// On reconnect, every still-open `send_and_wait_for_response` request
    /// fails rather than silently resending: the queue manager, not the
    /// connection actor, owns retry semantics for at-least-once delivery.
    async fn resend_pending(&mut self) {
        for (_, pending) in self.pending.drain() {
            let _ = pending.respond_to.send(Err(ClientError::UnexpectedClose));
        }
    }

    fn dispatch_inbound(&mut self, message: Message) {
        if let Some(original_id) = message.correlatable_original_id() {
            if let Some(pending) = self.pending.remove(&original_id) {
                let _ = pending.respond_to.send(Ok(message));
                return;
            }
        }

        if let Some(handler) = self.handlers.get(&message.message_type()) {
            handler(&message);
        }

        let _ = self.shared.incoming.send(Arc::new(message));
    }

    async fn handle_instruction(&mut self, instruction: Instruction) -> bool {
        match instruction {
            Instruction::Send(message) => {
                if let Some(backend) = &self.backend {
                    if backend.dispatcher.send(message).is_err() {
                        self.backend = None;
                    }
                } else {
                    warn!("dropping send while disconnected");
                }
            }
            Instruction::SendAndWait(message, respond_to) => {
                let Some(backend) = &self.backend else {
                    let _ = respond_to.send(Err(ClientError::NotConnected));
                    return true;
                };
                if backend.dispatcher.send(message.clone()).is_err() {
                    self.backend = None;
                    let _ = respond_to.send(Err(ClientError::UnexpectedClose));
                    return true;
                }
                self.pending.insert(message.message_id, PendingRequest { respond_to });
            }
            Instruction::RegisterPending(message_id, respond_to) => {
                self.pending.insert(message_id, PendingRequest { respond_to });
            }
            Instruction::RegisterHandler(message_type, handler) => {
                self.handlers.insert(message_type, handler);
            }
            Instruction::UnregisterHandler(message_type) => {
                self.handlers.remove(&message_type);
            }
            Instruction::Shutdown(ack) => {
                if let Some(backend) = self.backend.take() {
                    backend.shutdown();
                }
                self.set_state(ConnectionState::Disconnected);
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    async fn run(mut self) {
        if let Err(e) = self.connect_once().await {
            self.error_handler.handle(&e);
            if self.reconnect_loop().await.is_err() {
                return;
            }
        }

        loop {
            // Taken out of `self` for the duration of the select so that the
            // instruction-handling arm can still borrow `self` mutably: a
            // `&mut self.backend` held across `select!` would conflict with
            // `self.handle_instruction(..)`'s `&mut self` in the same match.
            let mut backend = match self.backend.take() {
                Some(backend) => backend,
                None => {
                    if self.reconnect_loop().await.is_err() {
                        return;
                    }
                    continue;
                }
            };

            tokio::select! {
                item = backend.to_handle.recv() => {
                    self.backend = Some(backend);
                    match item {
                        Some(message) => self.dispatch_inbound(message),
                        None => {
                            self.backend = None;
                        }
                    }
                }
                err = &mut backend.error => {
                    // Backend is broken; drop it rather than restoring it,
                    // the outer loop will reconnect on the next pass.
                    if let Ok(e) = err {
                        self.error_handler.handle(&e);
                    }
                }
                instruction = self.instructions.recv() => {
                    self.backend = Some(backend);
                    match instruction {
                        Some(instruction) => {
                            if !self.handle_instruction(instruction).await {
                                return;
                            }
                        }
                        None => {
                            debug!("instruction channel closed; shutting down");
                            return;
                        }
                    }
                }
            }
        }
    }
}
