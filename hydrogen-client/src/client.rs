//! `DeviceClient`: the single entry point wiring the connection actor,
//! Message Queue Manager, Subscription Manager, Device Manager, and
//! Command Executor together. Analogous to the teacher's
//! `Provider<WsClient>`, which is similarly a thin facade over one
//! `RequestManager`.

use std::time::Duration;

use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use hydrogen_core::{Message, MessageType, QosLevel};

use crate::command::{AsyncCallback, CommandExecutor, CommandStatsSnapshot};
use crate::config::ClientConfig;
use crate::connection::{self, ConnectionManager, ConnectionState, MessageProcessor};
use crate::device::{DeviceManager, DeviceStats};
use crate::error::{ClientError, SharedErrorHandler, TracingErrorHandler};
use crate::queue::{self, QueueManager, QueueStats};
use crate::subscription::{SubscriptionManager, SubscriptionStats};

/// Client-side runtime for one WebSocket connection to a hydrogen server.
/// Cheap to clone: every field is itself a cloneable handle over shared
/// background tasks.
#[derive(Clone)]
pub struct DeviceClient {
    connection: ConnectionManager,
    processor: MessageProcessor,
    queue: QueueManager,
    subscriptions: SubscriptionManager,
    devices: DeviceManager,
    commands: CommandExecutor,
    shutdown_grace_period: Duration,
}

impl DeviceClient {
    /// Spawns the connection actor and its dependent background tasks
    /// (queue scheduler, subscription listener). The actual WebSocket
    /// handshake happens inside the actor; use [`DeviceClient::state`] or
    /// wait for the first successful call to observe connectedness.
    pub fn connect(url: impl Into<String>, config: ClientConfig) -> Self {
        Self::connect_with_error_handler(url, config, std::sync::Arc::new(TracingErrorHandler))
    }

    pub fn connect_with_error_handler(
        url: impl Into<String>,
        config: ClientConfig,
        error_handler: SharedErrorHandler,
    ) -> Self {
        let (connection, processor) = connection::spawn_with_error_handler(url, config.clone(), error_handler);
        let queue_manager = queue::spawn(processor.clone(), &config);
        let subscriptions = SubscriptionManager::new(processor.clone(), &config);
        let devices = DeviceManager::new(processor.clone(), &config);
        let commands = CommandExecutor::new(processor.clone(), queue_manager.clone(), &config);

        DeviceClient {
            connection,
            processor,
            queue: queue_manager,
            subscriptions,
            devices,
            commands,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn reconnect_attempts(&self) -> usize {
        self.connection.reconnect_attempts()
    }

    /// Registers the connection-state callback (spec §4.1), fired with
    /// `true`/`false` whenever the connected/disconnected state actually
    /// changes: connect success, disconnect, reconnect success, or reconnect
    /// exhaustion. Replaces any previously registered callback.
    pub fn set_connection_callback<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.connection.set_connection_callback(callback)
    }

    pub fn clear_connection_callback(&self) {
        self.connection.clear_connection_callback()
    }

    /// Registers a synchronous, non-blocking handler for every inbound
    /// message of `message_type` that did not correlate to a pending
    /// request. Runs inline on the connection actor's receive loop.
    pub fn on_message<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.processor.register_handler(message_type, handler);
    }

    pub fn remove_message_handler(&self, message_type: MessageType) {
        self.processor.unregister_handler(message_type);
    }

    // -- Subscriptions --------------------------------------------------

    pub fn subscribe_to_property(
        &self,
        device_id: impl Into<String>,
        property: impl Into<String>,
        callback: impl Fn(&str, &str, &Value) + Send + Sync + 'static,
    ) -> Result<(), ClientError> {
        self.subscriptions.subscribe_to_property(device_id, property, callback)
    }

    pub fn unsubscribe_from_property(&self, device_id: &str, property: &str) {
        self.subscriptions.unsubscribe_from_property(device_id, property)
    }

    pub fn subscribe_to_event(
        &self,
        device_id: impl Into<String>,
        event: impl Into<String>,
        callback: impl Fn(&str, &str, &Value) + Send + Sync + 'static,
    ) -> Result<(), ClientError> {
        self.subscriptions.subscribe_to_event(device_id, event, callback)
    }

    pub fn unsubscribe_from_event(&self, device_id: &str, event: &str) {
        self.subscriptions.unsubscribe_from_event(device_id, event)
    }

    pub fn clear_device_subscriptions(&self, device_id: &str) {
        self.subscriptions.clear_device_subscriptions(device_id)
    }

    pub fn clear_all_subscriptions(&self) {
        self.subscriptions.clear_all_subscriptions()
    }

    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.subscriptions.stats()
    }

    pub fn property_subscriptions(&self, device_id: &str) -> Vec<String> {
        self.subscriptions.property_subscriptions(device_id)
    }

    pub fn event_subscriptions(&self, device_id: &str) -> Vec<String> {
        self.subscriptions.event_subscriptions(device_id)
    }

    // -- Devices ----------------------------------------------------------

    pub async fn discover_devices(&self, device_types: Vec<String>) -> Result<Value, ClientError> {
        self.devices.discover_devices(device_types).await
    }

    pub fn devices(&self) -> Value {
        self.devices.devices()
    }

    pub fn device_info(&self, device_id: &str) -> Option<Value> {
        self.devices.device_info(device_id)
    }

    pub fn has_device(&self, device_id: &str) -> bool {
        self.devices.has_device(device_id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.devices.device_ids()
    }

    pub fn devices_by_type(&self, device_type: &str) -> Value {
        self.devices.devices_by_type(device_type)
    }

    pub fn update_device_info(&self, device_id: impl Into<String>, device_info: Value) {
        self.devices.update_device_info(device_id, device_info)
    }

    pub fn remove_device(&self, device_id: &str) {
        self.devices.remove_device(device_id)
    }

    pub fn clear_device_cache(&self) {
        self.devices.clear_device_cache()
    }

    pub async fn device_properties(&self, device_id: &str, properties: Vec<String>) -> Result<Value, ClientError> {
        self.devices.device_properties(device_id, properties).await
    }

    pub async fn set_device_properties(&self, device_id: &str, properties: Value) -> Result<Value, ClientError> {
        self.devices.set_device_properties(device_id, properties).await
    }

    pub fn device_stats(&self) -> DeviceStats {
        self.devices.stats()
    }

    // -- Commands ---------------------------------------------------------

    pub async fn execute_command(
        &self,
        device_id: &str,
        command: &str,
        parameters: Option<Value>,
        qos: QosLevel,
    ) -> Result<Value, ClientError> {
        self.commands.execute_command(device_id, command, parameters, qos).await
    }

    pub fn execute_command_async(
        &self,
        device_id: impl Into<String>,
        command: impl Into<String>,
        parameters: Option<Value>,
        qos: QosLevel,
        callback: Option<AsyncCallback>,
    ) {
        self.commands.execute_command_async(device_id, command, parameters, qos, callback)
    }

    pub async fn execute_batch_commands(
        &self,
        device_id: &str,
        commands: Vec<(String, Option<Value>)>,
        sequential: bool,
        qos: QosLevel,
    ) -> Result<Value, ClientError> {
        self.commands.execute_batch_commands(device_id, commands, sequential, qos).await
    }

    pub fn cancel_async_command(&self, message_id: Uuid) -> bool {
        self.commands.cancel_async_command(message_id)
    }

    pub fn command_stats(&self) -> CommandStatsSnapshot {
        self.commands.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Orderly shutdown: stop accepting new work, close the connection, then
    /// wait up to `grace_period` for already-dispatched callbacks to finish.
    /// No user callback runs after this returns except ones already in
    /// flight when it was called, and those are bounded by the deadline
    /// rather than joined unconditionally.
    pub async fn shutdown(&self, grace_period: Duration) {
        info!("shutting down device client");
        self.commands.clear_pending_commands();
        self.connection.disconnect().await;
        tokio::join!(self.commands.join_outstanding(grace_period), self.subscriptions.join_outstanding(grace_period));
    }
}
