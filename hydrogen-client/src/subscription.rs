//! Subscription Manager: property-change and event callback routing,
//! grounded in `original_source/src/client/subscription_manager.h`.
//! User callbacks are always dispatched on a detached `tokio::spawn`ed
//! task rather than inline, unlike the Message Processor's type handlers —
//! a callback that panics or blocks must never stall message delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::warn;

use hydrogen_core::{EventMessage, Message, MessageType, Payload};

use crate::connection::MessageProcessor;
use crate::error::ClientError;

pub type PropertyCallback = Arc<dyn Fn(&str, &str, &Value) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&str, &str, &Value) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct SubscriptionStats {
    pub property_subscription_count: usize,
    pub event_subscription_count: usize,
    pub property_notifications: u64,
    pub event_notifications: u64,
    pub callback_errors: u64,
}

fn make_key(device_id: &str, name: &str) -> String {
    format!("{device_id}\u{1}{name}")
}

fn names_for_device<V>(map: &HashMap<String, V>, device_id: &str) -> Vec<String> {
    let prefix = format!("{device_id}\u{1}");
    map.keys().filter_map(|k| k.strip_prefix(&prefix)).map(str::to_string).collect()
}

struct Inner {
    properties: Mutex<HashMap<String, PropertyCallback>>,
    events: Mutex<HashMap<String, EventCallback>>,
    stats: Mutex<SubscriptionStats>,
    /// Detached callback-dispatch tasks, tracked so shutdown can wait for
    /// them (with a deadline) instead of leaking bare `tokio::spawn`s.
    tasks: Mutex<JoinSet<()>>,
    max_device_id_len: usize,
    max_property_name_len: usize,
    max_event_name_len: usize,
}

/// Cheap to clone; all subscription state lives behind the shared `Inner`.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    pub fn new(processor: MessageProcessor, config: &crate::config::ClientConfig) -> Self {
        let manager = SubscriptionManager {
            inner: Arc::new(Inner {
                properties: Mutex::new(HashMap::new()),
                events: Mutex::new(HashMap::new()),
                stats: Mutex::new(SubscriptionStats::default()),
                tasks: Mutex::new(JoinSet::new()),
                max_device_id_len: config.max_device_id_len,
                max_property_name_len: config.max_property_name_len,
                max_event_name_len: config.max_event_name_len,
            }),
        };
        manager.spawn_listener(processor);
        manager
    }

    fn spawn_listener(&self, processor: MessageProcessor) {
        let inner = self.inner.clone();
        let mut incoming = processor.subscribe_incoming();
        tokio::spawn(async move {
            loop {
                match incoming.recv().await {
                    Ok(message) => {
                        if message.message_type() == MessageType::Event {
                            if let Payload::Event(event) = &message.payload {
                                dispatch_event(&inner, &message, event);
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscription listener lagged behind incoming messages");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    pub fn subscribe_to_property(
        &self,
        device_id: impl Into<String>,
        property: impl Into<String>,
        callback: impl Fn(&str, &str, &Value) + Send + Sync + 'static,
    ) -> Result<(), ClientError> {
        let device_id = device_id.into();
        let property = property.into();
        hydrogen_core::validate::validate_extended("deviceId", &device_id, self.inner.max_device_id_len)?;
        hydrogen_core::validate::validate_extended("property", &property, self.inner.max_property_name_len)?;

        let key = make_key(&device_id, &property);
        let is_new = self.inner.properties.lock().unwrap().insert(key, Arc::new(callback)).is_none();
        if is_new {
            self.inner.stats.lock().unwrap().property_subscription_count += 1;
        }
        Ok(())
    }

    pub fn unsubscribe_from_property(&self, device_id: &str, property: &str) {
        let key = make_key(device_id, property);
        if self.inner.properties.lock().unwrap().remove(&key).is_some() {
            self.inner.stats.lock().unwrap().property_subscription_count -= 1;
        }
    }

    pub fn subscribe_to_event(
        &self,
        device_id: impl Into<String>,
        event: impl Into<String>,
        callback: impl Fn(&str, &str, &Value) + Send + Sync + 'static,
    ) -> Result<(), ClientError> {
        let device_id = device_id.into();
        let event = event.into();
        hydrogen_core::validate::validate_extended("deviceId", &device_id, self.inner.max_device_id_len)?;
        hydrogen_core::validate::validate_extended("event", &event, self.inner.max_event_name_len)?;

        let key = make_key(&device_id, &event);
        let is_new = self.inner.events.lock().unwrap().insert(key, Arc::new(callback)).is_none();
        if is_new {
            self.inner.stats.lock().unwrap().event_subscription_count += 1;
        }
        Ok(())
    }

    pub fn unsubscribe_from_event(&self, device_id: &str, event: &str) {
        let key = make_key(device_id, event);
        if self.inner.events.lock().unwrap().remove(&key).is_some() {
            self.inner.stats.lock().unwrap().event_subscription_count -= 1;
        }
    }

    pub fn is_subscribed_to_property(&self, device_id: &str, property: &str) -> bool {
        self.inner.properties.lock().unwrap().contains_key(&make_key(device_id, property))
    }

    pub fn is_subscribed_to_event(&self, device_id: &str, event: &str) -> bool {
        self.inner.events.lock().unwrap().contains_key(&make_key(device_id, event))
    }

    /// Property names `device_id` currently has a subscription for.
    pub fn property_subscriptions(&self, device_id: &str) -> Vec<String> {
        names_for_device(&self.inner.properties.lock().unwrap(), device_id)
    }

    /// Event names `device_id` currently has a subscription for.
    pub fn event_subscriptions(&self, device_id: &str) -> Vec<String> {
        names_for_device(&self.inner.events.lock().unwrap(), device_id)
    }

    pub fn clear_device_subscriptions(&self, device_id: &str) {
        let prefix = format!("{device_id}\u{1}");
        let mut properties = self.inner.properties.lock().unwrap();
        let before = properties.len();
        properties.retain(|k, _| !k.starts_with(&prefix));
        let removed_props = before - properties.len();
        drop(properties);

        let mut events = self.inner.events.lock().unwrap();
        let before = events.len();
        events.retain(|k, _| !k.starts_with(&prefix));
        let removed_events = before - events.len();
        drop(events);

        let mut stats = self.inner.stats.lock().unwrap();
        stats.property_subscription_count -= removed_props;
        stats.event_subscription_count -= removed_events;
    }

    pub fn clear_all_subscriptions(&self) {
        self.inner.properties.lock().unwrap().clear();
        self.inner.events.lock().unwrap().clear();
        let mut stats = self.inner.stats.lock().unwrap();
        stats.property_subscription_count = 0;
        stats.event_subscription_count = 0;
    }

    pub fn stats(&self) -> SubscriptionStats {
        self.inner.stats.lock().unwrap().clone()
    }

    /// Waits for every outstanding callback-dispatch task to finish, giving
    /// up after `deadline` rather than blocking shutdown indefinitely.
    pub async fn join_outstanding(&self, deadline: Duration) {
        let mut tasks = std::mem::replace(&mut *self.inner.tasks.lock().unwrap(), JoinSet::new());
        let _ = tokio::time::timeout(deadline, async { while tasks.join_next().await.is_some() {} }).await;
    }
}

fn dispatch_event(inner: &Arc<Inner>, message: &Message, event: &EventMessage) {
    let Some(device_id) = message.device_id.clone() else { return };

    if event.is_property_changed() {
        let Some(properties) = &event.properties else { return };
        let Value::Object(map) = properties else { return };
        for (property, entry) in map.clone() {
            let key = make_key(&device_id, &property);
            let callback = inner.properties.lock().unwrap().get(&key).cloned();
            if let Some(callback) = callback {
                let value = entry.get("value").cloned().unwrap_or(Value::Null);
                inner.stats.lock().unwrap().property_notifications += 1;
                spawn_property_callback(inner.clone(), callback, device_id.clone(), property, value);
            }
        }
        return;
    }

    let key = make_key(&device_id, &event.event);
    let callback = inner.events.lock().unwrap().get(&key).cloned();
    if let Some(callback) = callback {
        inner.stats.lock().unwrap().event_notifications += 1;
        let details = event.details.clone().unwrap_or(Value::Null);
        spawn_event_callback(inner.clone(), callback, device_id, event.event.clone(), details);
    }
}

fn spawn_property_callback(
    inner: Arc<Inner>,
    callback: PropertyCallback,
    device_id: String,
    property: String,
    value: Value,
) {
    let task = {
        let inner = inner.clone();
        async move {
            let result = std::panic::AssertUnwindSafe(|| callback(&device_id, &property, &value));
            if std::panic::catch_unwind(result).is_err() {
                inner.stats.lock().unwrap().callback_errors += 1;
                warn!(%device_id, %property, "property callback panicked");
            }
        }
    };
    inner.tasks.lock().unwrap().spawn(task);
}

fn spawn_event_callback(
    inner: Arc<Inner>,
    callback: EventCallback,
    device_id: String,
    event: String,
    details: Value,
) {
    let task = {
        let inner = inner.clone();
        async move {
            let result = std::panic::AssertUnwindSafe(|| callback(&device_id, &event, &details));
            if std::panic::catch_unwind(result).is_err() {
                inner.stats.lock().unwrap().callback_errors += 1;
                warn!(%device_id, %event, "event callback panicked");
            }
        }
    };
    inner.tasks.lock().unwrap().spawn(task);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_key_distinguishes_device_and_name() {
        assert_ne!(make_key("cam01", "ra"), make_key("cam0", "1ra"));
    }
}
