//! Device Manager: discovery, a local device cache, and property
//! get/set, grounded in `original_source/src/client/device_manager.h`.
//! Talks to the rest of the runtime purely through [`MessageProcessor`],
//! same as the original talks to it purely through its raw pointer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use hydrogen_core::{CommandMessage, DiscoveryRequestMessage, Message, Payload, ResponseMessage};

use crate::config::ClientConfig;
use crate::connection::MessageProcessor;
use crate::error::{ApplicationError, ClientError};

#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    pub discovery_requests: u64,
    pub property_requests: u64,
    pub property_updates: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

struct Inner {
    devices: Mutex<HashMap<String, Value>>,
    stats: Mutex<DeviceStats>,
    max_device_id_len: usize,
    response_timeout: Duration,
}

#[derive(Clone)]
pub struct DeviceManager {
    processor: MessageProcessor,
    inner: Arc<Inner>,
}

fn response_outcome(message: Message) -> Result<ResponseMessage, ClientError> {
    match message.payload {
        Payload::Response(response) if response.status == "success" => Ok(response),
        Payload::Response(response) => Err(ClientError::Application(ApplicationError {
            error_code: "RESPONSE_ERROR".into(),
            error_message: response.status,
            details: response.details,
        })),
        Payload::Error(error) => Err(ClientError::Application(ApplicationError {
            error_code: error.error_code,
            error_message: error.error_message,
            details: error.details,
        })),
        other => Err(ClientError::Message(hydrogen_core::Error::Malformed(format!(
            "unexpected response payload for device request: {other:?}"
        )))),
    }
}

impl DeviceManager {
    pub fn new(processor: MessageProcessor, config: &ClientConfig) -> Self {
        DeviceManager {
            processor,
            inner: Arc::new(Inner {
                devices: Mutex::new(HashMap::new()),
                stats: Mutex::new(DeviceStats::default()),
                max_device_id_len: config.max_device_id_len,
                response_timeout: config.response_timeout,
            }),
        }
    }

    /// Sends a `DISCOVERY_REQUEST`, waits for the `DISCOVERY_RESPONSE`, and
    /// merges every discovered device into the cache.
    pub async fn discover_devices(&self, device_types: Vec<String>) -> Result<Value, ClientError> {
        let request = Message::new(Payload::DiscoveryRequest(DiscoveryRequestMessage {
            device_types,
            filter: None,
        }));

        let response = self
            .processor
            .send_and_wait_for_response(request, self.inner.response_timeout)
            .await?;

        self.inner.stats.lock().unwrap().discovery_requests += 1;

        let devices = match response.payload {
            Payload::DiscoveryResponse(discovery) => discovery.devices,
            Payload::Error(error) => {
                return Err(ClientError::Application(ApplicationError {
                    error_code: error.error_code,
                    error_message: error.error_message,
                    details: error.details,
                }))
            }
            other => {
                return Err(ClientError::Message(hydrogen_core::Error::Malformed(format!(
                    "expected DISCOVERY_RESPONSE, got {other:?}"
                ))))
            }
        };

        if let Value::Array(ref list) = devices {
            let mut cache = self.inner.devices.lock().unwrap();
            for device in list {
                if let Some(id) = device.get("deviceId").and_then(Value::as_str) {
                    cache.insert(id.to_string(), device.clone());
                }
            }
            debug!(discovered = list.len(), "device discovery complete");
        }

        Ok(devices)
    }

    pub fn devices(&self) -> Value {
        let cache = self.inner.devices.lock().unwrap();
        Value::Object(cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn device_info(&self, device_id: &str) -> Option<Value> {
        let mut stats = self.inner.stats.lock().unwrap();
        let cache = self.inner.devices.lock().unwrap();
        match cache.get(device_id) {
            Some(v) => {
                stats.cache_hits += 1;
                Some(v.clone())
            }
            None => {
                stats.cache_misses += 1;
                None
            }
        }
    }

    pub fn has_device(&self, device_id: &str) -> bool {
        self.inner.devices.lock().unwrap().contains_key(device_id)
    }

    pub fn device_ids(&self) -> Vec<String> {
        self.inner.devices.lock().unwrap().keys().cloned().collect()
    }

    pub fn devices_by_type(&self, device_type: &str) -> Value {
        let cache = self.inner.devices.lock().unwrap();
        let matches: serde_json::Map<String, Value> = cache
            .iter()
            .filter(|(_, v)| v.get("deviceType").and_then(Value::as_str) == Some(device_type))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(matches)
    }

    pub fn update_device_info(&self, device_id: impl Into<String>, device_info: Value) {
        self.inner.devices.lock().unwrap().insert(device_id.into(), device_info);
    }

    pub fn remove_device(&self, device_id: &str) {
        self.inner.devices.lock().unwrap().remove(device_id);
    }

    pub fn clear_device_cache(&self) {
        self.inner.devices.lock().unwrap().clear();
    }

    pub fn stats(&self) -> DeviceStats {
        self.inner.stats.lock().unwrap().clone()
    }

    /// Requests `properties` from `device_id` via a `GET_PROPERTIES` command
    /// and returns the server's echoed values.
    pub async fn device_properties(
        &self,
        device_id: &str,
        properties: Vec<String>,
    ) -> Result<Value, ClientError> {
        hydrogen_core::validate::validate_extended("deviceId", device_id, self.inner.max_device_id_len)?;

        let request = Message::new(Payload::Command(CommandMessage {
            command: "GET_PROPERTIES".into(),
            parameters: serde_json::json!({ "properties": properties }),
            properties: Value::Object(Default::default()),
        }))
        .with_device_id(device_id);

        let response = self
            .processor
            .send_and_wait_for_response(request, self.inner.response_timeout)
            .await?;
        self.inner.stats.lock().unwrap().property_requests += 1;
        let response = response_outcome(response)?;
        Ok(response.properties.unwrap_or(Value::Null))
    }

    /// Sets `properties` on `device_id` via a `SET_PROPERTIES` command.
    pub async fn set_device_properties(
        &self,
        device_id: &str,
        properties: Value,
    ) -> Result<Value, ClientError> {
        hydrogen_core::validate::validate_extended("deviceId", device_id, self.inner.max_device_id_len)?;

        let request = Message::new(Payload::Command(CommandMessage {
            command: "SET_PROPERTIES".into(),
            parameters: serde_json::json!({ "properties": properties }),
            properties: Value::Object(Default::default()),
        }))
        .with_device_id(device_id);

        let response = self
            .processor
            .send_and_wait_for_response(request, self.inner.response_timeout)
            .await?;
        self.inner.stats.lock().unwrap().property_updates += 1;
        let response = response_outcome(response)?;
        Ok(response.properties.unwrap_or(Value::Null))
    }
}
