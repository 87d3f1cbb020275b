mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use hydrogen_client::{ClientConfig, DeviceClient, EventMessage, Message, Payload};

#[tokio::test]
async fn property_change_events_reach_the_subscribed_callback() {
    let addr = common::start_mock_server(|mut ws| async move {
        // Give the client a moment to subscribe before pushing the event.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let event = Message::new(Payload::Event(EventMessage {
            event: EventMessage::PROPERTY_CHANGED.to_string(),
            properties: Some(serde_json::json!({
                "ra": {"value": 10.5},
                "dec": {"value": 20.1},
            })),
            details: None,
            related_message_id: None,
        }))
        .with_device_id("cam01");

        let _ = ws.send(WsMessage::Text(event.to_json().unwrap())).await;
        let _ = futures_util::future::pending::<()>().await;
    })
    .await;

    let client = DeviceClient::connect(common::ws_url(addr), ClientConfig::default());

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    client
        .subscribe_to_property("cam01", "ra", move |device_id, property, value| {
            *seen_clone.lock().unwrap() = Some((device_id.to_string(), property.to_string(), value.clone()));
        })
        .expect("subscription should validate");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let captured = seen.lock().unwrap().clone().expect("callback should have fired");
    assert_eq!(captured.0, "cam01");
    assert_eq!(captured.1, "ra");
    assert_eq!(captured.2, serde_json::json!(10.5));

    // `dec` has no subscription, so only `ra`'s notification should count.
    let stats = client.subscription_stats();
    assert_eq!(stats.property_notifications, 1);
}
