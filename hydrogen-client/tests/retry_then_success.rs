mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use hydrogen_client::{ClientConfig, DeviceClient, Payload, QosLevel, ResponseMessage};
use hydrogen_core::Message;

/// An `AT_LEAST_ONCE` command whose first delivery the server silently
/// drops. The Message Queue Manager must resend it once the retry interval
/// elapses, and the second delivery gets acknowledged.
#[tokio::test]
async fn at_least_once_command_survives_a_dropped_first_delivery() {
    let deliveries = Arc::new(AtomicU32::new(0));
    let deliveries_for_handler = deliveries.clone();

    let addr = common::start_mock_server(move |mut ws| {
        let deliveries = deliveries_for_handler.clone();
        async move {
            loop {
                let Some(Ok(WsMessage::Text(text))) = ws.next().await else { return };
                let request = Message::from_json(&text).expect("valid request");
                let seen = deliveries.fetch_add(1, Ordering::SeqCst) + 1;

                if seen < 2 {
                    // Drop the first delivery: no reply, forcing a retry.
                    continue;
                }

                let response = Message::new(Payload::Response(ResponseMessage {
                    status: "success".into(),
                    command: Some("snap".into()),
                    properties: None,
                    details: None,
                }))
                .with_original_message_id(request.message_id);

                let _ = ws.send(WsMessage::Text(response.to_json().unwrap())).await;
                let _ = futures_util::future::pending::<()>().await;
            }
        }
    })
    .await;

    let config = ClientConfig::default()
        .with_retry_params(5, Duration::from_millis(40))
        .with_response_timeout(Duration::from_secs(2));
    let client = DeviceClient::connect(common::ws_url(addr), config);

    let result = client
        .execute_command("cam01", "snap", None, QosLevel::AtLeastOnce)
        .await
        .expect("command should eventually succeed");

    assert_eq!(result["status"], "success");
    assert!(deliveries.load(Ordering::SeqCst) >= 2, "server should have seen a retried delivery");
}
