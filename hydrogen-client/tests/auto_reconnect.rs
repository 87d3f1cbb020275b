mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use hydrogen_client::{ClientConfig, ConnectionState, DeviceClient, Payload, QosLevel, ResponseMessage};
use hydrogen_core::Message;

/// The first connection the mock server accepts closes immediately; the
/// second serves commands normally. The client's reconnect loop must bring
/// it back to `Connected` against the server's next accepted connection
/// without any caller intervention.
#[tokio::test]
async fn drops_first_connection_then_reconnects_and_serves_commands() {
    let connection_count = Arc::new(AtomicU32::new(0));
    let counter = connection_count.clone();

    let addr = common::start_mock_server(move |mut ws| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt == 1 {
                let _ = ws.close().await;
                return;
            }

            let Some(Ok(WsMessage::Text(text))) = ws.next().await else { return };
            let request = Message::from_json(&text).expect("valid request");
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
    })
    .await;

    let config = ClientConfig::default().with_auto_reconnect(true, Duration::from_millis(30), 0);
    let client = DeviceClient::connect(common::ws_url(addr), config);

    // Give the first (doomed) connection and the subsequent reconnect time
    // to settle before relying on the client.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.state(), ConnectionState::Connected);

    let result = client.execute_command("cam01", "snap", None, QosLevel::AtMostOnce).await;
    assert_eq!(result.expect("reconnected client should serve commands")["status"], "success");
}
