mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use hydrogen_client::{ClientConfig, DeviceClient, Payload, QosLevel, ResponseMessage};
use hydrogen_core::Message;

#[tokio::test]
async fn command_round_trips_to_a_correlated_response() {
    let addr = common::start_mock_server(|mut ws| async move {
        let Some(Ok(WsMessage::Text(text))) = ws.next().await else { return };
        let request = Message::from_json(&text).expect("valid request");

        let response = Message::new(Payload::Response(ResponseMessage {
            status: "success".into(),
            command: Some("snap".into()),
            properties: Some(serde_json::json!({"exposure": 1.0})),
            details: None,
        }))
        .with_original_message_id(request.message_id)
        .with_device_id("cam01");

        let _ = ws.send(WsMessage::Text(response.to_json().unwrap())).await;
        let _ = futures_util::future::pending::<()>().await;
    })
    .await;

    let client = DeviceClient::connect(common::ws_url(addr), ClientConfig::default());

    let result = client
        .execute_command("cam01", "snap", Some(serde_json::json!({"exposure": 1.0})), QosLevel::AtMostOnce)
        .await
        .expect("command should succeed");

    assert_eq!(result["status"], "success");
    assert_eq!(result["properties"]["exposure"], 1.0);
    tokio::time::sleep(Duration::from_millis(10)).await;
}
