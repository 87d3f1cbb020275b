mod common;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use hydrogen_client::{ClientConfig, ClientError, DeviceClient, ErrorMessage, Payload, QosLevel};
use hydrogen_core::Message;

#[tokio::test]
async fn application_error_response_surfaces_as_client_error() {
    let addr = common::start_mock_server(|mut ws| async move {
        let Some(Ok(WsMessage::Text(text))) = ws.next().await else { return };
        let request = Message::from_json(&text).expect("valid request");

        let error = Message::new(Payload::Error(ErrorMessage {
            error_code: "DEVICE_BUSY".into(),
            error_message: "device is busy".into(),
            details: None,
        }))
        .with_original_message_id(request.message_id);

        let _ = ws.send(WsMessage::Text(error.to_json().unwrap())).await;
        let _ = futures_util::future::pending::<()>().await;
    })
    .await;

    let client = DeviceClient::connect(common::ws_url(addr), ClientConfig::default());

    let result = client.execute_command("cam01", "snap", None, QosLevel::AtMostOnce).await;

    match result {
        Err(ClientError::Application(app_err)) => {
            assert_eq!(app_err.error_code, "DEVICE_BUSY");
            assert_eq!(app_err.error_message, "device is busy");
        }
        other => panic!("expected an application error, got {other:?}"),
    }
}
