mod common;

use std::time::Duration;

use hydrogen_client::{ClientConfig, ClientError, DeviceClient, QosLevel};

#[tokio::test]
async fn silent_server_yields_a_timeout_error() {
    let addr = common::start_mock_server(|mut ws| async move {
        use futures_util::StreamExt;
        // Accept the connection and never answer.
        let _ = ws.next().await;
        let _ = futures_util::future::pending::<()>().await;
    })
    .await;

    let config = ClientConfig::default().with_response_timeout(Duration::from_millis(150));
    let client = DeviceClient::connect(common::ws_url(addr), config);

    let result = client.execute_command("cam01", "snap", None, QosLevel::AtMostOnce).await;

    match result {
        Err(ClientError::Timeout(d)) => assert_eq!(d, Duration::from_millis(150)),
        other => panic!("expected a timeout error, got {other:?}"),
    }
}
