mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hydrogen_client::{ClientConfig, ConnectionState, DeviceClient, QosLevel};

#[tokio::test]
async fn shutdown_clears_pending_async_commands_and_disconnects() {
    let addr = common::start_mock_server(|mut ws| async move {
        use futures_util::StreamExt;
        // Never respond to anything; the client will shut down with work
        // still outstanding.
        while ws.next().await.is_some() {}
    })
    .await;

    let client = DeviceClient::connect(common::ws_url(addr), ClientConfig::default());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.is_connected());

    let called = Arc::new(AtomicBool::new(false));
    let called_clone = called.clone();
    client.execute_command_async(
        "cam01",
        "snap",
        None,
        QosLevel::AtMostOnce,
        Some(Arc::new(move |value: serde_json::Value| {
            assert!(value.get("error").is_some());
            called_clone.store(true, Ordering::SeqCst);
        })),
    );

    client.shutdown(Duration::from_millis(100)).await;

    assert!(called.load(Ordering::SeqCst), "pending async callback should fire on shutdown");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
