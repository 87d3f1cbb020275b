use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

type Conn = WebSocketStream<TcpStream>;

/// Binds an ephemeral local port and runs `handler` once per accepted
/// connection, looping so reconnect scenarios can be exercised against the
/// same address. Grounded in the teacher's `ws_errors.rs` `spawn_ws_server`.
pub async fn start_mock_server<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = accept_async(stream).await {
                tokio::spawn(handler_fut(&handler, ws));
            }
        }
    });

    addr
}

fn handler_fut<F, Fut>(handler: &F, conn: Conn) -> Pin<Box<dyn Future<Output = ()> + Send>>
where
    F: Fn(Conn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::pin(handler(conn))
}

pub fn ws_url(addr: SocketAddr) -> String {
    format!("ws://{addr}")
}
