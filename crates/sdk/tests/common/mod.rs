#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use waypoint_core::protocol::{decode_client_frame, ClientMessage, Frame, ServerMessage};
use waypoint_sdk::reconnect::ReconnectConfig;
use waypoint_sdk::SdkConfig;

pub const TEST_TOKEN: &str = "test-token";
pub const CLIENT_ID: &str = "browser-1";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A bare WebSocket server standing in for the gateway.
pub struct TestGateway {
    pub url: String,
    connections: mpsc::UnboundedReceiver<TestSocket>,
}

/// One accepted SDK socket.
pub struct TestSocket {
    /// Request path and query of the upgrade.
    pub path: String,
    ws: WebSocketStream<TcpStream>,
}

impl TestGateway {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut path = String::new();
                let capture_path =
                    |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        path = req.uri().to_string();
                        Ok(resp)
                    };
                let accepted = accept_hdr_async(stream, capture_path).await;
                if let Ok(ws) = accepted {
                    if tx.send(TestSocket { path, ws }).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            connections,
        }
    }

    /// Wait for the next SDK connection.
    pub async fn accept(&mut self) -> TestSocket {
        tokio::time::timeout(RECV_TIMEOUT, self.connections.recv())
            .await
            .expect("SDK did not connect in time")
            .expect("gateway listener stopped")
    }
}

impl TestSocket {
    /// Next client message, skipping control frames.
    pub async fn recv(&mut self) -> ClientMessage {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("no client message in time")
                .expect("socket closed")
                .expect("socket error");
            if let Message::Text(text) = frame {
                return decode_client_frame(&text).expect("valid client frame");
            }
        }
    }

    /// Read one connect handshake, from `BeginBatch` to `EndBatch`
    /// inclusive, and return the message kinds.
    pub async fn recv_handshake(&mut self) -> Vec<ClientMessage> {
        let mut messages = vec![self.recv().await];
        assert_eq!(messages[0], ClientMessage::BeginBatch, "handshake opens a batch");
        loop {
            let message = self.recv().await;
            let done = message == ClientMessage::EndBatch;
            messages.push(message);
            if done {
                return messages;
            }
        }
    }

    pub async fn send(&mut self, message: ServerMessage) {
        let text = Frame::Server(message).encode().expect("encode");
        self.ws.send(Message::Text(text)).await.expect("send");
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.expect("send");
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// SDK config pointing at `gateway` with a fast retry schedule.
pub fn sdk_config(gateway: &TestGateway) -> SdkConfig {
    let mut config = SdkConfig::new(gateway.url.as_str(), TEST_TOKEN)
        .expect("config")
        .with_client_id(CLIENT_ID)
        .expect("client id");
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        multiplier: 2.0,
    };
    config
}

pub fn kinds(messages: &[ClientMessage]) -> Vec<&'static str> {
    messages.iter().map(ClientMessage::kind).collect()
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
