//! Gateway connection loop.
//!
//! [`run`] keeps one socket open to the gateway for the lifetime of the SDK.
//! Each socket starts with the synchronizer's handshake batch; after that
//! the loop shuttles queued client messages out, server messages in, and
//! fired wait timers to the synchronizer. When the socket drops, local
//! session state is cleared and the loop reconnects with exponential
//! backoff until cancelled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use waypoint_core::protocol::{decode_server_frame, ClientMessage, Frame};

use crate::config::SdkConfig;
use crate::error::{SdkError, SdkResult};
use crate::reconnect::next_delay;
use crate::synchronizer::{ClientSynchronizer, SyncChannels};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub type SharedSynchronizer = Arc<Mutex<ClientSynchronizer>>;

pub(crate) fn lock(sync: &Mutex<ClientSynchronizer>) -> MutexGuard<'_, ClientSynchronizer> {
    sync.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How a socket session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Closed,
    Failed(SdkError),
}

/// Connect, serve, and reconnect until `cancel` fires.
pub async fn run(
    config: SdkConfig,
    sync: SharedSynchronizer,
    mut channels: SyncChannels,
    cancel: CancellationToken,
) {
    let url = config.socket_url();
    let mut delay = config.reconnect.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((socket, _response)) => {
                tracing::info!(attempt, client_id = %config.client_id, "Connected to gateway");
                attempt = 0;
                delay = config.reconnect.initial_delay;

                let end = serve(socket, &sync, &mut channels, &cancel).await;
                lock(&sync).on_disconnected();
                match end {
                    SessionEnd::Cancelled => {
                        tracing::info!("Gateway connection closed by shutdown");
                        return;
                    }
                    SessionEnd::Closed => tracing::info!("Gateway closed the connection"),
                    SessionEnd::Failed(e) => tracing::warn!(error = %e, "Gateway connection failed"),
                }
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Connect attempt {attempt} failed");
            }
        }

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, &config.reconnect);
    }
}

async fn serve(
    socket: Socket,
    sync: &Mutex<ClientSynchronizer>,
    channels: &mut SyncChannels,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = socket.split();

    let handshake = {
        let sync = lock(sync);
        sync.on_connected();
        sync.handshake()
    };
    for message in handshake {
        if let Err(e) = send(&mut sink, message).await {
            return SessionEnd::Failed(e);
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => match decode_server_frame(&text) {
                    Ok(message) => {
                        lock(sync).handle_server_message(message);
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame"),
                },
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(e.into()),
            },
            Some(message) = channels.outbound.recv() => {
                if let Err(e) = send(&mut sink, message).await {
                    return SessionEnd::Failed(e);
                }
            }
            Some(condition_id) = channels.fired_timers.recv() => {
                let reported = lock(sync).on_timer_fired(&condition_id);
                if let Err(e) = reported {
                    tracing::warn!(condition_id = %condition_id, error = %e, "Failed to report wait timer");
                }
            }
        }
    }
}

async fn send<S>(sink: &mut S, message: ClientMessage) -> SdkResult<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let kind = message.kind();
    let text = Frame::Client(message).encode()?;
    sink.send(Message::Text(text)).await?;
    tracing::trace!(kind, "Sent client message");
    Ok(())
}
