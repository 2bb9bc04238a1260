//! WebSocket session of one seat client, from upgrade to disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};

use crate::core::backends::KvStore;
use crate::core::model::SeatId;
use crate::hub::seat_hub::SeatConnectionHub;

/// Heartbeat and write deadline of a socket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketSettings {
    /// Interval between server pings.
    pub heartbeat: Duration,
    /// Longest a single write may take before the client is dropped.
    pub write_timeout: Duration,
}

/// Serve one client socket for `seat` until either side closes it.
pub async fn serve_socket<K: KvStore>(
    socket: WebSocket,
    seat: SeatId,
    hub: Arc<SeatConnectionHub<K>>,
    settings: SocketSettings,
) {
    let (conn, mut outbound) = match hub.connect(seat).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(seat, error = %e, "could not register seat client");
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    let writer_conn = Arc::clone(&conn);
    let writer = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(settings.heartbeat);
        heartbeat.tick().await;
        loop {
            let message = tokio::select! {
                frame = outbound.recv() => match frame {
                    Some(text) => Message::Text(text.as_str().into()),
                    None => break,
                },
                _ = heartbeat.tick() => Message::Ping(Bytes::new()),
                () = writer_conn.closed() => break,
            };
            match tokio::time::timeout(settings.write_timeout, sink.send(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!(seat = writer_conn.seat_id, error = %e, "socket write failed");
                    break;
                }
                Err(_) => {
                    tracing::warn!(seat = writer_conn.seat_id, "socket write deadline exceeded");
                    break;
                }
            }
        }
        writer_conn.close();
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => hub.handle_text(&conn, text.as_str()).await,
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            () = conn.closed() => break,
        }
    }

    hub.disconnect(&conn);
    if let Err(e) = writer.await {
        tracing::debug!(seat, error = %e, "socket writer ended abnormally");
    }
    tracing::info!(seat, conn = conn.id, "seat client disconnected");
}
