//! One live client connection of a seat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::core::model::SeatId;

/// Identifier of a connection, unique within a hub.
pub type ConnectionId = u64;

/// Outbound half of a connection. Frames are queued without blocking; a full queue closes
/// the connection.
pub struct SeatConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Seat the client signed in to.
    pub seat_id: SeatId,
    tx: mpsc::Sender<Arc<String>>,
    closed: watch::Sender<bool>,
    dropped: AtomicU64,
}

impl SeatConnection {
    /// Create a connection whose frames go to `tx`.
    pub fn new(id: ConnectionId, seat_id: SeatId, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            seat_id,
            tx,
            closed: watch::Sender::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue a frame. Returns false, and closes the connection, when the buffer is full or
    /// the writer is gone.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(seat = self.seat_id, conn = self.id, "client buffer full, disconnecting");
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                false
            }
        }
    }

    /// Mark the connection closed and wake its socket tasks. Returns true the first time.
    pub fn close(&self) -> bool {
        self.closed.send_if_modified(|closed| {
            let first = !*closed;
            *closed = true;
            first
        })
    }

    /// Whether the connection was closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Frames refused because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn full_buffer_closes_connection() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = SeatConnection::new(1, 5, tx);
        assert!(conn.send(Arc::new("a".into())));
        assert!(!conn.send(Arc::new("b".into())));
        assert!(conn.is_closed());
        assert_eq!(conn.dropped(), 1);
        assert!(!conn.send(Arc::new("c".into())));
        assert_eq!(rx.recv().await.unwrap().as_str(), "a");
    }

    #[tokio::test]
    async fn closed_wakes_every_waiter() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = Arc::new(SeatConnection::new(2, 5, tx));
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move { conn.closed().await })
            })
            .collect();
        assert!(conn.close());
        assert!(!conn.close());
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn dropped_receiver_closes_connection() {
        let (tx, rx) = mpsc::channel(4);
        let conn = SeatConnection::new(3, 5, tx);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
        assert!(conn.is_closed());
    }
}
