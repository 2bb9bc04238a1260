//! Fan-out of seat state to every live client connection of the seat.
//!
//! Client writes go through the [`SeatStateStore`]; the hub never broadcasts them directly.
//! Instead [`SeatConnectionHub::run_forwarder`] turns the store's change feed into frames, so
//! writes from the hub, the reconciler and the REST operations reach clients the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::core::backends::KvStore;
use crate::core::model::SeatId;
use crate::core::seat_store::{ChangeKind, SeatChange, SeatStateStore};
use crate::core::EngineError;
use crate::hub::connection::SeatConnection;
use crate::hub::protocol::{ClientFrame, LockNotice, ServerFrame};

#[derive(Default)]
struct Registry {
    connections: HashMap<SeatId, Vec<Arc<SeatConnection>>>,
    /// Bumped on every connect; a grace timer only fires if the epoch it saw is current.
    epochs: HashMap<SeatId, u64>,
}

/// Live connections grouped by seat.
pub struct SeatConnectionHub<K> {
    store: Arc<SeatStateStore<K>>,
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    buffer: usize,
    grace: Duration,
}

impl<K: KvStore> SeatConnectionHub<K> {
    /// Create a hub. `buffer` bounds each connection's outbound queue; `grace` is how long a
    /// seat may stay without connections before it is signed out.
    pub fn new(store: Arc<SeatStateStore<K>>, buffer: usize, grace: Duration) -> Self {
        Self {
            store,
            registry: Mutex::new(Registry::default()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            grace,
        }
    }

    /// Register a connection and queue the current seat state on it.
    pub async fn connect(
        &self,
        seat: SeatId,
    ) -> Result<(Arc<SeatConnection>, mpsc::Receiver<Arc<String>>), EngineError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let conn = Arc::new(SeatConnection::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            seat,
            tx,
        ));
        {
            let mut registry = self.registry.lock();
            *registry.epochs.entry(seat).or_default() += 1;
            registry
                .connections
                .entry(seat)
                .or_default()
                .push(Arc::clone(&conn));
        }
        let state = self.store.get(seat).await?;
        conn.send(ServerFrame::StateChanged(state).encode()?);
        tracing::info!(seat, conn = conn.id, "seat client connected");
        Ok((conn, rx))
    }

    /// Unregister a connection. When it was the seat's last one, a grace timer starts; if no
    /// client reconnects before it fires, the seat is signed out.
    pub fn disconnect(self: &Arc<Self>, conn: &SeatConnection) {
        conn.close();
        let epoch = {
            let mut registry = self.registry.lock();
            let Some(list) = registry.connections.get_mut(&conn.seat_id) else {
                return;
            };
            let before = list.len();
            list.retain(|c| c.id != conn.id);
            if list.len() == before || !list.is_empty() {
                return;
            }
            registry.connections.remove(&conn.seat_id);
            registry.epochs.get(&conn.seat_id).copied().unwrap_or_default()
        };
        tracing::info!(seat = conn.seat_id, "last seat client gone, grace period started");

        let hub = Arc::clone(self);
        let seat = conn.seat_id;
        tokio::spawn(async move {
            tokio::time::sleep(hub.grace).await;
            if !hub.grace_expired(seat, epoch) {
                return;
            }
            if let Err(e) = hub.sign_out(seat).await {
                tracing::error!(seat, error = %e, "could not sign out abandoned seat");
            }
        });
    }

    /// Number of live connections of `seat`.
    pub fn connection_count(&self, seat: SeatId) -> usize {
        self.registry
            .lock()
            .connections
            .get(&seat)
            .map_or(0, Vec::len)
    }

    /// Apply one inbound text frame from `conn`. Rejections are answered with an error frame
    /// on that connection only.
    pub async fn handle_text(&self, conn: &SeatConnection, text: &str) {
        let frame = match ClientFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.reply_error(conn, &e.to_string());
                return;
            }
        };
        let seat = conn.seat_id;
        let mut rejection: Option<String> = None;
        let result = match frame {
            ClientFrame::CheckinChanged(change) => {
                self.store
                    .update(seat, |cur| {
                        let mut next = cur.clone();
                        next.checked_in = change.checkin;
                        if !change.checkin {
                            next.ready = false;
                        }
                        Some(next)
                    })
                    .await
            }
            ClientFrame::ReadinessChanged(change) => {
                self.store
                    .update(seat, |cur| {
                        if change.ready && !cur.checked_in {
                            rejection = Some("cannot become ready before checking in".into());
                            return None;
                        }
                        if change.ready && change.projects.is_empty() {
                            rejection = Some("cannot become ready without projects".into());
                            return None;
                        }
                        let mut next = cur.clone();
                        next.ready = change.ready;
                        next.projects.clone_from(&change.projects);
                        Some(next)
                    })
                    .await
            }
        };
        match (result, rejection) {
            (Ok(_), Some(reason)) => self.reply_error(conn, &reason),
            (Ok(_), None) => {}
            (Err(e), _) => {
                tracing::error!(seat, error = %e, "seat write from client failed");
                self.reply_error(conn, &e.to_string());
            }
        }
    }

    /// Queue `frame` on every connection of `seat`. Connections that cannot take it are
    /// dropped. Returns the number of connections reached.
    pub fn broadcast(self: &Arc<Self>, seat: SeatId, frame: &ServerFrame) -> usize {
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(seat, error = %e, "could not encode frame");
                return 0;
            }
        };
        let targets = self
            .registry
            .lock()
            .connections
            .get(&seat)
            .cloned()
            .unwrap_or_default();
        let mut reached = 0;
        for conn in targets {
            if conn.send(Arc::clone(&encoded)) {
                reached += 1;
            } else {
                self.disconnect(&conn);
            }
        }
        reached
    }

    /// Forward committed seat writes to clients until the feed closes.
    pub async fn run_forwarder(self: Arc<Self>, mut changes: broadcast::Receiver<SeatChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => self.forward(&change),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "seat change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    fn forward(self: &Arc<Self>, change: &SeatChange) {
        let seat = change.state.seat_id;
        self.broadcast(seat, &ServerFrame::StateChanged(change.state.clone()));
        if matches!(change.kind, ChangeKind::Locked | ChangeKind::Unlocked) {
            let notice = LockNotice {
                locked: change.state.locked,
                call_id: change.state.call_id.clone(),
            };
            self.broadcast(seat, &ServerFrame::LockedChanged(notice));
        }
    }

    fn reply_error(&self, conn: &SeatConnection, message: &str) {
        tracing::debug!(seat = conn.seat_id, message, "rejecting client frame");
        match ServerFrame::error(message).encode() {
            Ok(frame) => {
                conn.send(frame);
            }
            Err(e) => tracing::error!(error = %e, "could not encode error frame"),
        }
    }

    fn grace_expired(&self, seat: SeatId, epoch: u64) -> bool {
        let registry = self.registry.lock();
        !registry.connections.contains_key(&seat)
            && registry.epochs.get(&seat).copied().unwrap_or_default() == epoch
    }

    async fn sign_out(&self, seat: SeatId) -> Result<(), EngineError> {
        let written = self
            .store
            .update(seat, |cur| {
                if !cur.checked_in && !cur.ready {
                    return None;
                }
                let mut next = cur.clone();
                next.checked_in = false;
                next.ready = false;
                Some(next)
            })
            .await?;
        if written.is_some() {
            tracing::info!(seat, "seat signed out after grace period");
        }
        Ok(())
    }
}
