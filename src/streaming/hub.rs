//! Multi-client broadcast hub.
//!
//! Grounded on the teacher's `handle_socket`/`AppState.signal_broadcast`
//! WebSocket loop (`tokio::select!` over client recv + broadcast recv), but
//! generalized from a single `tokio::sync::broadcast` channel into a hub
//! task holding one `mpsc::Sender<Envelope>` per client. A plain
//! `broadcast::Receiver` only reports "you lagged" after the fact; a
//! per-client bounded `mpsc` gives us the bufferSize-based eviction §8's S6
//! scenario requires (a slow client's channel fills up and that client is
//! dropped, not the whole broadcast group).

use crate::ids::ClientId;
use crate::streaming::protocol::Envelope;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

enum HubMessage {
    Register { id: ClientId, sender: mpsc::Sender<Envelope>, reply: oneshot::Sender<()> },
    Unregister(ClientId),
    Broadcast(Envelope),
    SendTo { id: ClientId, envelope: Envelope },
    ClientCount(oneshot::Sender<usize>),
    Shutdown,
}

/// Cloneable handle into the hub task. All mutation of hub state happens
/// inside the task itself, reached only through this channel (§5: "Hub
/// state: mutated only via its channels; no external locking required").
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<HubMessage>,
    buffer_size: usize,
}

impl Hub {
    /// Spawns the hub task and returns a handle to it. `buffer_size` is the
    /// per-client send queue capacity from the enumerated stream config.
    pub fn spawn(buffer_size: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<HubMessage>();
        tokio::spawn(async move {
            let mut clients: HashMap<ClientId, mpsc::Sender<Envelope>> = HashMap::new();
            while let Some(msg) = rx.recv().await {
                match msg {
                    HubMessage::Register { id, sender, reply } => {
                        clients.insert(id, sender);
                        let _ = reply.send(());
                    }
                    HubMessage::Unregister(id) => {
                        if clients.remove(&id).is_some() {
                            debug!(client = %id, "client unregistered");
                        }
                    }
                    HubMessage::Broadcast(envelope) => {
                        let mut dead = Vec::new();
                        for (id, sender) in clients.iter() {
                            match sender.try_send(envelope.clone()) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    warn!(client = %id, "dropping slow client: send queue full");
                                    dead.push(id.clone());
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    dead.push(id.clone());
                                }
                            }
                        }
                        for id in dead {
                            clients.remove(&id);
                        }
                    }
                    HubMessage::SendTo { id, envelope } => {
                        if let Some(sender) = clients.get(&id) {
                            if sender.try_send(envelope).is_err() {
                                clients.remove(&id);
                            }
                        }
                    }
                    HubMessage::ClientCount(reply) => {
                        let _ = reply.send(clients.len());
                    }
                    HubMessage::Shutdown => {
                        clients.clear();
                        break;
                    }
                }
            }
            info!("streaming hub task exiting");
        });
        Self { tx, buffer_size }
    }

    /// Registers a new client, returning its id and the receiving end of
    /// its outbound queue (to be drained by that connection's writer task).
    pub async fn register(&self) -> (ClientId, mpsc::Receiver<Envelope>) {
        let id = ClientId::next();
        let (sender, receiver) = mpsc::channel(self.buffer_size.max(1));
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.tx.send(HubMessage::Register { id: id.clone(), sender, reply: reply_tx });
        let _ = reply_rx.await;
        (id, receiver)
    }

    pub fn unregister(&self, id: ClientId) {
        let _ = self.tx.send(HubMessage::Unregister(id));
    }

    /// Enqueues `envelope` for every currently-registered client. Never
    /// blocks the caller (the simulation time loop): per-client delivery is
    /// a `try_send`, and a full queue evicts that client rather than
    /// stalling the broadcast (§5's suspension point (d)).
    pub fn broadcast(&self, envelope: Envelope) {
        let _ = self.tx.send(HubMessage::Broadcast(envelope));
    }

    /// Enqueues `envelope` for exactly one client (used for direct replies
    /// like `pong`/`control_response`, rather than a full broadcast).
    pub fn send_to(&self, id: ClientId, envelope: Envelope) {
        let _ = self.tx.send(HubMessage::SendTo { id, envelope });
    }

    pub async fn client_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(HubMessage::ClientCount(reply_tx)).is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(HubMessage::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::protocol::EnvelopeKind;

    fn envelope(n: i64) -> Envelope {
        Envelope::new(EnvelopeKind::Pong { timestamp: n }, n)
    }

    #[tokio::test]
    async fn broadcast_delivers_to_all_registered_clients_in_order() {
        let hub = Hub::spawn(16);
        let (id_a, mut rx_a) = hub.register().await;
        let (id_b, mut rx_b) = hub.register().await;

        for i in 0..5 {
            hub.broadcast(envelope(i));
        }
        // Give the hub task a chance to process the unbounded command queue.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        for i in 0..5 {
            let got = rx_a.recv().await.unwrap();
            assert_eq!(got.timestamp, i);
        }
        for i in 0..5 {
            let got = rx_b.recv().await.unwrap();
            assert_eq!(got.timestamp, i);
        }
        hub.unregister(id_a);
        hub.unregister(id_b);
    }

    #[tokio::test]
    async fn s6_slow_client_is_evicted_fast_client_receives_all() {
        let buffer_size = 4;
        let hub = Hub::spawn(buffer_size);
        let (_id_a, rx_a) = hub.register().await; // never drained: the slow client
        let (_id_b, mut rx_b) = hub.register().await;

        let n = buffer_size * 3; // far more than the slow client's queue can hold
        let mut received = Vec::new();
        for i in 0..n as i64 {
            hub.broadcast(envelope(i));
            // Yield between sends so the hub task observes the full queue
            // and evicts client A partway through, rather than racing it.
            tokio::task::yield_now().await;
            // Client B is the fast client: drain it as messages arrive so its
            // own queue never fills, unlike A's.
            while let Ok(env) = rx_b.try_recv() {
                received.push(env.timestamp);
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(hub.client_count().await, 1);

        while let Ok(env) = rx_b.try_recv() {
            received.push(env.timestamp);
        }
        assert_eq!(received.len(), n);
        let expected: Vec<i64> = (0..n as i64).collect();
        assert_eq!(received, expected);

        drop(rx_a); // the evicted client's receiver
    }
}
