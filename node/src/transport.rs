// TCP transport (spec.md S4.8): one read task and one write task per
// connection. Sockets only move bytes; handshake acceptance, gossip dedup
// and peer bookkeeping stay inside the supervisor's single-threaded event
// loop, reached over `inbound`. Grounded in the accept-loop/per-connection
// task shape of `examples/tos-network-tos/daemon/src/discovery/server.rs`,
// adapted from UDP datagrams to framed TCP streams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use synod_common::{block::NodeId, message::SignedMessage};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use crate::p2p::{read_frame, write_frame};
use crate::supervisor::InboundEvent;

/// Per-peer outbound queues, so `Outbound::SendTo` can reach one connection
/// without the supervisor knowing about sockets. Drop-oldest on overflow
/// (spec.md S5 "gossip/peer-exchange queues drop-oldest").
#[derive(Clone, Default)]
pub struct OutboundRegistry {
    senders: Arc<Mutex<HashMap<NodeId, mpsc::Sender<SignedMessage>>>>,
}

const PER_PEER_OUTBOUND_CAPACITY: usize = 256;

impl OutboundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, id: NodeId) -> mpsc::Receiver<SignedMessage> {
        let (tx, rx) = mpsc::channel(PER_PEER_OUTBOUND_CAPACITY);
        self.senders.lock().await.insert(id, tx);
        rx
    }

    async fn unregister(&self, id: &NodeId) {
        self.senders.lock().await.remove(id);
    }

    pub async fn send_to(&self, id: NodeId, message: SignedMessage) {
        let sender = self.senders.lock().await.get(&id).cloned();
        if let Some(sender) = sender {
            let _ = sender.try_send(message);
        }
    }

    pub async fn broadcast(&self, message: SignedMessage) {
        let senders: Vec<_> = self.senders.lock().await.values().cloned().collect();
        for sender in senders {
            let _ = sender.try_send(message.clone());
        }
    }
}

/// Accepts inbound TCP connections and forwards every decoded frame to
/// `inbound`. Runs until `running` is cleared.
pub async fn accept_loop(
    listen_address: String,
    running: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundEvent>,
    outbound: OutboundRegistry,
) {
    let listener = match TcpListener::bind(&listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("failed to bind {listen_address}: {e}");
            return;
        }
    };
    info!("listening for peer connections on {listen_address}");

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        info!("accepted connection from {addr}");
                        tokio::spawn(run_connection(stream, running.clone(), inbound.clone(), outbound.clone()));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
        }
    }
}

/// Dials `address` and runs the same per-connection loop as an accepted
/// connection, for the node's own outbound peer connections.
pub async fn connect(
    address: String,
    running: Arc<AtomicBool>,
    inbound: mpsc::Sender<InboundEvent>,
    outbound: OutboundRegistry,
) -> std::io::Result<()> {
    let stream = TcpStream::connect(&address).await?;
    tokio::spawn(run_connection(stream, running, inbound, outbound));
    Ok(())
}

/// One read half, one write half: the read half decodes frames into
/// `InboundEvent::Message`; the write half drains a per-peer outbound queue
/// registered against the first frame's sender id (a real handshake
/// exchange happens at the `MessagePayload::Handshake` level, one frame up).
async fn run_connection(stream: TcpStream, running: Arc<AtomicBool>, inbound: mpsc::Sender<InboundEvent>, outbound: OutboundRegistry) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut peer_id: Option<NodeId> = None;
    let mut write_rx: Option<mpsc::Receiver<SignedMessage>> = None;

    loop {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            frame = read_frame(&mut read_half) => {
                match frame {
                    Ok(message) => {
                        if peer_id.is_none() {
                            peer_id = Some(message.sender);
                            write_rx = Some(outbound.register(message.sender).await);
                        }
                        if inbound.send(InboundEvent::Message { from: message.sender, message }).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            outgoing = async {
                match write_rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match outgoing {
                    Some(message) => {
                        if write_frame(&mut write_half, &message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(id) = peer_id {
        outbound.unregister(&id).await;
    }
}
