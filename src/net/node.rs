//! Per-node coordinator: one event loop consuming the transport, a
//! pending-request map for in-flight tour hops, and block production on
//! top of the chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::wire::{
    BlocksMessage, Message, PenaltyMessage, SignRequestMessage, SignResponseMessage,
    StatusMessage,
};
use super::{LocalTransport, NetAddr, NetError, NodeRegistry, Rpc, Transport, WireError};
use crate::config::NodeConfig;
use crate::consensus::chain::{Blockchain, ChainError};
use crate::consensus::poi::SignatureRequest;
use crate::crypto::{PrivateKey, PublicKey, Signature};
use crate::mempool::Mempool;
use crate::types::{Block, Transaction};

/// Per-hop wait for a remote signature before the tour is aborted.
pub const SIGN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Maintenance tick; no required behavior beyond a heartbeat log.
pub const TICK_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node event loop already started")]
    AlreadyStarted,
    #[error("signature request timeout")]
    Timeout,
    #[error("signature request failed: {0}")]
    Remote(String),
    #[error("response channel closed before a reply arrived")]
    ChannelClosed,
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}

pub struct NodeOpts {
    pub address: NetAddr,
    pub key: PrivateKey,
    pub transport: Arc<LocalTransport>,
    pub registry: Arc<NodeRegistry>,
    pub chain: Arc<Blockchain>,
    pub config: NodeConfig,
}

pub struct Node {
    address: NetAddr,
    key: PrivateKey,
    public_key: PublicKey,
    transport: Arc<LocalTransport>,
    registry: Arc<NodeRegistry>,
    chain: Arc<Blockchain>,
    mempool: Mempool,
    max_txs_per_block: usize,
    pending: Mutex<HashMap<String, oneshot::Sender<SignResponseMessage>>>,
    request_seq: AtomicU64,
    shutdown: tokio::sync::Notify,
}

impl Node {
    pub fn new(opts: NodeOpts) -> Arc<Self> {
        let public_key = opts.key.public_key();
        Arc::new(Self {
            address: opts.address,
            key: opts.key,
            public_key,
            transport: opts.transport,
            registry: opts.registry,
            chain: opts.chain,
            mempool: Mempool::new(opts.config.mempool.capacity),
            max_txs_per_block: opts.config.consensus.max_txs_per_block,
            pending: Mutex::new(HashMap::new()),
            request_seq: AtomicU64::new(0),
            shutdown: tokio::sync::Notify::new(),
        })
    }

    pub fn address(&self) -> &NetAddr {
        &self.address
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Spawns the event loop. Errs when the transport stream was already
    /// consumed.
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, NodeError> {
        let rx = self.transport.consume().ok_or(NodeError::AlreadyStarted)?;
        let node = Arc::clone(self);
        Ok(tokio::spawn(node.run(rx)))
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Rpc>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_rpc = rx.recv() => match maybe_rpc {
                    Some(rpc) => self.handle_rpc(rpc),
                    None => break,
                },
                _ = tick.tick() => {
                    debug!(node = %self.address, height = self.chain.height(), "tick");
                }
                _ = self.shutdown.notified() => {
                    // Drain whatever is already queued, then exit.
                    while let Ok(rpc) = rx.try_recv() {
                        self.handle_rpc(rpc);
                    }
                    break;
                }
            }
        }
        debug!(node = %self.address, "event loop stopped");
    }

    fn handle_rpc(&self, rpc: Rpc) {
        let message = match Message::decode(&rpc.payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(node = %self.address, from = %rpc.from, "undecodable payload: {e}");
                return;
            }
        };

        if let Err(e) = self.handle_message(rpc.from.clone(), message) {
            warn!(node = %self.address, from = %rpc.from, "message handling failed: {e}");
        }
    }

    fn handle_message(&self, from: NetAddr, message: Message) -> Result<(), NodeError> {
        match message {
            Message::Transaction(tx) => {
                if let Err(e) = self.mempool.push(tx) {
                    debug!(node = %self.address, "transaction dropped: {e}");
                }
                Ok(())
            }

            Message::Block(block) => self.accept_block(block),

            Message::Blocks(batch) => {
                for block in batch.blocks {
                    // Batches overlap under gossip; duplicates are expected.
                    if let Err(e) = self.accept_block(block) {
                        debug!(node = %self.address, "batch block skipped: {e}");
                    }
                }
                Ok(())
            }

            Message::BlockRequest(req) => {
                let reply = match self.chain.get_block(&req.hash) {
                    Ok(block) => BlocksMessage { blocks: vec![block] },
                    Err(_) => BlocksMessage { blocks: vec![] },
                };
                self.send(&from, &Message::Blocks(reply))
            }

            Message::StatusRequest => {
                let status = StatusMessage {
                    height: self.chain.height(),
                    head: self.chain.last_block_hash(),
                };
                self.send(&from, &Message::Status(status))
            }

            Message::Status(status) => {
                debug!(
                    node = %self.address,
                    peer = %from,
                    peer_height = status.height,
                    "peer status"
                );
                Ok(())
            }

            Message::SignRequest(req) => self.serve_sign_request(from, req),

            Message::SignResponse(resp) => {
                let waiter = self.pending.lock().remove(&resp.request_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(resp);
                    }
                    None => {
                        // Likely a reply that lost the race against the
                        // request timeout.
                        debug!(node = %self.address, id = %resp.request_id, "stray response");
                    }
                }
                Ok(())
            }

            Message::Penalty(penalty) => {
                warn!(
                    node = %self.address,
                    offender = %penalty.offender,
                    dependency = %penalty.dependency.short(),
                    "double-touring penalty reported"
                );
                Ok(())
            }
        }
    }

    fn accept_block(&self, block: Block) -> Result<(), NodeError> {
        let included = block.transactions.clone();
        self.chain.add_block(block)?;
        self.mempool.remove_included(&included);
        Ok(())
    }

    /// Vets and answers one tour hop. A double-touring attempt is refused
    /// and denounced to all peers.
    fn serve_sign_request(&self, from: NetAddr, req: SignRequestMessage) -> Result<(), NodeError> {
        let request_id = req.request_id.clone();
        let core_req: SignatureRequest = req.into();

        let reply = match self.chain.handle_signature_request(&core_req, &self.key) {
            Ok(signature) => SignResponseMessage::ok(request_id, signature),
            Err(e) => {
                if let ChainError::DoubleTouring(evidence) = &e {
                    let penalty = PenaltyMessage {
                        offender: evidence.from,
                        dependency: evidence.dependency,
                        message1: evidence.first,
                        message2: evidence.second,
                    };
                    warn!(node = %self.address, offender = %evidence.from, "double-touring detected");
                    self.broadcast(&Message::Penalty(penalty))?;
                }
                SignResponseMessage::failed(request_id, e.to_string())
            }
        };

        self.send(&from, &Message::SignResponse(reply))
    }

    fn send(&self, to: &NetAddr, message: &Message) -> Result<(), NodeError> {
        Ok(self.transport.send_message(to, message.encode()?)?)
    }

    fn broadcast(&self, message: &Message) -> Result<(), NodeError> {
        Ok(self.transport.broadcast(message.encode()?)?)
    }

    /// Sends one signature request and suspends until the response lands
    /// or the per-hop timeout fires. The pending-map entry lives exactly
    /// as long as this call.
    pub async fn request_signature(
        &self,
        req: SignatureRequest,
        service: PublicKey,
    ) -> Result<Signature, NodeError> {
        // A tour may select the initiator itself; serve that hop locally
        // instead of waiting on a loopback message that never arrives.
        if service == self.public_key {
            return Ok(self.chain.handle_signature_request(&req, &self.key)?);
        }

        let service_addr = self.registry.address_of(&service)?;

        let seq = self.request_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let request_id = format!("{}-{}-{}", self.address, seq, service.short());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        let message = Message::SignRequest(SignRequestMessage {
            request_id: request_id.clone(),
            hash: req.hash,
            dependency: req.dependency,
            message: req.message,
            from: req.from,
        });

        let result = match self.send(&service_addr, &message) {
            Err(e) => Err(e),
            Ok(()) => match timeout(SIGN_REQUEST_TIMEOUT, rx).await {
                Err(_) => Err(NodeError::Timeout),
                Ok(Err(_)) => Err(NodeError::ChannelClosed),
                Ok(Ok(resp)) => {
                    if !resp.error.is_empty() {
                        Err(NodeError::Remote(resp.error))
                    } else {
                        resp.signature
                            .ok_or_else(|| NodeError::Remote("empty response".into()))
                    }
                }
            },
        };

        self.pending.lock().remove(&request_id);
        result
    }

    /// Produces the next block, walking a PoI tour through this node's
    /// peers.
    pub async fn generate_block(
        self: &Arc<Self>,
        transactions: Vec<Transaction>,
    ) -> Result<Block, NodeError> {
        let node = Arc::clone(self);
        let provider = move |req: SignatureRequest, service: PublicKey| {
            let node = node.clone();
            async move {
                node.request_signature(req, service)
                    .await
                    .map_err(|e| e.to_string())
            }
        };

        Ok(self.chain.generate_block(&self.key, transactions, provider).await?)
    }

    /// Produces a block from pending mempool transactions, up to the
    /// configured `max_txs_per_block`.
    pub async fn generate_block_from_mempool(self: &Arc<Self>) -> Result<Block, NodeError> {
        let transactions = self.mempool.drain(self.max_txs_per_block);
        self.generate_block(transactions).await
    }

    pub fn broadcast_block(&self, block: &Block) -> Result<(), NodeError> {
        self.broadcast(&Message::Block(block.clone()))
    }

    pub fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), NodeError> {
        self.broadcast(&Message::Transaction(tx.clone()))
    }
}
