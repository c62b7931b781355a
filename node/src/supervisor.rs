// Node supervisor (spec.md S4.9): the composition root. Owns every
// component exclusively and is the only task that mutates them; inbound
// network events and timer ticks are funneled through bounded channels and
// processed one at a time, so no mutable state ever crosses a task boundary
// (spec.md S5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser as _;
use log::{error, info, warn};
use synod_common::{
    amount::Amount,
    block::{Block, Height, NodeId},
    crypto::{Address, Hash, KeyPair, PubKey},
    message::{BootstrapCommitPayload, MessagePayload, SignedMessage},
    time::TimestampMillis,
    transaction::Transaction,
    vote::{Decision, Vote},
};
use tokio::sync::mpsc;

use crate::{
    bootstrap::{BootstrapManager, BootstrapPhase},
    config::NodeConfig,
    consensus::{proposer_for, ConsensusEngine, RoundPhase},
    error::{BootstrapError, ConsensusError, FatalError, LedgerError, PoolRejection},
    halving::SplitPercent,
    ledger::{LedgerStore, SystemAddresses},
    p2p::PeerSet,
    pool::TransactionPool,
    producer::BlockProducer,
    storage::Storage,
};

/// An inbound event: either a message from a peer, or a tick of the
/// supervisor's own clock.
pub enum InboundEvent {
    Message { from: NodeId, message: SignedMessage },
    PioneerConnected(NodeId),
    PioneerDisconnected(NodeId),
}

/// Something the supervisor wants sent out over the P2P layer. The
/// transport task (not implemented here) is responsible for signing (via
/// `Supervisor::sign_payload`) and dispatching these.
#[derive(Debug)]
pub enum Outbound {
    Broadcast(MessagePayload),
    SendTo(NodeId, MessagePayload),
}

pub struct Supervisor {
    config: NodeConfig,
    keys: KeyPair,
    self_id: NodeId,
    ledger: LedgerStore,
    pool: TransactionPool,
    bootstrap: BootstrapManager,
    consensus: ConsensusEngine,
    producer: BlockProducer,
    peers: PeerSet,
    /// Public keys learned from handshakes and peer exchange, needed to
    /// verify anything address-only (votes, gossiped transactions) since
    /// `Address` does not carry the key that produced it.
    known_keys: HashMap<Address, PubKey>,
    round_started_at: Option<TimestampMillis>,
    round_aborted_at: Option<TimestampMillis>,
    round_attempt: u64,
    next_message_id: u64,
    shutdown: Arc<AtomicBool>,
}

impl Supervisor {
    /// `config` must already have passed `NodeConfig::validate` (the bin
    /// entry point does this before constructing a `Supervisor`, so a bad
    /// config is reported with its own exit code rather than folded into
    /// `FatalError`).
    pub fn new(config: NodeConfig, keys: KeyPair) -> Result<Self, FatalError> {
        let storage = Storage::open(&config.data_dir, &config.network_id)
            .map_err(FatalError::CrashSafetyFailure)?;

        let system_addresses = SystemAddresses {
            liquidity: Address::system("liquidity"),
            burn: Address::system("burn"),
            maintenance: Address::system("maintenance"),
            developer: Address::system("developer"),
        };

        let ledger = LedgerStore::open(
            storage,
            system_addresses,
            config.initial_reward_amount(),
            SplitPercent::new(
                config.initial_split.burn,
                config.initial_split.maintenance,
                config.initial_split.liquidity,
            ),
            config.split_decrement_per_halving,
            config.halving_period_blocks,
            config.reputation_decay_bps_per_day,
        )
        .map_err(FatalError::InvariantViolation)?;

        let mut bootstrap = BootstrapManager::new(config.pioneer_count);
        if ledger.has_genesis() {
            bootstrap.resume_done();
        }

        let self_id = keys.address();
        let peers = PeerSet::new(config.network_id.clone(), config.max_peers, config.peer_low_water_mark);
        let pool = TransactionPool::new(config.pool_capacity_txs, config.max_txs_per_block);
        let producer = BlockProducer::new(config.block_period_ms);

        Ok(Supervisor {
            config,
            keys,
            self_id,
            ledger,
            pool,
            bootstrap,
            consensus: ConsensusEngine::new(),
            producer,
            peers,
            known_keys: HashMap::new(),
            round_started_at: None,
            round_aborted_at: None,
            round_attempt: 0,
            next_message_id: 0,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    // ---- Wallet / API surface (spec.md S6) ----

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.ledger.balance_of(address)
    }

    pub fn block_at(&self, height: Height) -> Option<&Block> {
        self.ledger.block_at(height)
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<&Block> {
        self.ledger.block_by_hash(hash)
    }

    /// Returns the transaction and its confirmation depth (1 at the tip,
    /// growing with every subsequent commit), or `None` if unknown.
    pub fn transaction_by_id(&self, id: &Hash) -> Option<(Transaction, u64)> {
        let (tip_height, _) = self.ledger.tip();
        for height in 0..=tip_height {
            let Some(block) = self.ledger.block_at(height) else {
                continue;
            };
            if let Some(tx) = block.transactions.iter().find(|tx| tx.id() == *id) {
                return Some((tx.clone(), tip_height - height + 1));
            }
        }
        None
    }

    pub fn halving_state(&self) -> (Amount, SplitPercent, u64) {
        (self.ledger.current_reward(), self.ledger.current_split(), self.ledger.halvings_elapsed())
    }

    pub fn reputation_score(&self, address: &Address, now: TimestampMillis) -> f64 {
        self.ledger.reputation_multiplier(address, now)
    }

    /// Accepts a signed transaction into the pool (spec.md S4.2). Also the
    /// path for voluntary-burn submissions (spec.md S6): same call, the tag
    /// on `tx` is simply `VoluntaryBurn`.
    pub fn submit_transaction(&mut self, tx: Transaction, sender_public_key: PubKey, now: TimestampMillis) -> Result<(), PoolRejection> {
        let balance = self.ledger.balance_of(&tx.sender);
        let last_nonce = self.ledger.last_nonce_of(&tx.sender);
        let priority = self.ledger.reputation_multiplier(&tx.sender, now);
        let burn_schedule_active = self.ledger.current_split().burn > 0;
        self.pool.submit(tx, sender_public_key, balance, last_nonce, burn_schedule_active, priority)
    }

    // ---- Event handling ----

    pub fn handle_event(&mut self, now: TimestampMillis, event: InboundEvent) -> Result<Vec<Outbound>, FatalError> {
        match event {
            InboundEvent::PioneerConnected(id) => {
                self.bootstrap.on_pioneer_connected(id);
                Ok(Vec::new())
            }
            InboundEvent::PioneerDisconnected(id) => {
                self.bootstrap.on_pioneer_disconnected(&id);
                Ok(Vec::new())
            }
            InboundEvent::Message { from, message } => self.handle_message(now, from, message),
        }
    }

    /// Verifies the message envelope's signature (spec.md S4.8 "signatures
    /// are verified on receipt before dispatch") before any payload is
    /// acted on. A `Handshake` is checked against the key it carries itself
    /// (trust on first contact); every other variant is checked against a
    /// key already on file in `known_keys`, so an unregistered sender is
    /// dropped rather than trusted. A bad signature disconnects the peer
    /// and adds it to the short-TTL avoid-list (spec.md S4.8).
    fn verify_envelope(&mut self, from: NodeId, message: &SignedMessage) -> bool {
        let sender_key = match &message.payload {
            MessagePayload::Handshake(payload) => {
                if message.sender != payload.node_id {
                    None
                } else {
                    Some(payload.public_key)
                }
            }
            _ => self.known_keys.get(&message.sender).copied(),
        };

        let Some(sender_key) = sender_key else {
            warn!("dropping message from {from}: sender key is not known yet");
            return false;
        };
        if !message.verify(&sender_key) {
            warn!("disconnecting {from}: message envelope signature does not verify");
            self.peers.disconnect_for_signature_failure(&from);
            return false;
        }
        true
    }

    fn handle_message(&mut self, now: TimestampMillis, from: NodeId, message: SignedMessage) -> Result<Vec<Outbound>, FatalError> {
        if !self.peers.should_forward(from, message.message_id) {
            return Ok(Vec::new());
        }
        if !self.verify_envelope(from, &message) {
            return Ok(Vec::new());
        }

        let mut outbound = Vec::new();
        match message.payload {
            MessagePayload::Handshake(payload) => {
                let node_id = payload.node_id;
                let public_key = payload.public_key;
                match self.peers.handshake(payload, format!("peer:{node_id}"), now) {
                    Ok(()) => {
                        self.known_keys.insert(node_id, public_key);
                    }
                    Err(e) => warn!("rejecting handshake from {from}: {e}"),
                }
            }
            MessagePayload::Heartbeat { .. } => {
                self.peers.touch(&from, now);
            }
            MessagePayload::TransactionGossip(tx) => {
                let Some(public_key) = self.known_keys.get(&tx.sender).copied() else {
                    warn!("dropping gossiped transaction from unknown sender {}", tx.sender);
                    return Ok(Vec::new());
                };
                if self.submit_transaction(tx.clone(), public_key, now).is_ok() {
                    outbound.push(Outbound::Broadcast(MessagePayload::TransactionGossip(tx)));
                }
            }
            MessagePayload::BlockProposal(block) => {
                outbound.extend(self.handle_proposal(now, from, block)?);
            }
            MessagePayload::Vote(vote) => {
                outbound.extend(self.handle_vote(now, vote)?);
            }
            MessagePayload::CommittedBlock(block) => {
                outbound.extend(self.accept_committed_block(block)?);
            }
            MessagePayload::BootstrapCommit(payload) => {
                outbound.extend(self.handle_bootstrap_commit(from, payload)?);
            }
            MessagePayload::PeerExchange(descriptors) => {
                for descriptor in descriptors {
                    self.known_keys.insert(descriptor.node_id, descriptor.public_key);
                }
            }
        }
        Ok(outbound)
    }

    fn handle_proposal(&mut self, now: TimestampMillis, from: NodeId, block: Block) -> Result<Vec<Outbound>, FatalError> {
        match self.consensus.on_proposal(from, block.clone()) {
            Ok(()) => {}
            Err(ConsensusError::WrongHeight) => return Ok(Vec::new()),
            Err(e) => {
                warn!("rejecting proposal from {from}: {e}");
                return Ok(Vec::new());
            }
        }
        if self.consensus.phase() != RoundPhase::Collecting {
            return Ok(Vec::new());
        }

        let decision = self.decide_vote(&block, &from);
        if self.config.role != crate::config::RoleConfig::AiNode {
            return Ok(Vec::new());
        }
        let vote = Vote::new(block.height, synod_common::crypto::Hashable::hash(&block), self.self_id, decision, &self.keys);
        let mut outbound = vec![Outbound::Broadcast(MessagePayload::Vote(vote.clone()))];
        outbound.extend(self.handle_vote(now, vote)?);
        Ok(outbound)
    }

    /// Every non-system transaction's signature verifies against a
    /// resolvable key (spec.md S4.6 "Every transaction's signature
    /// verifies"). System transactions carry no signature and are
    /// validated structurally instead, by the ledger's B2 shape check.
    fn transactions_are_signed(&self, block: &Block) -> bool {
        block.transactions.iter().all(|tx| {
            if tx.tag.is_system() {
                return true;
            }
            match self.known_keys.get(&tx.sender) {
                Some(key) => tx.verify_signature(key),
                None => false,
            }
        })
    }

    /// Lightweight structural pre-vote check (spec.md S4.6): proposer
    /// signature, every transaction's signature, merkle root, and the
    /// B1/B3 shape against the local tip. Full B2/nonce/balance validation
    /// happens again, authoritatively, in the ledger store at commit time.
    fn decide_vote(&self, block: &Block, proposer: &NodeId) -> Decision {
        let Some(proposer_key) = self.known_keys.get(proposer) else {
            return Decision::Reject;
        };
        if !block.verify_proposer_signature(proposer_key) {
            return Decision::Reject;
        }
        if !self.transactions_are_signed(block) {
            return Decision::Reject;
        }
        if !block.merkle_root_matches() {
            return Decision::Reject;
        }
        let (tip_height, tip_hash) = self.ledger.tip();
        let expected_height = if self.ledger.has_genesis() { tip_height + 1 } else { 0 };
        if block.height != expected_height {
            return Decision::Reject;
        }
        if self.ledger.has_genesis() && (block.parent_hash != tip_hash) {
            return Decision::Reject;
        }
        Decision::Approve
    }

    fn handle_vote(&mut self, _now: TimestampMillis, vote: Vote) -> Result<Vec<Outbound>, FatalError> {
        let Some(voter_key) = self.known_keys.get(&vote.voter).copied() else {
            warn!("dropping vote from unregistered voter {}", vote.voter);
            return Ok(Vec::new());
        };
        if vote.voter != self.self_id && !vote.verify(&voter_key) {
            warn!("dropping vote with bad signature from {}", vote.voter);
            return Ok(Vec::new());
        }

        match self.consensus.on_vote(vote) {
            Ok(Some(block)) => self.accept_committed_block(block),
            Ok(None) => Ok(Vec::new()),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Also reachable directly from a gossiped `CommittedBlock` (spec.md
    /// S4.8), which never passes through `decide_vote` - so the
    /// transaction-signature check is repeated here rather than trusted
    /// from whatever path got the block this far.
    fn accept_committed_block(&mut self, block: Block) -> Result<Vec<Outbound>, FatalError> {
        if !self.transactions_are_signed(&block) {
            warn!("rejecting committed block at height {}: a transaction signature does not verify", block.height);
            return Ok(Vec::new());
        }
        let (tip_height, tip_hash) = self.ledger.tip();
        if self.ledger.has_genesis() && block.height <= tip_height {
            return Ok(Vec::new()); // already applied or stale catch-up push
        }
        if self.ledger.has_genesis() && block.parent_hash != tip_hash {
            error!("committed block at height {} contradicts local tip; local fork detected", block.height);
            return Err(FatalError::LocalForkDetected);
        }

        match self.ledger.append_committed_block(block.clone()) {
            Ok(_) => {}
            Err(LedgerError::Storage(_)) => return Err(FatalError::CrashSafetyFailure(crate::error::StorageError::Corrupt("durable append failed".into()))),
            Err(e) => return Err(FatalError::InvariantViolation(e)),
        }
        self.pool.evict_committed(&block);
        self.round_started_at = None;
        self.round_aborted_at = None;
        self.round_attempt = 0;

        if self.bootstrap.phase() == BootstrapPhase::Genesis {
            self.bootstrap.mark_done();
        }

        Ok(vec![Outbound::Broadcast(MessagePayload::CommittedBlock(block))])
    }

    fn handle_bootstrap_commit(&mut self, from: NodeId, payload: BootstrapCommitPayload) -> Result<Vec<Outbound>, FatalError> {
        match self.bootstrap.on_bootstrap_commit(from, payload) {
            Ok(Some(genesis)) => self.accept_committed_block(genesis),
            Ok(None) => Ok(Vec::new()),
            Err(BootstrapError::AlreadyDone) | Err(BootstrapError::CommitDisagreement) => Ok(Vec::new()),
        }
    }

    /// Called on every clock tick (spec.md S4.6 round timeout, S4.7 block
    /// production). Drives bootstrap-commit broadcast, round timeout, and
    /// proposal emission.
    pub fn tick(&mut self, now: TimestampMillis) -> Result<Vec<Outbound>, FatalError> {
        let mut outbound = Vec::new();

        if self.bootstrap.phase() == BootstrapPhase::Ready {
            let sys = self.ledger.system_addresses();
            outbound.push(Outbound::Broadcast(MessagePayload::BootstrapCommit(BootstrapCommitPayload {
                liquidity: sys.liquidity,
                burn: sys.burn,
                maintenance: sys.maintenance,
                developer: sys.developer,
                initial_liquidity_amount: self.config.initial_liquidity(),
                proposed_timestamp: now,
            })));
            return Ok(outbound);
        }

        if self.bootstrap.phase() != BootstrapPhase::Done {
            return Ok(outbound);
        }

        let (tip_height, tip_hash) = self.ledger.tip();
        let next_height = tip_height + 1;

        if self.consensus.height() != Some(next_height) {
            self.round_attempt = 0;
            self.round_aborted_at = None;
            self.start_round(next_height, tip_hash, now);
        } else {
            match self.consensus.phase() {
                RoundPhase::AwaitingProposal | RoundPhase::Collecting => {
                    if let Some(started) = self.round_started_at {
                        if now.saturating_sub(started) >= self.config.round_timeout_ms {
                            self.consensus.on_round_timeout();
                            self.round_aborted_at = Some(now);
                        }
                    }
                }
                RoundPhase::Aborted => {
                    let aborted_at = *self.round_aborted_at.get_or_insert(now);
                    if now.saturating_sub(aborted_at) >= self.config.round_restart_delay_ms {
                        self.round_attempt += 1;
                        self.round_aborted_at = None;
                        self.start_round(next_height, tip_hash, now);
                    }
                }
                RoundPhase::Committed => {}
            }
        }

        let ids = self.peers.ainode_ids_sorted();
        if let Some(proposer) = proposer_for(next_height + self.round_attempt, &ids) {
            if proposer == self.self_id
                && self.consensus.phase() == RoundPhase::AwaitingProposal
                && self.producer.tick_due(self.tip_timestamp(), now)
            {
                let (reward, split) = (self.ledger.current_reward(), self.ledger.current_split());
                let sys = self.ledger.system_addresses();
                let block = self.producer.build_proposal(
                    &mut self.pool,
                    self.config.max_txs_per_block,
                    tip_height,
                    tip_hash,
                    self.tip_timestamp(),
                    now,
                    self.self_id,
                    reward,
                    split,
                    sys,
                    &self.keys,
                );
                outbound.push(Outbound::Broadcast(MessagePayload::BlockProposal(block.clone())));
                let _ = self.consensus.on_proposal(self.self_id, block.clone());
                let decision = self.decide_vote(&block, &self.self_id);
                let vote = Vote::new(block.height, synod_common::crypto::Hashable::hash(&block), self.self_id, decision, &self.keys);
                outbound.push(Outbound::Broadcast(MessagePayload::Vote(vote.clone())));
                outbound.extend(self.handle_vote(now, vote)?);
            }
        }

        Ok(outbound)
    }

    fn start_round(&mut self, height: Height, parent_hash: Hash, now: TimestampMillis) {
        let ids = self.peers.ainode_ids_sorted();
        let Some(proposer) = proposer_for(height + self.round_attempt, &ids) else {
            return;
        };
        self.consensus.start_height(height, parent_hash, proposer, ids.len().max(1));
        self.round_started_at = Some(now);
        info!("height {height} round started, proposer {proposer}, attempt {}", self.round_attempt);
    }

    fn tip_timestamp(&self) -> TimestampMillis {
        self.ledger.block_at(self.ledger.tip().0).map(|b| b.timestamp).unwrap_or(0)
    }

    pub fn sign_payload(&mut self, payload: MessagePayload) -> SignedMessage {
        let id = self.next_message_id;
        self.next_message_id += 1;
        SignedMessage::new(id, self.self_id, payload, &self.keys)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Signs and dispatches everything a tick/event-handling pass produced.
    async fn dispatch(&mut self, outbound: Vec<Outbound>, sink: &crate::transport::OutboundRegistry) {
        for item in outbound {
            match item {
                Outbound::Broadcast(payload) => {
                    let message = self.sign_payload(payload);
                    sink.broadcast(message).await;
                }
                Outbound::SendTo(id, payload) => {
                    let message = self.sign_payload(payload);
                    sink.send_to(id, message).await;
                }
            }
        }
    }

    /// Runs the event loop until a shutdown is requested, draining the
    /// in-flight round to a terminal phase first (spec.md S4.9 "Shutdown is
    /// cooperative").
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        outbound: crate::transport::OutboundRegistry,
        now_fn: impl Fn() -> TimestampMillis,
    ) -> Result<(), FatalError> {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.block_period_ms.min(1_000).max(50)));
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                let terminal = matches!(self.consensus.phase(), RoundPhase::Committed | RoundPhase::Aborted);
                if terminal || self.consensus.height().is_none() {
                    info!("supervisor shutting down cooperatively");
                    return Ok(());
                }
            }

            tokio::select! {
                event = inbound.recv() => {
                    match event {
                        Some(event) => {
                            let produced = self.handle_event(now_fn(), event)?;
                            self.dispatch(produced, &outbound).await;
                        }
                        None => return Ok(()),
                    }
                }
                _ = ticker.tick() => {
                    let produced = self.tick(now_fn())?;
                    self.dispatch(produced, &outbound).await;
                }
            }
        }
    }
}
