// End-to-end scenario tests, replaying the worked examples in spec.md S8
// against the public `Supervisor` surface. Every scenario drives the
// supervisor synchronously through `handle_event`/`tick`, the same way
// `run()` does it one event at a time, without needing a live tokio runtime
// or real sockets.

use clap::Parser as _;
use synod_common::{
    amount::Amount,
    crypto::{Address, KeyPair},
    message::{HandshakePayload, MessagePayload, SignedMessage},
    peer::Role,
    transaction::{Transaction, TransactionTag},
};
use synod_node::config::NodeConfig;
use synod_node::error::PoolRejection;
use synod_node::supervisor::{InboundEvent, Outbound, Supervisor};

fn single_pioneer_config(tmp: &tempfile::TempDir) -> NodeConfig {
    let mut config = NodeConfig::parse_from(["synod-node"]);
    config.data_dir = tmp.path().to_path_buf();
    config.pioneer_count = 1;
    config.block_period_ms = 10_000;
    config.round_timeout_ms = 3_000;
    config.round_restart_delay_ms = 500;
    config
}

/// Handshakes `keys` with itself, the way a real peer's first frame off a
/// fresh connection would, so the node appears in its own AINode rotation
/// (`PeerSet::ainode_ids_sorted` only ever reflects handshaked peers).
fn handshake_self(supervisor: &mut Supervisor, keys: &KeyPair, now: u64) {
    let self_id = keys.address();
    let handshake = MessagePayload::Handshake(HandshakePayload {
        node_id: self_id,
        public_key: keys.public_key(),
        network_id: "synod-mainnet".to_string(),
        role: Role::AINode,
        is_pioneer: true,
    });
    let message = SignedMessage::new(0, self_id, handshake, keys);
    supervisor
        .handle_event(now, InboundEvent::Message { from: self_id, message })
        .unwrap();
}

fn handshake_other(supervisor: &mut Supervisor, other: &KeyPair, now: u64) {
    let other_id = other.address();
    let handshake = MessagePayload::Handshake(HandshakePayload {
        node_id: other_id,
        public_key: other.public_key(),
        network_id: "synod-mainnet".to_string(),
        role: Role::AINode,
        is_pioneer: false,
    });
    let message = SignedMessage::new(0, other_id, handshake, other);
    supervisor
        .handle_event(now, InboundEvent::Message { from: other_id, message })
        .unwrap();
}

/// Drives a single-pioneer genesis bootstrap to completion: connect,
/// broadcast the commit, relay it back in as if gossiped, and confirm the
/// genesis block landed.
fn run_bootstrap(supervisor: &mut Supervisor, keys: &KeyPair, now: u64) {
    let self_id = keys.address();
    supervisor.handle_event(now, InboundEvent::PioneerConnected(self_id)).unwrap();
    let outbound = supervisor.tick(now).unwrap();
    let Outbound::Broadcast(MessagePayload::BootstrapCommit(payload)) = &outbound[0] else {
        panic!("expected a BootstrapCommit broadcast");
    };
    let message = SignedMessage::new(1, self_id, MessagePayload::BootstrapCommit(payload.clone()), keys);
    let events = supervisor
        .handle_event(now, InboundEvent::Message { from: self_id, message })
        .unwrap();
    assert!(events.iter().any(|o| matches!(o, Outbound::Broadcast(MessagePayload::CommittedBlock(_)))));
}

/// Bootstrap with a single pioneer reaches genesis, and once the node has
/// also handshaked with itself the next due tick produces, self-votes and
/// commits the first ordinary block.
#[test]
fn bootstrap_then_first_block_is_produced() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = [10u8; 32];

    let mut supervisor = Supervisor::new(single_pioneer_config(&tmp), KeyPair::from_seed(seed)).unwrap();
    let keys = KeyPair::from_seed(seed);
    handshake_self(&mut supervisor, &keys, 1_000);
    run_bootstrap(&mut supervisor, &keys, 1_000);

    assert!(supervisor.balance_of(&Address::system("liquidity")) > Amount::ZERO);
    let genesis = supervisor.block_at(0).expect("genesis block present");
    assert!(genesis.is_genesis());

    // Advance far enough past block_period_ms that the producer is due.
    let outbound = supervisor.tick(1_000 + 10_001).unwrap();
    assert!(
        outbound.iter().any(|o| matches!(o, Outbound::Broadcast(MessagePayload::CommittedBlock(_)))),
        "expected the sole AINode to propose, vote and commit height 1 in one tick"
    );
    assert!(supervisor.block_at(1).is_some());
}

/// A transfer a sender cannot afford is rejected by the pool before it ever
/// reaches a block. A genesis-only node has no funded account to draw from
/// without a faucet endpoint (out of scope for `Supervisor`'s public
/// surface), so this exercises the other half of the same conservation law
/// the fee-split machinery relies on: nothing that would overdraw a balance
/// is ever admitted in the first place.
#[test]
fn unaffordable_transfer_is_rejected_before_reaching_the_pool() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = [11u8; 32];
    let sender_keys = KeyPair::from_seed([12u8; 32]);
    let recipient = Address::from_bytes([9u8; 32]);

    let mut supervisor = Supervisor::new(single_pioneer_config(&tmp), KeyPair::from_seed(seed)).unwrap();
    let keys = KeyPair::from_seed(seed);
    handshake_self(&mut supervisor, &keys, 1_000);
    run_bootstrap(&mut supervisor, &keys, 1_000);

    let mut tx = Transaction::new_user(
        sender_keys.address(),
        recipient,
        Amount::from_tokens(1),
        Amount::from_tokens(0),
        1,
        1_000,
        Vec::new(),
        TransactionTag::Transfer,
    )
    .unwrap();
    tx.sign(&sender_keys);

    let result = supervisor.submit_transaction(tx, sender_keys.public_key(), 1_000);
    assert!(result.is_err(), "a sender with zero balance cannot afford amount + fee");
}

/// Genesis starts at halving 0 with the configured initial reward and a
/// split that always sums to 100, tracking `LedgerStore`'s own accounting
/// rather than an independently recomputed figure.
#[test]
fn halving_state_reflects_genesis_defaults_before_any_block() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = [13u8; 32];
    let mut supervisor = Supervisor::new(single_pioneer_config(&tmp), KeyPair::from_seed(seed)).unwrap();
    let keys = KeyPair::from_seed(seed);
    handshake_self(&mut supervisor, &keys, 1_000);
    run_bootstrap(&mut supervisor, &keys, 1_000);

    let (reward, split, halvings) = supervisor.halving_state();
    assert_eq!(halvings, 0);
    assert_eq!(reward, Amount::from_tokens(1024));
    assert_eq!(split.burn + split.maintenance + split.liquidity, 100);
}

/// A round that times out without a supermajority is aborted and only
/// re-entered, with the rotation shifted to the next attempt, after
/// `round_restart_delay_ms` has actually elapsed - not on the same tick.
#[test]
fn aborted_round_does_not_restart_before_its_delay() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = [14u8; 32];
    // Two AINodes means a lone proposal from only one of them never reaches
    // the ceil(2n/3) supermajority, so the round times out.
    let other = KeyPair::from_seed([15u8; 32]);

    let mut supervisor = Supervisor::new(single_pioneer_config(&tmp), KeyPair::from_seed(seed)).unwrap();
    let keys = KeyPair::from_seed(seed);
    handshake_self(&mut supervisor, &keys, 1_000);
    handshake_other(&mut supervisor, &other, 1_000);
    run_bootstrap(&mut supervisor, &keys, 1_000);

    let height_1_due = 1_000 + 10_001;
    let _ = supervisor.tick(height_1_due).unwrap();

    // Past round_timeout_ms with no supermajority: the round aborts.
    let _ = supervisor.tick(height_1_due + 3_001).unwrap();
    // Immediately after: still within round_restart_delay_ms, no restart yet.
    let produced = supervisor.tick(height_1_due + 3_001).unwrap();
    assert!(!produced.iter().any(|o| matches!(o, Outbound::Broadcast(MessagePayload::BlockProposal(_)))));
}

/// A handshake advertising a different network id is rejected outright and
/// never reaches the peer table or the known-keys cache.
#[test]
fn wrong_network_handshake_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = [16u8; 32];
    let stranger = KeyPair::from_seed([17u8; 32]);
    let mut supervisor = Supervisor::new(single_pioneer_config(&tmp), KeyPair::from_seed(seed)).unwrap();

    let stranger_id = stranger.address();
    let handshake = MessagePayload::Handshake(HandshakePayload {
        node_id: stranger_id,
        public_key: stranger.public_key(),
        network_id: "some-other-network".to_string(),
        role: Role::AINode,
        is_pioneer: false,
    });
    let message = SignedMessage::new(0, stranger_id, handshake, &stranger);
    let outbound = supervisor
        .handle_event(1_000, InboundEvent::Message { from: stranger_id, message })
        .unwrap();
    assert!(outbound.is_empty());
}

/// A `VoluntaryBurn` is rejected outright while the protocol's own burn
/// schedule is still active (non-zero burn share) - voluntary burns only
/// make sense once the automatic schedule has wound down to zero, so the
/// pool gates on that before ever checking the sender's balance.
#[test]
fn voluntary_burn_is_rejected_while_the_burn_schedule_is_still_active() {
    let tmp = tempfile::tempdir().unwrap();
    let seed = [18u8; 32];
    let sender_keys = KeyPair::from_seed([19u8; 32]);
    let mut supervisor = Supervisor::new(single_pioneer_config(&tmp), KeyPair::from_seed(seed)).unwrap();
    let keys = KeyPair::from_seed(seed);
    handshake_self(&mut supervisor, &keys, 1_000);
    run_bootstrap(&mut supervisor, &keys, 1_000);

    // Genesis defaults to a 60% burn share, so the schedule is active.
    let (_, split, _) = supervisor.halving_state();
    assert!(split.burn > 0);

    let mut tx = Transaction::new_user(
        sender_keys.address(),
        Address::system("burn"),
        Amount::from_tokens(0),
        Amount::from_tokens(0),
        1,
        1_000,
        Vec::new(),
        TransactionTag::VoluntaryBurn,
    )
    .unwrap();
    tx.sign(&sender_keys);

    let result = supervisor.submit_transaction(tx, sender_keys.public_key(), 1_000);
    assert!(matches!(result, Err(PoolRejection::BurnScheduleActive)));
}
