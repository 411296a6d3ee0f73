//! End-to-end PBFT consensus flow tests driven through the `Engine` facade.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use alloy_primitives::{Address, Bytes, FixedBytes, U256};
use dbft_engine::pbft::{Backend, Engine, Network};
use dbft_engine::{crypto, message, DbftError};
use dbft_engine::validators::ValidatorSet;
use dbft_engine::{Block, Header, Proposal, Signature};
use message::{Envelope, MessageCode, Subject, View};
use secp256k1::SecretKey;

fn key(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

fn addr_of(key: &SecretKey) -> Address {
    let public = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, key);
    let uncompressed = public.serialize_uncompressed();
    Address::from_slice(&alloy_primitives::keccak256(&uncompressed[1..])[12..])
}

fn block(number: u64) -> Block {
    Block {
        header: Header {
            number,
            parent_hash: Default::default(),
            time: 1_000 + number,
            difficulty: U256::from(2),
            coinbase: Address::ZERO,
            mix_digest: Default::default(),
            uncle_hash: Default::default(),
            nonce: FixedBytes::<8>::ZERO,
            extra: Bytes::from(vec![0u8; 32]),
        },
        body: Bytes::new(),
    }
}

fn sign_envelope(
    key: &SecretKey,
    sender: Address,
    code: MessageCode,
    msg: Bytes,
    committed_digest: Option<alloy_primitives::B256>,
) -> Envelope {
    let committed_seal = match committed_digest {
        Some(digest) => Bytes::from(crypto::sign_payload(key, digest.as_slice()).unwrap().0.to_vec()),
        None => Bytes::new(),
    };
    let unsigned = Envelope { code: code as u64, msg, sender, signature: Bytes::new(), committed_seal };
    let signature = crypto::sign_payload(key, &unsigned.payload_no_sig()).unwrap();
    Envelope { signature: Bytes::from(signature.0.to_vec()), ..unsigned }
}

type Outbox = Rc<RefCell<VecDeque<(Vec<Address>, Envelope)>>>;
type CommitLog = Rc<RefCell<Vec<(Block, Vec<Signature>)>>>;

struct TestBackend {
    key: SecretKey,
    validators: ValidatorSet,
    commits: CommitLog,
}

impl Backend<Block> for TestBackend {
    fn verify(&self, _proposal: &Block) -> Result<(), DbftError> {
        Ok(())
    }

    fn validators(&self, _proposal: &Block) -> Option<ValidatorSet> {
        Some(self.validators.clone())
    }

    fn sign(&self, data: &[u8]) -> Result<Signature, DbftError> {
        crypto::sign_payload(&self.key, data)
    }

    fn commit(&self, proposal: Block, committed_seals: Vec<Signature>) {
        self.commits.borrow_mut().push((proposal, committed_seals));
    }
}

struct TestNetwork {
    outbox: Outbox,
}

impl Network for TestNetwork {
    fn send(&self, peers: &[Address], envelope: &Envelope) {
        self.outbox.borrow_mut().push_back((peers.to_vec(), envelope.clone()));
    }
}

/// Drains `outbox` into every engine whose address is among an envelope's
/// peers, following cascading broadcasts until nothing is left in flight.
fn run_to_quiescence(
    engines: &mut HashMap<Address, Engine<Block, TestBackend, TestNetwork>>,
    outbox: &Outbox,
) {
    loop {
        let batch: Vec<_> = outbox.borrow_mut().drain(..).collect();
        if batch.is_empty() {
            break;
        }
        for (peers, envelope) in batch {
            for peer in peers {
                if let Some(engine) = engines.get_mut(&peer) {
                    engine.dispatch(envelope.clone()).expect("dispatch should succeed");
                }
            }
        }
    }
}

struct Network4 {
    keys: Vec<SecretKey>,
    validators: ValidatorSet,
    engines: HashMap<Address, Engine<Block, TestBackend, TestNetwork>>,
    outbox: Outbox,
    commit_logs: HashMap<Address, CommitLog>,
}

fn build_network(n: u8) -> Network4 {
    let keys: Vec<SecretKey> = (1..=n).map(key).collect();
    let addrs: Vec<Address> = keys.iter().map(addr_of).collect();
    let validators = ValidatorSet::new(addrs.clone());
    let outbox: Outbox = Rc::new(RefCell::new(VecDeque::new()));

    let mut engines = HashMap::new();
    let mut commit_logs = HashMap::new();
    for k in &keys {
        let addr = addr_of(k);
        let commits: CommitLog = Rc::new(RefCell::new(Vec::new()));
        commit_logs.insert(addr, commits.clone());
        let backend = TestBackend { key: *k, validators: validators.clone(), commits };
        let network = TestNetwork { outbox: outbox.clone() };
        engines.insert(addr, Engine::new(backend, network, addr));
    }

    Network4 { keys, validators, engines, outbox, commit_logs }
}

#[test]
fn four_validators_reach_quorum_and_commit_exactly_once() {
    let Network4 { keys, validators, mut engines, outbox, commit_logs } = build_network(4);
    let proposer_key = keys[0];
    let proposer = addr_of(&proposer_key);
    let proposal = block(validators.index_of(proposer).unwrap() as u64 + 1);

    engines.get_mut(&proposer).unwrap().start_consensus(validators.clone(), proposal.clone());
    run_to_quiescence(&mut engines, &outbox);

    for addr in validators.addresses() {
        let log = commit_logs.get(addr).unwrap().borrow();
        assert_eq!(log.len(), 1, "validator {addr} should commit exactly once");
        let (committed, seals) = &log[0];
        assert_eq!(committed.header.number, proposal.header.number);
        assert_eq!(seals.len(), validators.quorum());
    }
}

#[test]
fn a_stale_commit_for_an_in_progress_round_is_silently_dropped() {
    let Network4 { keys, validators, mut engines, outbox, .. } = build_network(4);
    let proposer_key = keys[0];
    let proposer = addr_of(&proposer_key);
    let proposal = block(5);

    engines.get_mut(&proposer).unwrap().start_consensus(validators.clone(), proposal.clone());
    run_to_quiescence(&mut engines, &outbox);

    // The round already committed at sequence 5; a commit carrying a lower
    // sequence for the same proposer must be accepted as a no-op, not an error.
    let stale = Subject { view: View { proposer, sequence: proposal.number() - 1 }, digest: proposal.hash() };
    let msg = Bytes::from(alloy_rlp::encode(stale));
    let envelope = sign_envelope(&keys[1], addr_of(&keys[1]), MessageCode::Commit, msg, Some(stale.digest));

    let target = engines.get_mut(&proposer).unwrap();
    assert!(target.dispatch(envelope).is_ok());
}

#[test]
fn a_commit_that_arrives_before_preprepare_is_buffered_and_then_counted() {
    let Network4 { keys, validators, mut engines, outbox, commit_logs } = build_network(4);
    let proposer_key = keys[0];
    let proposer = addr_of(&proposer_key);
    let proposal = block(7);

    // Validator 3 sends its commit before anyone has seen the preprepare.
    let early_commit_view = View { proposer, sequence: proposal.number() };
    let subject = Subject { view: early_commit_view, digest: proposal.hash() };
    let msg = Bytes::from(alloy_rlp::encode(subject));
    let early = sign_envelope(&keys[3], addr_of(&keys[3]), MessageCode::Commit, msg, Some(subject.digest));

    let watcher = addr_of(&keys[1]);
    engines.get_mut(&watcher).unwrap().dispatch(early).expect("future message should be buffered, not rejected");

    // Now drive the real round; validator 3's early commit should still
    // count toward quorum once the preprepare arrives.
    engines.get_mut(&proposer).unwrap().start_consensus(validators.clone(), proposal.clone());
    run_to_quiescence(&mut engines, &outbox);

    let log = commit_logs.get(&watcher).unwrap().borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].1.len(), validators.quorum());
}
