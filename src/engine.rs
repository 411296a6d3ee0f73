//! Engine facade, ported from `consensus/dbft/backend/{backend,engine}.go`.
//! Glues the snapshot, the PBFT state machine, and the header rules together
//! behind the miner/chain callbacks a block-producing node drives.

use std::sync::Arc;

use alloy_primitives::{keccak256, U256};
use parking_lot::Mutex;
use secp256k1::SecretKey;
use tokio::sync::oneshot;
use tracing::warn;

use crate::{
    config::DbftConfig,
    constants::{DBFT_MARKER, DEFAULT_DIFFICULTY, VANITY},
    crypto,
    error::DbftError,
    pbft::{Backend, Network},
    rewards,
    seal,
    snapshot::{ChainReader, Snapshot, SnapshotBuilder, SnapshotStore, ValidatorContractReader},
    types::{Address, Hash, Header, Proposal},
    validators::ValidatorSet,
};

/// Out-of-scope proposal-body validation (transaction execution, state
/// transition) the facade delegates to; header-level checks are always
/// performed by the facade itself regardless of what this returns.
pub trait ProposalValidator<P: Proposal> {
    fn verify_body(&self, proposal: &P) -> Result<(), DbftError>;
}

struct Shared<P: Proposal, C, S, V, PV> {
    config: DbftConfig,
    key: SecretKey,
    address: Address,
    snapshots: Mutex<SnapshotBuilder>,
    chain: C,
    store: S,
    contract: V,
    validator: PV,
    proposed_hash: Mutex<Option<Hash>>,
    commit_tx: Mutex<Option<oneshot::Sender<P>>>,
}

/// Implements the PBFT `Backend` capability set on top of the engine's
/// snapshot machinery and signing key.
pub struct ConsensusBackend<P: Proposal, C, S, V, PV> {
    shared: Arc<Shared<P, C, S, V, PV>>,
}

impl<P: Proposal, C, S, V, PV> Clone for ConsensusBackend<P, C, S, V, PV> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<P, C, S, V, PV> Backend<P> for ConsensusBackend<P, C, S, V, PV>
where
    P: Proposal,
    C: ChainReader,
    S: SnapshotStore,
    V: ValidatorContractReader,
    PV: ProposalValidator<P>,
{
    fn verify(&self, proposal: &P) -> Result<(), DbftError> {
        self.shared.validator.verify_body(proposal)
    }

    fn validators(&self, proposal: &P) -> Option<ValidatorSet> {
        let header = proposal.header();
        let mut builder = self.shared.snapshots.lock();
        builder
            .snapshot(
                &self.shared.chain,
                &self.shared.store,
                &self.shared.contract,
                header.number.checked_sub(1)?,
                header.parent_hash,
                &[],
            )
            .ok()
            .map(|s| s.validators)
    }

    fn sign(&self, data: &[u8]) -> Result<crate::types::Signature, DbftError> {
        crypto::sign_payload(&self.shared.key, data)
    }

    fn commit(&self, mut proposal: P, committed_seals: Vec<crate::types::Signature>) {
        if let Err(err) = seal::write_committed_seals(proposal.header_mut(), &committed_seals) {
            warn!(error = %err, "failed to write committed seals");
            return;
        }
        let hash = proposal.hash();
        let mut proposed = self.shared.proposed_hash.lock();
        if *proposed == Some(hash) {
            *proposed = None;
            if let Some(tx) = self.shared.commit_tx.lock().take() {
                let _ = tx.send(proposal);
            }
        }
    }
}

/// The top-level facade a miner and a chain verifier both drive.
pub struct DbftEngine<P, C, S, V, PV, N>
where
    P: Proposal,
    C: ChainReader,
    S: SnapshotStore,
    V: ValidatorContractReader,
    PV: ProposalValidator<P>,
    N: Network,
{
    shared: Arc<Shared<P, C, S, V, PV>>,
    pbft: Mutex<crate::pbft::Engine<P, ConsensusBackend<P, C, S, V, PV>, N>>,
}

impl<P, C, S, V, PV, N> DbftEngine<P, C, S, V, PV, N>
where
    P: Proposal,
    C: ChainReader + Clone,
    S: SnapshotStore + Clone,
    V: ValidatorContractReader + Clone,
    PV: ProposalValidator<P> + Clone,
    N: Network,
{
    pub fn new(
        config: DbftConfig,
        key: SecretKey,
        address: Address,
        chain: C,
        store: S,
        contract: V,
        validator: PV,
        network: N,
    ) -> Self {
        let shared = Arc::new(Shared {
            snapshots: Mutex::new(SnapshotBuilder::new(config)),
            config,
            key,
            address,
            chain,
            store,
            contract,
            validator,
            proposed_hash: Mutex::new(None),
            commit_tx: Mutex::new(None),
        });
        let backend = ConsensusBackend { shared: shared.clone() };
        let pbft = crate::pbft::Engine::new(backend, network, address);
        Self { shared, pbft: Mutex::new(pbft) }
    }

    fn snapshot_at(&self, number: u64, hash: Hash) -> Result<Snapshot, DbftError> {
        self.shared.snapshots.lock().snapshot(
            &self.shared.chain,
            &self.shared.store,
            &self.shared.contract,
            number,
            hash,
            &[],
        )
    }

    /// Set a new header's consensus fields ahead of transaction execution.
    pub fn prepare(&self, header: &mut Header, now: u64) -> Result<(), DbftError> {
        header.nonce = Default::default();
        header.mix_digest = Hash::from(DBFT_MARKER);
        header.difficulty = U256::from(DEFAULT_DIFFICULTY);

        let parent = self
            .shared
            .chain
            .header(header.number - 1, header.parent_hash)
            .ok_or(DbftError::UnknownAncestor { number: header.number, parent_hash: header.parent_hash })?;

        let snap = self.snapshot_at(header.number - 1, header.parent_hash)?;
        header.time = snap.next_slot(self.shared.address, self.shared.config.block_period, now);
        if header.time > now + self.shared.config.block_period {
            return Err(DbftError::NotInTurn);
        }

        let period = header.time - parent.time;
        if period > self.shared.config.block_period {
            header.difficulty = U256::from(DEFAULT_DIFFICULTY - period);
        }

        let mut vanity = vec![0u8; VANITY];
        let have = header.extra.len().min(VANITY);
        vanity[..have].copy_from_slice(&header.extra[..have]);

        header.extra = seal::init_extra(&vanity);
        Ok(())
    }

    /// Sign the header and drive it through PBFT as proposer, resolving
    /// once ≥ 2F+1 commits land or `stop` fires.
    pub async fn seal(
        &self,
        mut proposal: P,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<Option<P>, DbftError> {
        let header = proposal.header();
        let parent = self
            .shared
            .chain
            .header(header.number - 1, header.parent_hash)
            .ok_or(DbftError::UnknownAncestor { number: header.number, parent_hash: header.parent_hash })?;
        let _ = parent;

        let snap = self.snapshot_at(header.number - 1, header.parent_hash)?;
        if !snap.inturn(self.shared.address, header.time, header.number, self.shared.config.block_period) {
            return Err(DbftError::NotInTurn);
        }

        let digest = seal::sig_hash(proposal.header())?;
        let sig = crypto::sign_payload(&self.shared.key, digest.as_slice())?;
        seal::write_seal(proposal.header_mut(), sig)?;

        let target = proposal.header().time;
        let now = now_unix();
        if target > now {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(target - now)) => {}
                _ = &mut stop => return Ok(None),
            }
        }

        let (tx, rx) = oneshot::channel();
        *self.shared.proposed_hash.lock() = Some(proposal.hash());
        *self.shared.commit_tx.lock() = Some(tx);
        self.pbft.lock().start_consensus(snap.validators.clone(), proposal.clone());

        tokio::select! {
            result = rx => Ok(result.ok()),
            _ = &mut stop => {
                *self.shared.proposed_hash.lock() = None;
                self.shared.commit_tx.lock().take();
                Ok(None)
            }
        }
    }

    /// Hand an inbound envelope to the PBFT state machine.
    pub fn dispatch(&self, envelope: crate::message::Envelope) -> Result<(), DbftError> {
        self.pbft.lock().dispatch(envelope)
    }

    /// The full verification cascade for one header.
    pub fn verify_header(&self, header: &Header, parents: &[Header], now: u64) -> Result<(), DbftError> {
        if header.time > now {
            return Err(DbftError::FutureBlock { header_time: header.time, now });
        }
        if header.mix_digest != Hash::from(DBFT_MARKER) {
            return Err(DbftError::InvalidMixDigest);
        }
        if header.uncle_hash != empty_uncle_hash() {
            return Err(DbftError::InvalidUncleHash);
        }
        self.verify_cascading_fields(header, parents)
    }

    fn verify_cascading_fields(&self, header: &Header, parents: &[Header]) -> Result<(), DbftError> {
        if header.number == 0 {
            return Ok(());
        }
        let parent = parents
            .last()
            .filter(|p| p.number == header.number - 1 && p.hash() == header.parent_hash)
            .cloned()
            .or_else(|| self.shared.chain.header(header.number - 1, header.parent_hash))
            .ok_or(DbftError::UnknownAncestor { number: header.number, parent_hash: header.parent_hash })?;

        if parent.time + self.shared.config.block_period > header.time {
            return Err(DbftError::InvalidTimestamp {
                parent_time: parent.time,
                period: self.shared.config.block_period,
                header_time: header.time,
            });
        }

        let period = header.time - parent.time;
        let expected = if period > self.shared.config.block_period {
            DEFAULT_DIFFICULTY - period
        } else {
            DEFAULT_DIFFICULTY
        };
        let got: u64 = header.difficulty.try_into().map_err(|_| DbftError::InvalidDifficulty {
            expected,
            got: u64::MAX,
        })?;
        if got != expected {
            return Err(DbftError::InvalidDifficulty { expected, got });
        }

        let snap = self.snapshot_at(header.number - 1, header.parent_hash)?;

        let extra = seal::extract(header)?;
        let sig = extra.seal.ok_or(DbftError::InvalidSignature)?;
        let digest = seal::sig_hash(header)?;
        let signer = crypto::recover_address_from_payload(digest.as_slice(), &sig)?;
        if !snap.inturn(signer, header.time, header.number, self.shared.config.block_period) {
            return Err(DbftError::Unauthorized { signer });
        }

        self.verify_committed_seals(header, &snap)
    }

    fn verify_committed_seals(&self, header: &Header, snap: &Snapshot) -> Result<(), DbftError> {
        let extra = seal::extract(header)?;
        if extra.committed_seals.is_empty() {
            return Err(DbftError::EmptyCommittedSeals);
        }
        let proposal_seal = seal::proposal_hash(header);
        let mut valid = 0usize;
        let total = extra.committed_seals.len();
        for sig in &extra.committed_seals {
            let addr = crypto::recover_address_from_payload(proposal_seal.as_slice(), sig)?;
            if snap.validators.is_validator(addr) {
                valid += 1;
            } else {
                return Err(DbftError::InvalidCommittedSeals {
                    valid,
                    total,
                    two_f: 2 * snap.validators.f(),
                });
            }
        }
        if valid <= 2 * snap.validators.f() {
            return Err(DbftError::InvalidCommittedSeals { valid, total, two_f: 2 * snap.validators.f() });
        }
        Ok(())
    }

    /// Verify a batch of headers concurrently, preserving input order.
    /// Returns an abort handle and a results channel, mirroring the
    /// original source's `(quit chan<-, results <-chan error)` pair.
    pub fn verify_headers(
        self: Arc<Self>,
        headers: Vec<Header>,
        now: u64,
    ) -> (oneshot::Sender<()>, tokio::sync::mpsc::Receiver<Result<(), DbftError>>)
    where
        C: Send + Sync + 'static,
        S: Send + Sync + 'static,
        V: Send + Sync + 'static,
        PV: Send + Sync + 'static,
        N: Send + Sync + 'static,
        P: Send + Sync + 'static,
    {
        let (abort_tx, mut abort_rx) = oneshot::channel();
        let (results_tx, results_rx) = tokio::sync::mpsc::channel(headers.len().max(1));

        tokio::spawn(async move {
            for i in 0..headers.len() {
                if abort_rx.try_recv().is_ok() {
                    return;
                }
                let result = self.verify_header(&headers[i], &headers[..i], now);
                if results_tx.send(result).await.is_err() {
                    return;
                }
            }
        });

        (abort_tx, results_rx)
    }

    /// Assemble the finished block: credit the proposer and close the
    /// (empty) uncle list.
    pub fn finalize(&self, header: &mut Header) {
        let reward = rewards::accumulate_rewards(&self.shared.config, header.number);
        let _ = reward; // crediting the coinbase is a state-database concern, out of scope here.
        header.uncle_hash = empty_uncle_hash();
    }
}

fn empty_uncle_hash() -> Hash {
    keccak256(alloy_rlp::encode(Vec::<u8>::new()))
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
