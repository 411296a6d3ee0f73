//! PBFT engine, ported from
//! `consensus/dbft/pbft/{pbft,preprepare,prepare,commit}.go`.

use std::collections::HashMap;

use alloy_primitives::Bytes;
use tracing::{trace, warn};

use crate::{
    constants::MAX_FUTURE_MSG,
    crypto,
    error::DbftError,
    message::{Envelope, MessageCode, Preprepare, Subject, View},
    seal,
    state::State,
    types::{Address, Hash, Proposal, Signature},
    validators::ValidatorSet,
};

/// The narrow capability set the state machine needs from its embedder,
/// modeled as a trait rather than concrete type coupling.
pub trait Backend<P: Proposal> {
    fn verify(&self, proposal: &P) -> Result<(), DbftError>;
    fn validators(&self, proposal: &P) -> Option<ValidatorSet>;

    /// Hashes `data` and signs the digest; mirrors `backend.Sign`, which is
    /// handed raw payload bytes (or an already 32-byte hash) and keccaks it
    /// before signing either way.
    fn sign(&self, data: &[u8]) -> Result<Signature, DbftError>;

    /// Recover the signer of `payload` from `signature`; defaults to the
    /// crate's keccak-then-ecrecover helper, matching `CheckValidatorSignature`.
    fn check_signature(&self, payload: &[u8], signature: &Signature) -> Result<Address, DbftError> {
        crypto::recover_address_from_payload(payload, signature)
    }

    /// Delivers a fully-committed proposal with its committed-seal bundle.
    fn commit(&self, proposal: P, committed_seals: Vec<Signature>);
}

/// Where finalized envelopes are fanned out; the P2P gossip layer itself is
/// out of scope here.
pub trait Network {
    fn send(&self, peers: &[Address], envelope: &Envelope);
}

/// Drives the per-proposer PBFT state machines for one local validator.
pub struct Engine<P: Proposal, B: Backend<P>, N: Network> {
    backend: B,
    network: N,
    address: Address,
    states: HashMap<Address, State<P>>,
    pending: HashMap<Address, Vec<Envelope>>,
}

impl<P: Proposal, B: Backend<P>, N: Network> Engine<P, B, N> {
    pub fn new(backend: B, network: N, address: Address) -> Self {
        Self { backend, network, address, states: HashMap::new(), pending: HashMap::new() }
    }

    /// Begin a new consensus round as proposer: broadcast PREPREPARE to
    /// `validators`.
    pub fn start_consensus(&mut self, validators: ValidatorSet, proposal: P) {
        let view = View { proposer: self.address, sequence: proposal.number() };
        let msg = Bytes::from(alloy_rlp::encode(&Preprepare { view, proposal: proposal.clone() }));
        self.broadcast(validators.addresses(), MessageCode::PrePrepare, msg, None);
    }

    /// Decode, authenticate, and dispatch one inbound envelope.
    pub fn dispatch(&mut self, envelope: Envelope) -> Result<(), DbftError> {
        let recovered = self.backend.check_signature(&envelope.payload_no_sig(), &signature_of(&envelope)?)?;
        if recovered != envelope.sender {
            return Err(DbftError::InvalidSignature);
        }
        self.handle(envelope)
    }

    fn handle(&mut self, envelope: Envelope) -> Result<(), DbftError> {
        let code = envelope.code().ok_or(DbftError::DecodeFailed)?;
        let result = match code {
            MessageCode::PrePrepare => self.on_preprepare(&envelope),
            MessageCode::Prepare => self.on_prepare(&envelope),
            MessageCode::Commit => self.on_commit(&envelope),
        };

        match result {
            Ok(()) => {
                if code == MessageCode::PrePrepare {
                    self.drain_pending(envelope.sender);
                }
                Ok(())
            }
            Err(DbftError::FutureMessage { proposer, .. }) => {
                self.store_future(proposer, envelope);
                Ok(())
            }
            Err(DbftError::OldMessage { .. }) => Ok(()),
            Err(other) => Err(other),
        }
    }

    fn on_preprepare(&mut self, envelope: &Envelope) -> Result<(), DbftError> {
        trace!(sender = %envelope.sender, "handle preprepare");
        let preprepare: Preprepare<P> =
            alloy_rlp::decode_exact(&envelope.msg[..]).map_err(|_| DbftError::DecodeFailed)?;

        let validators =
            self.backend.validators(&preprepare.proposal).ok_or(DbftError::InvalidProposal)?;
        if !validators.is_validator(envelope.sender) {
            return Err(DbftError::UnauthorizedAddress { address: envelope.sender });
        }
        self.backend.verify(&preprepare.proposal)?;

        let state = State::new(validators.clone(), envelope.sender, preprepare.proposal.clone());
        let subject = state.subject();
        self.states.insert(envelope.sender, state);

        let msg = Bytes::from(alloy_rlp::encode(subject));
        self.broadcast(validators.addresses(), MessageCode::Prepare, msg, None);
        Ok(())
    }

    fn on_prepare(&mut self, envelope: &Envelope) -> Result<(), DbftError> {
        let prepare: Subject = alloy_rlp::decode_exact(&envelope.msg[..]).map_err(|_| DbftError::DecodeFailed)?;
        let state = self
            .states
            .get_mut(&prepare.view.proposer)
            .ok_or(DbftError::FutureMessage { proposer: prepare.view.proposer, sequence: prepare.view.sequence })?;

        if state.prepared() || state.committed() {
            return Ok(());
        }
        if !state.validators.is_validator(envelope.sender) {
            return Err(DbftError::UnauthorizedAddress { address: envelope.sender });
        }
        state.verify_prepare(&prepare)?;

        state.accept_prepare(envelope.sender);
        trace!(sender = %envelope.sender, "accept prepare");

        if state.prepared() {
            trace!(proposer = %prepare.view.proposer, "prepared");
            let subject = state.subject();
            let proposal = state.proposal.clone();
            let validators = state.validators.clone();
            let msg = Bytes::from(alloy_rlp::encode(subject));
            let digest = seal::proposal_hash(proposal.header());
            self.broadcast(validators.addresses(), MessageCode::Commit, msg, Some(digest));
        }
        Ok(())
    }

    fn on_commit(&mut self, envelope: &Envelope) -> Result<(), DbftError> {
        let commit: Subject = alloy_rlp::decode_exact(&envelope.msg[..]).map_err(|_| DbftError::DecodeFailed)?;
        let state = self
            .states
            .get_mut(&commit.view.proposer)
            .ok_or(DbftError::FutureMessage { proposer: commit.view.proposer, sequence: commit.view.sequence })?;

        if state.committed() || state.finished {
            return Ok(());
        }
        if !state.validators.is_validator(envelope.sender) {
            return Err(DbftError::UnauthorizedAddress { address: envelope.sender });
        }
        state.verify_commit(&commit)?;

        let committed_seal =
            Signature::from_slice(&envelope.committed_seal).ok_or(DbftError::InvalidSignature)?;
        state.accept_commit(envelope.sender, committed_seal);
        trace!(sender = %envelope.sender, "accept commit");

        if state.committed() {
            trace!(proposer = %commit.view.proposer, "committed");
            let proposal = state.proposal.clone();
            let committed_seals = state.commit_seals();
            state.finished = true;
            self.backend.commit(proposal, committed_seals);
        }
        Ok(())
    }

    fn store_future(&mut self, proposer: Address, envelope: Envelope) {
        let bucket = self.pending.entry(proposer).or_default();
        if bucket.len() >= MAX_FUTURE_MSG {
            warn!(%proposer, "future message buffer full, dropping");
            return;
        }
        bucket.push(envelope);
    }

    fn drain_pending(&mut self, proposer: Address) {
        let Some(bucket) = self.pending.remove(&proposer) else { return };
        for envelope in bucket {
            let result = match envelope.code() {
                Some(MessageCode::Prepare) => self.on_prepare(&envelope),
                Some(MessageCode::Commit) => self.on_commit(&envelope),
                _ => continue,
            };
            if let Err(err) = result {
                warn!(%proposer, error = %err, "replay of buffered message failed");
            }
        }
    }

    fn broadcast(
        &mut self,
        peers: &[Address],
        code: MessageCode,
        msg: Bytes,
        committed_digest: Option<Hash>,
    ) {
        match self.finalize(code, msg, committed_digest) {
            Ok(envelope) => self.network.send(peers, &envelope),
            Err(err) => warn!(error = %err, "failed to finalize outbound message"),
        }
    }

    fn finalize(
        &self,
        code: MessageCode,
        msg: Bytes,
        committed_digest: Option<Hash>,
    ) -> Result<Envelope, DbftError> {
        let committed_seal = match committed_digest {
            Some(digest) => Bytes::from(self.backend.sign(digest.as_slice())?.0.to_vec()),
            None => Bytes::new(),
        };

        let unsigned = Envelope {
            code: code as u64,
            msg,
            sender: self.address,
            signature: Bytes::new(),
            committed_seal,
        };
        let signature = self.backend.sign(&unsigned.payload_no_sig())?;

        Ok(Envelope { signature: Bytes::from(signature.0.to_vec()), ..unsigned })
    }
}

fn signature_of(envelope: &Envelope) -> Result<Signature, DbftError> {
    Signature::from_slice(&envelope.signature).ok_or(DbftError::InvalidSignature)
}
