//! Per-proposer PBFT instance state, ported from
//! `consensus/dbft/pbft/state.go`.
//!
//! `verify_prepare`/`verify_commit` correct a self-comparison bug in the
//! original source (`verifyCommit` compared `subject.View.Sequence` to
//! itself, so its old-message branch was unreachable): both here compare
//! the incoming message's sequence against the instance's own sequence.

use std::collections::{HashMap, HashSet};

use crate::{
    error::DbftError,
    message::{Subject, View},
    seal,
    types::{Address, Proposal, Signature},
    validators::ValidatorSet,
};

/// A COMMIT a validator sent, retained for its committed seal.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub sender: Address,
    pub committed_seal: Signature,
}

/// Consensus state for one proposer at one height. Created on PREPREPARE
/// receipt, retained until superseded.
pub struct State<P: Proposal> {
    pub sequence: u64,
    pub validators: ValidatorSet,
    pub proposer: Address,
    pub proposal: P,
    prepares: HashSet<Address>,
    commits: HashMap<Address, CommitRecord>,
    pub finished: bool,
}

impl<P: Proposal> State<P> {
    pub fn new(validators: ValidatorSet, proposer: Address, proposal: P) -> Self {
        let sequence = proposal.number();
        Self {
            sequence,
            validators,
            proposer,
            proposal,
            prepares: HashSet::new(),
            commits: HashMap::new(),
            finished: false,
        }
    }

    /// The subject this instance expects PREPARE/COMMIT messages to match.
    pub fn subject(&self) -> Subject {
        Subject {
            view: View { proposer: self.proposer, sequence: self.sequence },
            digest: seal::proposal_hash(self.proposal.header()),
        }
    }

    fn verify_subject(&self, candidate: &Subject) -> Result<(), DbftError> {
        let expected = self.subject();
        if candidate.view.sequence == expected.view.sequence + 1 {
            return Err(DbftError::FutureMessage {
                proposer: candidate.view.proposer,
                sequence: candidate.view.sequence,
            });
        }
        if candidate.view.sequence < expected.view.sequence {
            return Err(DbftError::OldMessage {
                proposer: candidate.view.proposer,
                sequence: candidate.view.sequence,
            });
        }
        if *candidate != expected {
            return Err(DbftError::InconsistentSubject);
        }
        Ok(())
    }

    pub fn verify_prepare(&self, prepare: &Subject) -> Result<(), DbftError> {
        self.verify_subject(prepare)
    }

    pub fn verify_commit(&self, commit: &Subject) -> Result<(), DbftError> {
        self.verify_subject(commit)
    }

    pub fn accept_prepare(&mut self, sender: Address) {
        self.prepares.insert(sender);
    }

    /// `|prepares| > 2F` — strictly greater, not `>=`.
    pub fn prepared(&self) -> bool {
        self.prepares.len() > 2 * self.validators.f()
    }

    pub fn accept_commit(&mut self, sender: Address, committed_seal: Signature) {
        self.commits.insert(sender, CommitRecord { sender, committed_seal });
    }

    pub fn committed(&self) -> bool {
        self.commits.len() > 2 * self.validators.f()
    }

    pub fn commit_seals(&self) -> Vec<Signature> {
        self.commits.values().map(|record| record.committed_seal).collect()
    }

    /// Marks this instance abandoned after a round timeout. View-change
    /// recovery is out of scope; nothing in the current protocol calls this,
    /// but a future round-change implementation has a place to hook in
    /// without touching the happy-path state machine.
    pub fn on_timeout(&mut self) {
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Block, Header};
    use alloy_primitives::{Address as Addr, Bytes, FixedBytes, B256, U256};

    fn header(number: u64) -> Header {
        Header {
            number,
            parent_hash: B256::ZERO,
            time: 1_000 + number,
            difficulty: U256::from(1u64),
            coinbase: Addr::ZERO,
            mix_digest: B256::ZERO,
            uncle_hash: B256::ZERO,
            nonce: FixedBytes::<8>::ZERO,
            extra: Bytes::new(),
        }
    }

    fn block(number: u64) -> Block {
        Block { header: header(number), body: Bytes::new() }
    }

    fn validator_set(n: usize) -> ValidatorSet {
        ValidatorSet::new((0..n).map(|i| Addr::with_last_byte(i as u8 + 1)).collect())
    }

    #[test]
    fn verify_commit_rejects_old_message_after_the_fix() {
        let validators = validator_set(4);
        let proposer = validators.at(0);
        let state = State::new(validators, proposer, block(10));

        let stale = Subject {
            view: View { proposer, sequence: 9 },
            digest: seal::proposal_hash(state.proposal.header()),
        };
        assert!(matches!(state.verify_commit(&stale), Err(DbftError::OldMessage { .. })));
        assert!(matches!(state.verify_prepare(&stale), Err(DbftError::OldMessage { .. })));
    }

    #[test]
    fn quorum_requires_strictly_more_than_two_f() {
        let validators = validator_set(4);
        let proposer = validators.at(0);
        let mut state = State::new(validators, proposer, block(1));
        assert_eq!(state.validators.f(), 1);

        state.accept_prepare(state.validators.at(1));
        assert!(!state.prepared());
        state.accept_prepare(state.validators.at(2));
        assert!(!state.prepared());
        state.accept_prepare(state.validators.at(3));
        assert!(state.prepared());
    }
}
