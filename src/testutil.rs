//! In-memory doubles for the chain-facing traits, for use in this crate's
//! own tests and by embedders exercising the engine without a real chain,
//! store, or validator contract.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    engine::ProposalValidator,
    error::DbftError,
    snapshot::{ChainReader, Snapshot, SnapshotStore, ValidatorContractReader},
    types::{Address, Hash, Header, Proposal},
};

/// A single-branch in-memory chain, headers keyed by number.
#[derive(Clone, Default)]
pub struct InMemoryChain {
    headers: Arc<Mutex<HashMap<u64, Header>>>,
}

impl InMemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, header: Header) {
        self.headers.lock().insert(header.number, header);
    }
}

impl ChainReader for InMemoryChain {
    fn header_by_number(&self, number: u64) -> Option<Header> {
        self.headers.lock().get(&number).cloned()
    }

    fn header(&self, number: u64, hash: Hash) -> Option<Header> {
        self.headers.lock().get(&number).filter(|h| h.hash() == hash).cloned()
    }
}

/// An in-memory checkpoint store, keyed by snapshot hash.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    snapshots: Arc<Mutex<HashMap<Hash, Snapshot>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemoryStore {
    fn load(&self, hash: Hash) -> Option<Snapshot> {
        self.snapshots.lock().get(&hash).cloned()
    }

    fn store(&self, snapshot: &Snapshot) {
        self.snapshots.lock().insert(snapshot.hash, snapshot.clone());
    }
}

/// Returns a fixed validator set for every checkpoint call. Stands in for
/// the `getValidators()` EVM read; never wired to a real caller.
#[derive(Clone)]
pub struct FixedValidatorContract {
    validators: Vec<Address>,
}

impl FixedValidatorContract {
    pub fn new(validators: Vec<Address>) -> Self {
        Self { validators }
    }
}

impl ValidatorContractReader for FixedValidatorContract {
    fn get_validators(&self, _header: &Header) -> Result<Vec<Address>, DbftError> {
        Ok(self.validators.clone())
    }
}

/// Accepts every proposal body unconditionally; transaction/state
/// execution is out of scope for this crate.
#[derive(Clone, Copy, Default)]
pub struct AcceptAllValidator;

impl<P: Proposal> ProposalValidator<P> for AcceptAllValidator {
    fn verify_body(&self, _proposal: &P) -> Result<(), DbftError> {
        Ok(())
    }
}
