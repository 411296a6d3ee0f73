//! DPoS snapshot, ported from `consensus/dbft/dpos/{dpos,snapshot}.go`.

use std::collections::HashMap;

use schnellru::{ByLength, LruMap};

use crate::{
    config::DbftConfig,
    crypto::recover_address_from_payload,
    error::DbftError,
    seal,
    types::{Address, Hash, Header},
    validators::ValidatorSet,
};

/// The authoritative validator/spam-window state at a given (number, hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub number: u64,
    pub hash: Hash,
    pub validators: ValidatorSet,
    pub recents: HashMap<u64, Address>,
    pub loop_start_time: u64,
}

impl Snapshot {
    pub fn new(number: u64, hash: Hash, validators: Vec<Address>, loop_start_time: u64) -> Self {
        Self {
            number,
            hash,
            validators: ValidatorSet::new(validators),
            recents: HashMap::new(),
            loop_start_time,
        }
    }

    /// Replay `headers` (must be contiguous, starting at `self.number + 1`)
    /// against this snapshot, returning the advanced snapshot.
    pub fn apply(&self, headers: &[Header]) -> Result<Snapshot, DbftError> {
        if headers.is_empty() {
            return Ok(self.clone());
        }
        for pair in headers.windows(2) {
            if pair[1].number != pair[0].number + 1 {
                return Err(DbftError::InvalidVotingChain);
            }
        }
        if headers[0].number != self.number + 1 {
            return Err(DbftError::InvalidVotingChain);
        }

        let mut snap = self.clone();
        for header in headers {
            let number = header.number;
            let limit = snap.validators.len() as u64 / 2 + 1;
            if number >= limit {
                snap.recents.remove(&(number - limit));
            }

            let extra = seal::extract(header)?;
            let sig = extra.seal.ok_or(DbftError::InvalidSignature)?;
            let digest = seal::sig_hash(header)?;
            let signer = recover_address_from_payload(digest.as_slice(), &sig)?;

            if snap.recents.values().any(|recent| *recent == signer) {
                return Err(DbftError::RecentlySigned { signer });
            }
            snap.recents.insert(number, signer);
        }

        snap.number += headers.len() as u64;
        snap.hash = headers.last().unwrap().hash();
        Ok(snap)
    }

    /// Whether `addr` is the scheduled proposer for `(header_time, number)`
    /// and hasn't signed inside the recent-signer spam window.
    pub fn inturn(&self, addr: Address, header_time: u64, number: u64, period: u64) -> bool {
        let limit = self.validators.len() as u64 / 2 + 1;
        for (&seen, recent) in &self.recents {
            if *recent == addr && (number < limit || seen > number - limit) {
                return false;
            }
        }

        if self.validators.is_empty() {
            return false;
        }
        let loop_index = (((header_time - self.loop_start_time) / period) as usize) % self.validators.len();
        self.validators.at(loop_index) == addr
    }

    /// The soonest future unix-second at which `addr` is scheduled to
    /// propose, given the current wall-clock `now`.
    pub fn next_slot(&self, addr: Address, period: u64, now: u64) -> u64 {
        let n_validators = self.validators.len() as u64;
        let loop_count = ((now - self.loop_start_time) / period) / n_validators;
        let index = self.validators.index_of(addr).unwrap_or(0) as u64;

        let current = self.loop_start_time + loop_count * n_validators * period;
        let candidate = current + index * period;
        if candidate > now {
            candidate
        } else {
            candidate + n_validators * period
        }
    }
}

/// Header lookups the snapshot builder needs from the embedding chain,
/// deliberately narrow: snapshots never hold a chain back-reference.
pub trait ChainReader {
    fn header_by_number(&self, number: u64) -> Option<Header>;
    fn header(&self, number: u64, hash: Hash) -> Option<Header>;
}

/// On-disk persistence for checkpoint snapshots.
pub trait SnapshotStore {
    fn load(&self, hash: Hash) -> Option<Snapshot>;
    fn store(&self, snapshot: &Snapshot);
}

/// A single, read-only `getValidators()` call against chain state at
/// `header`.
pub trait ValidatorContractReader {
    fn get_validators(&self, header: &Header) -> Result<Vec<Address>, DbftError>;
}

/// Builds and caches snapshots, replaying headers back from the last
/// checkpoint the way `DPos.Snapshot` does.
pub struct SnapshotBuilder {
    config: DbftConfig,
    cache: LruMap<Hash, Snapshot, ByLength>,
}

impl SnapshotBuilder {
    pub fn new(config: DbftConfig) -> Self {
        Self { config, cache: LruMap::new(ByLength::new(config.in_memory_snapshots)) }
    }

    /// Walk backwards from `(number, hash)` to a cached, persisted, or
    /// checkpoint snapshot, then replay forward.
    pub fn snapshot(
        &mut self,
        chain: &impl ChainReader,
        store: &impl SnapshotStore,
        contract: &impl ValidatorContractReader,
        number: u64,
        hash: Hash,
        parents: &[Header],
    ) -> Result<Snapshot, DbftError> {
        let mut headers: Vec<Header> = Vec::new();
        let mut cursor_number = number;
        let mut cursor_hash = hash;
        let mut parents = parents.to_vec();

        let base = loop {
            if let Some(snap) = self.cache.get(&cursor_hash) {
                break snap.clone();
            }

            if cursor_number.is_multiple_of(self.config.checkpoint_interval) {
                if let Some(snap) = store.load(cursor_hash) {
                    break snap;
                }
            }

            if cursor_number == 0 || cursor_number.is_multiple_of(self.config.epoch) {
                if let Some(checkpoint) = chain.header_by_number(cursor_number) {
                    let checkpoint_hash = checkpoint.hash();
                    let validators = contract.get_validators(&checkpoint)?;
                    let snap = Snapshot::new(cursor_number, checkpoint_hash, validators, checkpoint.time);
                    store.store(&snap);
                    break snap;
                }
            }

            let header = if let Some(pos) = parents.iter().position(|h| h.number == cursor_number) {
                parents.remove(pos)
            } else {
                chain
                    .header(cursor_number, cursor_hash)
                    .ok_or(DbftError::UnknownAncestor { number: cursor_number, parent_hash: cursor_hash })?
            };
            cursor_hash = header.parent_hash;
            cursor_number -= 1;
            headers.push(header);
        };

        headers.reverse();
        let had_headers = !headers.is_empty();
        let snapshot = base.apply(&headers)?;

        self.cache.insert(snapshot.hash, snapshot.clone());
        if snapshot.number % self.config.checkpoint_interval == 0 && had_headers {
            store.store(&snapshot);
        }

        Ok(snapshot)
    }
}
