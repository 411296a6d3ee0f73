//! Validator set and quorum math, ported from
//! `consensus/dbft/types.go`'s `Validators` slice type.

use alloy_primitives::Address;

/// An ordered list of validator addresses with the quorum arithmetic the
/// PBFT and DPoS layers both depend on. Order is significant — it defines
/// the rotation schedule — and is preserved exactly as given, matching
/// `types.go`'s `Validators []common.Address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSet {
    addresses: Vec<Address>,
}

impl ValidatorSet {
    /// Build a set from a list of addresses in the order the validator
    /// contract returned them; `newSnapshot` stores this list verbatim.
    pub fn new(addresses: Vec<Address>) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// `F(N) = ceil(N/3) - 1`, the maximum number of faulty validators
    /// tolerated.
    pub fn f(&self) -> usize {
        let n = self.addresses.len();
        n.div_ceil(3).saturating_sub(1)
    }

    /// `2F + 1`, the number of matching messages required to progress a
    /// PBFT phase.
    pub fn quorum(&self) -> usize {
        2 * self.f() + 1
    }

    pub fn is_validator(&self, address: Address) -> bool {
        self.addresses.contains(&address)
    }

    /// Index of `address` in contract order, used for in-turn rotation.
    pub fn index_of(&self, address: Address) -> Option<usize> {
        self.addresses.iter().position(|a| *a == address)
    }

    pub fn at(&self, index: usize) -> Address {
        self.addresses[index % self.addresses.len()]
    }
}
