//! Ordered index of active troves.
//!
//! Troves are kept in descending nominal collateral ratio (NICR) order:
//! `first` is the best collateralized, `last` the worst. Liquidation and
//! redemption walk the list from `last` towards `first` with [`PositionIndex::prev`].
//!
//! The key is supplied by the caller. NICR ignores price, so a price move
//! never reorders the list.

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION INDEX TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered set of active positions keyed by nominal collateral ratio
pub trait PositionIndex {
    /// Insert `id` with key `nicr`; `prev_hint`/`next_hint` are neighbours the caller expects
    fn insert(
        &mut self,
        id: Address,
        nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> Result<()>;

    /// Remove `id`
    fn remove(&mut self, id: &Address) -> Result<()>;

    /// Move `id` to the position of `new_nicr`
    fn re_insert(
        &mut self,
        id: Address,
        new_nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> Result<()> {
        self.remove(&id)?;
        self.insert(id, new_nicr, prev_hint, next_hint)
    }

    /// Whether `id` is in the index
    fn contains(&self, id: &Address) -> bool;

    /// Whether the index is empty
    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of entries
    fn size(&self) -> usize;

    /// Highest NICR
    fn first(&self) -> Option<Address>;

    /// Lowest NICR
    fn last(&self) -> Option<Address>;

    /// Neighbour with the next lower NICR
    fn next(&self, id: &Address) -> Option<Address>;

    /// Neighbour with the next higher NICR
    fn prev(&self, id: &Address) -> Option<Address>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SORTED TROVES
// ═══════════════════════════════════════════════════════════════════════════════

/// Vector-backed [`PositionIndex`] with binary-search insertion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SortedTroves {
    /// Entries sorted by NICR, highest first
    entries: Vec<(Address, U256)>,
    /// Key of each entry
    keys: BTreeMap<Address, U256>,
}

impl SortedTroves {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored key of `id`
    pub fn key_of(&self, id: &Address) -> Option<U256> {
        self.keys.get(id).copied()
    }

    /// Ids from `first` to `last`
    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.entries.iter().map(|(id, _)| id)
    }

    /// Whether `prev`/`next` bracket `nicr` as adjacent entries.
    ///
    /// `None` stands for the head (for `prev`) or the tail (for `next`).
    pub fn valid_insert_position(
        &self,
        nicr: U256,
        prev: Option<Address>,
        next: Option<Address>,
    ) -> bool {
        match (prev, next) {
            (None, None) => self.entries.is_empty(),
            (None, Some(n)) => {
                self.first() == Some(n) && self.key_of(&n).map_or(false, |k| nicr >= k)
            }
            (Some(p), None) => {
                self.last() == Some(p) && self.key_of(&p).map_or(false, |k| nicr <= k)
            }
            (Some(p), Some(n)) => {
                self.next(&p) == Some(n)
                    && self.key_of(&p).map_or(false, |k| k >= nicr)
                    && self.key_of(&n).map_or(false, |k| nicr >= k)
            }
        }
    }

    /// Neighbours between which `nicr` would be inserted.
    ///
    /// Valid hints are taken as given; otherwise the position is found by
    /// binary search, after any existing entries with the same key.
    pub fn find_insert_position(
        &self,
        nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> (Option<Address>, Option<Address>) {
        if self.valid_insert_position(nicr, prev_hint, next_hint) {
            return (prev_hint, next_hint);
        }
        let index = self.entries.partition_point(|(_, k)| *k >= nicr);
        self.neighbours_at(index)
    }

    fn neighbours_at(&self, index: usize) -> (Option<Address>, Option<Address>) {
        let prev = index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|(id, _)| *id);
        let next = self.entries.get(index).map(|(id, _)| *id);
        (prev, next)
    }

    fn position_of(&self, id: &Address) -> Option<usize> {
        let key = self.key_of(id)?;
        let start = self.entries.partition_point(|(_, k)| *k > key);
        self.entries[start..]
            .iter()
            .take_while(|(_, k)| *k == key)
            .position(|(entry, _)| entry == id)
            .map(|offset| start + offset)
    }
}

impl PositionIndex for SortedTroves {
    fn insert(
        &mut self,
        id: Address,
        nicr: U256,
        prev_hint: Option<Address>,
        next_hint: Option<Address>,
    ) -> Result<()> {
        if self.contains(&id) {
            return Err(Error::PositionAlreadyActive(id));
        }
        if nicr.is_zero() {
            return Err(Error::InvalidParameter {
                name: "nicr".into(),
                reason: "must be positive".into(),
            });
        }

        let index = match self.find_insert_position(nicr, prev_hint, next_hint) {
            (_, Some(next)) => self.position_of(&next).unwrap_or(self.entries.len()),
            (_, None) => self.entries.len(),
        };
        self.entries.insert(index, (id, nicr));
        self.keys.insert(id, nicr);
        Ok(())
    }

    fn remove(&mut self, id: &Address) -> Result<()> {
        let index = self.position_of(id).ok_or(Error::PositionNotFound(*id))?;
        self.entries.remove(index);
        self.keys.remove(id);
        Ok(())
    }

    fn contains(&self, id: &Address) -> bool {
        self.keys.contains_key(id)
    }

    fn size(&self) -> usize {
        self.entries.len()
    }

    fn first(&self) -> Option<Address> {
        self.entries.first().map(|(id, _)| *id)
    }

    fn last(&self) -> Option<Address> {
        self.entries.last().map(|(id, _)| *id)
    }

    fn next(&self, id: &Address) -> Option<Address> {
        let index = self.position_of(id)?;
        self.entries.get(index + 1).map(|(id, _)| *id)
    }

    fn prev(&self, id: &Address) -> Option<Address> {
        let index = self.position_of(id)?;
        index
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|(id, _)| *id)
    }
}
