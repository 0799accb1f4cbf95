// src/actions.rs
//
// Bitmask encoding of the set of actions allowed in a cell.
//
// Actions are dense indices 0..num_actions. Bit i of the mask is set when
// action i is allowed.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest action space an `ActionSet` can represent.
pub const MAX_ACTIONS: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet(u32);

impl ActionSet {
    pub const EMPTY: ActionSet = ActionSet(0);

    /// Set containing actions `0..num_actions`.
    pub fn all(num_actions: usize) -> Self {
        debug_assert!(num_actions <= MAX_ACTIONS);
        if num_actions >= MAX_ACTIONS {
            ActionSet(u32::MAX)
        } else {
            ActionSet((1u32 << num_actions) - 1)
        }
    }

    pub const fn from_bits(bits: u32) -> Self {
        ActionSet(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Set holding just `action`; empty when `action >= MAX_ACTIONS`.
    pub fn single(action: usize) -> Self {
        let mut set = ActionSet::EMPTY;
        set.insert(action);
        set
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn contains(self, action: usize) -> bool {
        action < MAX_ACTIONS && self.0 & (1u32 << action) != 0
    }

    /// No-op for `action >= MAX_ACTIONS`.
    pub fn insert(&mut self, action: usize) {
        if action < MAX_ACTIONS {
            self.0 |= 1u32 << action;
        }
    }

    /// No-op for `action >= MAX_ACTIONS`.
    pub fn remove(&mut self, action: usize) {
        if action < MAX_ACTIONS {
            self.0 &= !(1u32 << action);
        }
    }

    pub const fn is_subset(self, other: ActionSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// Lowest allowed action index.
    pub fn first(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// The `n`-th allowed action in ascending order.
    pub fn nth(self, n: usize) -> Option<usize> {
        let mut bits = self.0;
        for _ in 0..n {
            if bits == 0 {
                return None;
            }
            bits &= bits - 1;
        }
        if bits == 0 {
            None
        } else {
            Some(bits.trailing_zeros() as usize)
        }
    }

    pub fn iter(self) -> Iter {
        Iter(self.0)
    }
}

impl FromIterator<usize> for ActionSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = ActionSet::EMPTY;
        for a in iter {
            set.insert(a);
        }
        set
    }
}

impl IntoIterator for ActionSet {
    type Item = usize;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

/// Ascending iterator over the actions of a set.
#[derive(Debug, Clone)]
pub struct Iter(u32);

impl Iterator for Iter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let a = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(a)
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
