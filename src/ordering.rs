// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ordering of opaque `resourceVersion` tokens.
//!
//! Kubernetes documents `resourceVersion` as opaque. Comparing tokens only works when the
//! cluster's storage happens to hand out tokens that sort; etcd-backed clusters produce
//! decimal integers, for which plain string comparison breaks as soon as the number of
//! digits grows. The comparator is therefore pluggable and chosen at startup.

use std::cmp::Ordering;
use std::fmt::Debug;

/// Total order over `resourceVersion` tokens.
pub trait VersionOrdering: Send + Sync + Debug {
    fn compare(&self, a: &str, b: &str) -> Ordering;

    /// `true` when `incoming` is strictly newer than `current`.
    fn is_newer(&self, incoming: &str, current: &str) -> bool {
        self.compare(incoming, current) == Ordering::Greater
    }
}

/// Plain ordinal (byte-wise) string comparison.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrdinalOrdering;

impl VersionOrdering for OrdinalOrdering {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

/// Compare tokens as unsigned integers, falling back to ordinal comparison when either side
/// does not parse.
#[derive(Debug, Default, Clone, Copy)]
pub struct NumericOrdering;

impl VersionOrdering for NumericOrdering {
    fn compare(&self, a: &str, b: &str) -> Ordering {
        match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.cmp(b),
        }
    }
}

#[cfg(test)]
#[path = "ordering_tests.rs"]
mod ordering_tests;
