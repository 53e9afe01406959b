// src/engine/partition.rs

//! Isolated variable state for iterations running in parallel.
//!
//! Each iteration index owns one partition. A partition starts as a copy of
//! the shared scopes taken when the manager was created and is only
//! materialized the first time its iteration asks for it. Script mutations
//! land in the partition (and its journal), never in shared state. When the
//! run completes, journals are replayed into shared state in iteration
//! order, so the last iteration to write a key wins, as it would in a
//! sequential run.

use tracing::{debug, trace};

use crate::variables::{ScopeMutations, ScopeSet};

#[derive(Debug, Clone)]
pub struct Partition {
    pub index: usize,
    pub variables: ScopeSet,
    /// Every mutation applied to `variables`, in order.
    pub journal: ScopeMutations,
}

#[derive(Debug)]
pub struct PartitionManager {
    base: ScopeSet,
    partitions: Vec<Option<Partition>>,
}

impl PartitionManager {
    pub fn new(count: usize, base: ScopeSet) -> Self {
        Self {
            base,
            partitions: (0..count).map(|_| None).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Variables of partition `index`, creating the partition on first use.
    /// `None` when `index` is out of range.
    pub fn materialize(&mut self, index: usize) -> Option<ScopeSet> {
        let base = &self.base;
        let slot = self.partitions.get_mut(index)?;
        let partition = slot.get_or_insert_with(|| {
            trace!(partition = index, "materializing partition");
            Partition {
                index,
                variables: base.clone(),
                journal: ScopeMutations::new(),
            }
        });
        Some(partition.variables.clone())
    }

    /// Apply mutations to partition `index`. Out-of-range or not yet
    /// materialized partitions are left alone.
    pub fn record(&mut self, index: usize, mutations: &ScopeMutations) {
        if mutations.is_empty() {
            return;
        }
        let Some(Some(partition)) = self.partitions.get_mut(index) else {
            debug!(partition = index, "ignoring mutations for unknown partition");
            return;
        };
        partition.variables.apply(mutations);
        partition.journal.extend(mutations.clone());
    }

    pub fn partition(&self, index: usize) -> Option<&Partition> {
        self.partitions.get(index)?.as_ref()
    }

    /// Replay every partition's journal into `shared`, lowest index first.
    pub fn merge_into(&self, shared: &mut ScopeSet) {
        for partition in self.partitions.iter().flatten() {
            if partition.journal.is_empty() {
                continue;
            }
            debug!(partition = partition.index, "merging partition");
            shared.apply(&partition.journal);
        }
    }
}
