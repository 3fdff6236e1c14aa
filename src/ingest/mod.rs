// src/ingest/mod.rs
pub mod pipeline;
pub mod providers;
pub mod scripted;
pub mod types;

use crate::ingest::types::{SourceKey, SourceResult};
use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One-time metrics registration (so series exist once a recorder is installed).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_sources_total", "Source fetches started.");
        describe_counter!(
            "fetch_source_errors_total",
            "Source fetches that failed (backend, script or aborted task)."
        );
        describe_histogram!("fetch_source_ms", "Source fetch time in milliseconds.");
        describe_counter!("entries_kept_total", "Entries that passed every filter.");
        describe_counter!("entries_filtered_total", "Entries dropped by a filter.");
        describe_counter!(
            "entries_deduplicated_total",
            "Entries dropped while merging because their id was already present."
        );
        describe_counter!(
            "script_invocations_total",
            "Script functions invoked by the transform pipeline."
        );
    });
}

/// What to keep when two entries of one (source, project) share an id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Keep the entry merged first.
    #[default]
    FirstSeen,
    /// Keep the entry with the strictly highest priority; ties keep the first.
    HighestPriority,
}

struct Slot {
    rank: usize,
    result: SourceResult,
    positions: HashMap<String, usize>,
}

impl Slot {
    fn new(rank: usize, source: String, project: String) -> Self {
        Self {
            rank,
            result: SourceResult::new(source, project, Vec::new()),
            positions: HashMap::new(),
        }
    }
}

/// Accumulates results by (source, project), deduplicating entries by id.
///
/// The set of ids per key never depends on merge order; with
/// `MergePolicy::HighestPriority` neither does the kept entry (ties aside).
pub struct ResultSet {
    policy: MergePolicy,
    slots: Vec<Slot>,
    index: HashMap<SourceKey, usize>,
}

impl ResultSet {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Merge one source's result. `rank` is the source's registration index;
    /// output order follows the lowest rank seen per key.
    ///
    /// Returns how many entries were dropped as duplicates.
    pub fn merge(&mut self, rank: usize, result: SourceResult) -> usize {
        let SourceResult {
            source,
            project,
            items,
        } = result;
        let policy = self.policy;
        let key = SourceKey::new(source.clone(), project.clone());
        let slot_idx = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.slots.push(Slot::new(rank, source, project));
                self.index.insert(key, self.slots.len() - 1);
                self.slots.len() - 1
            }
        };
        let slot = &mut self.slots[slot_idx];
        slot.rank = slot.rank.min(rank);

        let mut dropped = 0usize;
        for entry in items {
            match slot.positions.get(&entry.identifier) {
                None => {
                    slot.positions
                        .insert(entry.identifier.clone(), slot.result.items.len());
                    slot.result.items.push(entry);
                }
                Some(&pos) => {
                    dropped += 1;
                    let kept = &mut slot.result.items[pos];
                    if policy == MergePolicy::HighestPriority && entry.priority > kept.priority {
                        *kept = entry;
                    }
                }
            }
        }
        dropped
    }

    /// Merged results, ordered by rank.
    pub fn into_results(self) -> Vec<SourceResult> {
        let mut slots = self.slots;
        slots.sort_by_key(|s| s.rank);
        slots.into_iter().map(|s| s.result).collect()
    }
}
