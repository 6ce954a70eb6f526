//! Generation-checked storage for execution records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::watch;

use super::record::ExecutionRecord;
use crate::error::PipelineError;

/// Opaque handle to an execution.
///
/// Displayed as `exec-<slot>-<generation>`. A handle to a purged record never
/// resolves to the record that later reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId {
    index: u32,
    generation: u32,
}

impl ExecutionId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exec-{}-{}", self.index, self.generation)
    }
}

impl FromStr for ExecutionId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let not_found = || PipelineError::NotFound(s.to_string());
        let rest = s.trim().strip_prefix("exec-").ok_or_else(not_found)?;
        let (index, generation) = rest.split_once('-').ok_or_else(not_found)?;
        Ok(Self {
            index: index.parse().map_err(|_| not_found())?,
            generation: generation.parse().map_err(|_| not_found())?,
        })
    }
}

impl Serialize for ExecutionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ExecutionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A live record plus its cancellation signal.
#[derive(Debug)]
pub(crate) struct Entry {
    pub record: ExecutionRecord,
    pub cancel: watch::Sender<bool>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

/// Slot arena keyed by [`ExecutionId`].
#[derive(Debug, Default)]
pub(crate) struct ExecutionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_sequence: u64,
}

impl ExecutionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a slot and store the record built for its id.
    pub fn insert(
        &mut self,
        cancel: watch::Sender<bool>,
        build: impl FnOnce(ExecutionId) -> ExecutionRecord,
    ) -> ExecutionId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = ExecutionId::new(index, slot.generation);
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        slot.entry = Some(Entry { record: build(id), cancel, sequence });
        id
    }

    pub fn get(&self, id: ExecutionId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: ExecutionId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Free a slot, invalidating its id.
    pub fn remove(&mut self, id: ExecutionId) -> Option<Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry)
    }

    /// Live entries in insertion order.
    pub fn entries(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.slots.iter().filter_map(|s| s.entry.as_ref()).collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }
}
