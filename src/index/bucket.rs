//! Bucket chains
//!
//! Each bucket owns a small slot arena of chain nodes. Successor links are
//! slot indices, so unlinking is O(1) given the predecessor and no node owns
//! another.

use std::time::Instant;

use crate::error::Result;
use crate::pool::SizeClassAllocator;
use crate::record::Record;

struct Node {
    record: Record,
    next: Option<u32>,
}

enum Slot {
    Occupied(Node),
    Vacant { next_vacant: Option<u32> },
}

/// Position of a record in a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub prev: Option<u32>,
    pub slot: u32,
}

/// Head of a singly linked chain of records sharing one bucket
#[derive(Default)]
pub(crate) struct Bucket {
    head: Option<u32>,
    slots: Vec<Slot>,
    vacant: Option<u32>,
    len: usize,
}

impl Bucket {
    pub fn len(&self) -> usize {
        self.len
    }

    /// Find the record whose key equals `key` byte for byte
    pub fn locate(
        &self,
        hash: u64,
        key: &[u8],
        allocator: &SizeClassAllocator,
    ) -> Result<Option<Position>> {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = self.node(slot);
            if node.record.key_matches(hash, key, allocator)? {
                return Ok(Some(Position { prev, slot }));
            }
            prev = Some(slot);
            cursor = node.next;
        }
        Ok(None)
    }

    pub fn record(&self, slot: u32) -> &Record {
        &self.node(slot).record
    }

    pub fn record_mut(&mut self, slot: u32) -> &mut Record {
        match &mut self.slots[slot as usize] {
            Slot::Occupied(node) => &mut node.record,
            Slot::Vacant { .. } => unreachable!("chain link points at vacant slot {}", slot),
        }
    }

    /// Link a record at the chain head
    pub fn push_front(&mut self, record: Record) -> u32 {
        let node = Slot::Occupied(Node {
            record,
            next: self.head,
        });
        let slot = match self.vacant {
            Some(slot) => {
                if let Slot::Vacant { next_vacant } = self.slots[slot as usize] {
                    self.vacant = next_vacant;
                }
                self.slots[slot as usize] = node;
                slot
            }
            None => {
                self.slots.push(node);
                (self.slots.len() - 1) as u32
            }
        };
        self.head = Some(slot);
        self.len += 1;
        slot
    }

    /// Unlink the record at `position` and hand it back
    pub fn unlink(&mut self, position: Position) -> Record {
        let freed = std::mem::replace(
            &mut self.slots[position.slot as usize],
            Slot::Vacant {
                next_vacant: self.vacant,
            },
        );
        let node = match freed {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("unlink of vacant slot {}", position.slot),
        };

        match position.prev {
            Some(prev) => match &mut self.slots[prev as usize] {
                Slot::Occupied(prev_node) => prev_node.next = node.next,
                Slot::Vacant { .. } => unreachable!("predecessor slot {} is vacant", prev),
            },
            None => self.head = node.next,
        }

        self.vacant = Some(position.slot);
        self.len -= 1;
        node.record
    }

    /// Unlink every record matching `predicate`
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Record) -> bool) -> Vec<Record> {
        let mut removed = Vec::new();
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = self.node(slot);
            let next = node.next;
            if predicate(&node.record) {
                removed.push(self.unlink(Position { prev, slot }));
            } else {
                prev = Some(slot);
            }
            cursor = next;
        }
        removed
    }

    /// Unlink every expired record
    pub fn remove_expired(&mut self, now: Instant) -> Vec<Record> {
        self.remove_where(|record| record.is_expired(now))
    }

    /// Take every record out, leaving the bucket empty
    pub fn drain(&mut self) -> Vec<Record> {
        let mut records = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        let mut slots = std::mem::take(&mut self.slots);
        while let Some(slot) = cursor {
            match std::mem::replace(&mut slots[slot as usize], Slot::Vacant { next_vacant: None }) {
                Slot::Occupied(node) => {
                    cursor = node.next;
                    records.push(node.record);
                }
                Slot::Vacant { .. } => unreachable!("chain link points at vacant slot {}", slot),
            }
        }
        *self = Bucket::default();
        records
    }

    /// Records in chain order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = cursor?;
            let node = self.node(slot);
            cursor = node.next;
            Some(&node.record)
        })
    }

    fn node(&self, slot: u32) -> &Node {
        match &self.slots[slot as usize] {
            Slot::Occupied(node) => node,
            Slot::Vacant { .. } => unreachable!("chain link points at vacant slot {}", slot),
        }
    }
}
