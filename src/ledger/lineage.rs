//! Lineage index: ancestry tracking over accepted records
//!
//! Every record knows where it came from. The index keeps the breeding DAG
//! as an arena of nodes addressed by slot, with parent and child edges stored
//! as slot lists, plus the generation of every node. It is derived entirely
//! from the ledger and can be rebuilt from a full scan at any time.

use super::BreedingEventRecord;
use crate::hash::Fingerprint;
use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Deref;

#[derive(Debug, Clone)]
struct Node {
    fingerprint: Fingerprint,
    /// Position of the record in ledger append order
    position: usize,
    parents: Vec<usize>,
    children: Vec<usize>,
    generation: u32,
}

/// Parent/child adjacency plus generation cache
#[derive(Debug, Clone, Default)]
pub struct LineageIndex {
    slots: HashMap<Fingerprint, usize>,
    nodes: Vec<Node>,
}

impl LineageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full rebuild from records in append order
    ///
    /// Duplicates keep their first occurrence and parents absent from the
    /// scan are skipped, so this also works over a corrupted ledger.
    pub fn build(records: &[BreedingEventRecord]) -> Self {
        let mut index = Self::new();
        for (position, record) in records.iter().enumerate() {
            index.attach(record, position);
        }
        index
    }

    /// Attach one record as a child of its parents, returning its generation
    pub fn attach(&mut self, record: &BreedingEventRecord, position: usize) -> u32 {
        let fingerprint = record.fingerprint();
        if let Some(&slot) = self.slots.get(&fingerprint) {
            return self.nodes[slot].generation;
        }

        let slot = self.nodes.len();
        let mut parents = Vec::with_capacity(record.parents().len());
        for parent in record.parents() {
            if let Some(&p) = self.slots.get(parent) {
                // asexual propagation lists the same parent twice; one edge is enough
                if !parents.contains(&p) {
                    parents.push(p);
                }
            }
        }

        let generation = if record.is_genesis() {
            0
        } else if parents.is_empty() {
            record.generation()
        } else {
            1 + parents
                .iter()
                .map(|&p| self.nodes[p].generation)
                .max()
                .unwrap_or(0)
        };

        for &p in &parents {
            self.nodes[p].children.push(slot);
        }
        self.nodes.push(Node {
            fingerprint,
            position,
            parents,
            children: Vec::new(),
            generation,
        });
        self.slots.insert(fingerprint, slot);
        generation
    }

    /// Generation implied by a parent list, or the first parent not indexed
    pub fn expected_generation(&self, parents: &[Fingerprint]) -> Result<u32, Fingerprint> {
        let mut deepest: Option<u32> = None;
        for parent in parents {
            let generation = self.generation(parent).ok_or(*parent)?;
            deepest = Some(deepest.map_or(generation, |d| d.max(generation)));
        }
        Ok(deepest.map_or(0, |d| d + 1))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.slots.contains_key(fingerprint)
    }

    /// Ledger append position of a record
    pub fn position(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.slots.get(fingerprint).map(|&s| self.nodes[s].position)
    }

    pub fn generation(&self, fingerprint: &Fingerprint) -> Option<u32> {
        self.slots.get(fingerprint).map(|&s| self.nodes[s].generation)
    }

    /// Direct children in the order they were appended
    pub fn children(&self, fingerprint: &Fingerprint) -> Vec<Fingerprint> {
        self.neighbours(fingerprint, Direction::Down)
    }

    /// Direct parents that are present in the index
    pub fn parents(&self, fingerprint: &Fingerprint) -> Vec<Fingerprint> {
        self.neighbours(fingerprint, Direction::Up)
    }

    fn neighbours(&self, fingerprint: &Fingerprint, direction: Direction) -> Vec<Fingerprint> {
        match self.slots.get(fingerprint) {
            Some(&slot) => self
                .edges(slot, direction)
                .iter()
                .map(|&s| self.nodes[s].fingerprint)
                .collect(),
            None => Vec::new(),
        }
    }

    fn edges(&self, slot: usize, direction: Direction) -> &[usize] {
        match direction {
            Direction::Up => &self.nodes[slot].parents,
            Direction::Down => &self.nodes[slot].children,
        }
    }

    /// Breadth-first walk from nearest parents toward genesis
    pub fn ancestors(&self, fingerprint: &Fingerprint) -> Walk<&Self> {
        Walk::new(self, fingerprint, Direction::Up)
    }

    /// Breadth-first walk from direct children outward
    pub fn descendants(&self, fingerprint: &Fingerprint) -> Walk<&Self> {
        Walk::new(self, fingerprint, Direction::Down)
    }

    /// Shortest parent path from a record to a genesis ancestor
    ///
    /// The path starts at `fingerprint` and ends at a record with no parents.
    /// Ties are broken by parent order. Empty if the fingerprint is unknown.
    pub fn path_to_genesis(&self, fingerprint: &Fingerprint) -> Vec<Fingerprint> {
        let Some(&origin) = self.slots.get(fingerprint) else {
            return Vec::new();
        };
        let mut came_from: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::from([origin]);
        let mut seen = HashSet::from([origin]);

        while let Some(slot) = queue.pop_front() {
            if self.nodes[slot].parents.is_empty() {
                let mut path = vec![self.nodes[slot].fingerprint];
                let mut cursor = slot;
                while let Some(&next) = came_from.get(&cursor) {
                    path.push(self.nodes[next].fingerprint);
                    cursor = next;
                }
                path.reverse();
                return path;
            }
            for &parent in &self.nodes[slot].parents {
                if seen.insert(parent) {
                    came_from.insert(parent, slot);
                    queue.push_back(parent);
                }
            }
        }
        vec![*fingerprint]
    }
}

/// Which edges a walk follows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Toward parents
    Up,
    /// Toward children
    Down,
}

/// Lazy, restartable breadth-first lineage sequence
///
/// Each fingerprint is produced once, nearest first. The walk reads the
/// index it was created from; when that index is a ledger snapshot, later
/// appends are not visible to it.
#[derive(Debug, Clone)]
pub struct Walk<I> {
    index: I,
    direction: Direction,
    origin: Option<usize>,
    queue: VecDeque<usize>,
    seen: HashSet<usize>,
}

impl<I: Deref<Target = LineageIndex>> Walk<I> {
    pub(crate) fn new(index: I, fingerprint: &Fingerprint, direction: Direction) -> Self {
        let origin = index.slots.get(fingerprint).copied();
        let mut walk = Self {
            index,
            direction,
            origin,
            queue: VecDeque::new(),
            seen: HashSet::new(),
        };
        walk.restart();
        walk
    }

    /// Rewind to the first step
    pub fn restart(&mut self) {
        self.queue.clear();
        self.seen.clear();
        if let Some(origin) = self.origin {
            self.seen.insert(origin);
            self.enqueue(origin);
        }
    }

    fn enqueue(&mut self, slot: usize) {
        for &next in self.index.edges(slot, self.direction) {
            if self.seen.insert(next) {
                self.queue.push_back(next);
            }
        }
    }
}

impl<I: Deref<Target = LineageIndex>> Iterator for Walk<I> {
    type Item = Fingerprint;

    fn next(&mut self) -> Option<Fingerprint> {
        let slot = self.queue.pop_front()?;
        self.enqueue(slot);
        Some(self.index.nodes[slot].fingerprint)
    }
}
