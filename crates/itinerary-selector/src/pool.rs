//! Candidate pool
//!
//! Pending combinations live in an arena addressed by generational [`Handle`]s.
//! Three views share the arena:
//!
//! - a master doubly-linked list (insertion order) that [`CandidatePool::pop_front`] drains
//! - one handle chain per (leg, option), used by [`CandidatePool::invalidate`]
//! - a FIFO of parked entries set aside for re-evaluation
//!
//! Removing an entry only marks its slot dead; chains skip dead handles lazily.
//! Dead slots are reclaimed by [`CandidatePool::compact`], which runs on its own
//! once dead slots outnumber live ones.

use crate::Combination;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Stable reference to a pool entry. Stale once the entry is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Live, on the master list
    Pending,
    /// Live, in the re-evaluation FIFO
    Parked,
    /// Removed; still referenced by chains until the next compaction
    Dead,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
    combination: Option<Combination>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Working set of generated but not yet decided combinations
#[derive(Debug)]
pub struct CandidatePool {
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    chains: Vec<Vec<Vec<Handle>>>,
    invalid: Vec<Vec<bool>>,
    deferred: VecDeque<Handle>,
    index: HashMap<Vec<usize>, Handle>,
    pending: usize,
    parked: usize,
    dead: usize,
}

impl CandidatePool {
    pub fn new(leg_sizes: &[usize]) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            chains: leg_sizes.iter().map(|&n| vec![Vec::new(); n]).collect(),
            invalid: leg_sizes.iter().map(|&n| vec![false; n]).collect(),
            deferred: VecDeque::new(),
            index: HashMap::new(),
            pending: 0,
            parked: 0,
            dead: 0,
        }
    }

    /// Live entries, pending and parked
    pub fn len(&self) -> usize {
        self.pending + self.parked
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries on the master list
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Entries waiting in the re-evaluation FIFO
    pub fn parked(&self) -> usize {
        self.parked
    }

    pub fn is_invalid(&self, leg: usize, option: usize) -> bool {
        self.invalid
            .get(leg)
            .and_then(|l| l.get(option))
            .copied()
            .unwrap_or(false)
    }

    /// Whether the tuple references any invalidated option
    pub fn touches_invalid(&self, sops: &[usize]) -> bool {
        sops.iter()
            .enumerate()
            .any(|(leg, &option)| self.is_invalid(leg, option))
    }

    /// Add a combination to the tail of the master list.
    ///
    /// Returns `None` for tuples that do not fit the itinerary shape or that
    /// reference an invalidated option. Inserting a tuple that is already live
    /// returns the existing handle and drops the new copy.
    pub fn insert(&mut self, combination: Combination) -> Option<Handle> {
        if !self.fits(&combination.sops) || self.touches_invalid(&combination.sops) {
            return None;
        }
        if let Some(&existing) = self.index.get(&combination.sops) {
            return Some(existing);
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Free,
                    combination: None,
                    prev: None,
                    next: None,
                });
                self.slots.len() - 1
            }
        };
        let handle = Handle {
            index,
            generation: self.slots[index].generation,
        };

        for (leg, &option) in combination.sops.iter().enumerate() {
            self.chains[leg][option].push(handle);
        }
        self.index.insert(combination.sops.clone(), handle);

        let slot = &mut self.slots[index];
        slot.state = SlotState::Pending;
        slot.combination = Some(combination);
        self.link_back(index);
        self.pending += 1;
        Some(handle)
    }

    pub fn find(&self, sops: &[usize]) -> Option<Handle> {
        self.index.get(sops).copied()
    }

    pub fn get(&self, handle: Handle) -> Option<&Combination> {
        let index = self.live_index(handle)?;
        self.slots[index].combination.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Combination> {
        let index = self.live_index(handle)?;
        self.slots[index].combination.as_mut()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.live_index(handle).is_some()
    }

    /// Take a live entry out of the pool. Chain references are left behind.
    pub fn remove(&mut self, handle: Handle) -> Option<Combination> {
        let combination = self.kill(handle)?;
        self.maybe_compact();
        Some(combination)
    }

    /// Remove and return the oldest pending entry
    pub fn pop_front(&mut self) -> Option<Combination> {
        let index = self.head?;
        let handle = Handle {
            index,
            generation: self.slots[index].generation,
        };
        self.remove(handle)
    }

    /// Move a pending entry from the master list into the re-evaluation FIFO
    pub fn defer(&mut self, handle: Handle) -> bool {
        match self.live_index(handle) {
            Some(index) if self.slots[index].state == SlotState::Pending => {
                self.unlink(index);
                self.slots[index].state = SlotState::Parked;
                self.pending -= 1;
                self.parked += 1;
                self.deferred.push_back(handle);
                true
            }
            _ => false,
        }
    }

    /// Remove every parked entry that is still live, oldest first
    pub fn drain_deferred(&mut self) -> Vec<Combination> {
        let mut drained = Vec::with_capacity(self.parked);
        while let Some(handle) = self.deferred.pop_front() {
            if let Some(combination) = self.kill(handle) {
                drained.push(combination);
            }
        }
        self.maybe_compact();
        drained
    }

    /// Declare (leg, option) invalid and drop every live entry referencing it.
    ///
    /// Only the chain of that option is walked. Returns how many entries were
    /// removed.
    pub fn invalidate(&mut self, leg: usize, option: usize) -> usize {
        let Some(flag) = self.invalid.get_mut(leg).and_then(|l| l.get_mut(option)) else {
            return 0;
        };
        *flag = true;

        let chain = std::mem::take(&mut self.chains[leg][option]);
        let removed = chain
            .into_iter()
            .filter(|&handle| self.kill(handle).is_some())
            .count();

        debug!("Invalidated option {} of leg {}: {} pending removed", option, leg, removed);
        self.maybe_compact();
        removed
    }

    /// Drop dead handles from every chain and the FIFO, then recycle dead slots
    pub fn compact(&mut self) {
        if self.dead == 0 {
            return;
        }
        let slots = &self.slots;
        let is_live = |h: &Handle| {
            let slot = &slots[h.index];
            slot.generation == h.generation
                && matches!(slot.state, SlotState::Pending | SlotState::Parked)
        };
        for leg in &mut self.chains {
            for chain in leg.iter_mut() {
                chain.retain(is_live);
            }
        }
        self.deferred.retain(is_live);

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state == SlotState::Dead {
                slot.state = SlotState::Free;
                slot.generation = slot.generation.wrapping_add(1);
                slot.combination = None;
                self.free.push(index);
            }
        }
        debug!("Compacted candidate pool: {} slots reclaimed", self.dead);
        self.dead = 0;
    }

    /// Handles referencing (leg, option), live ones only
    pub fn chain(&self, leg: usize, option: usize) -> Vec<Handle> {
        self.chains
            .get(leg)
            .and_then(|l| l.get(option))
            .map(|chain| {
                chain
                    .iter()
                    .copied()
                    .filter(|&h| self.live_index(h).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn fits(&self, sops: &[usize]) -> bool {
        sops.len() == self.chains.len()
            && sops
                .iter()
                .zip(&self.chains)
                .all(|(&option, leg)| option < leg.len())
    }

    fn live_index(&self, handle: Handle) -> Option<usize> {
        let slot = self.slots.get(handle.index)?;
        (slot.generation == handle.generation
            && matches!(slot.state, SlotState::Pending | SlotState::Parked))
        .then_some(handle.index)
    }

    fn kill(&mut self, handle: Handle) -> Option<Combination> {
        let index = self.live_index(handle)?;
        match self.slots[index].state {
            SlotState::Pending => {
                self.unlink(index);
                self.pending -= 1;
            }
            _ => self.parked -= 1,
        }
        let slot = &mut self.slots[index];
        slot.state = SlotState::Dead;
        let combination = slot.combination.take()?;
        self.index.remove(&combination.sops);
        self.dead += 1;
        Some(combination)
    }

    fn maybe_compact(&mut self) {
        if self.dead > self.len() {
            self.compact();
        }
    }

    fn link_back(&mut self, index: usize) {
        self.slots[index].prev = self.tail;
        self.slots[index].next = None;
        match self.tail {
            Some(tail) => self.slots[tail].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let slot = &mut self.slots[index];
            (slot.prev.take(), slot.next.take())
        };
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
    }
}
