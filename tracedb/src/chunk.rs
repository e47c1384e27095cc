// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::cell::Cell;
use std::ops::Deref;

use crate::event::Event;

pub const DEFAULT_SOFT_CAP: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Empty,
    /// Filling for the first time, never reconciled.
    Accumulating,
    /// Received events since the last reconciliation.
    Dirty,
    Reconciled,
}

/// A bounded run of events. Sorted by `(time, id)` whenever it is not dirty.
#[derive(Debug, Default)]
pub struct Chunk {
    events: Vec<Event>,
    time_start: f64,
    time_end: f64,
    inserted_count: usize,
    out_of_order: bool,
    reconciled_once: bool,
    references: Cell<u32>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_sorted(events: Vec<Event>) -> Self {
        let mut chunk = Chunk {
            events,
            ..Chunk::default()
        };
        chunk.refresh_bounds();
        chunk.reconciled_once = true;
        chunk
    }

    pub fn state(&self) -> ChunkState {
        if self.events.is_empty() {
            ChunkState::Empty
        } else if !self.reconciled_once {
            ChunkState::Accumulating
        } else if self.inserted_count > 0 {
            ChunkState::Dirty
        } else {
            ChunkState::Reconciled
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self, soft_cap: usize) -> bool {
        self.events.len() >= soft_cap
    }

    pub fn time_start(&self) -> f64 {
        self.time_start
    }

    pub fn time_end(&self) -> f64 {
        self.time_end
    }

    pub fn is_out_of_order(&self) -> bool {
        self.out_of_order
    }

    /// Returns true when this insert dirtied a clean chunk.
    pub(crate) fn insert(&mut self, event: Event) -> bool {
        let time = event.time();
        if let Some(last) = self.events.last() {
            if time < last.time() {
                self.out_of_order = true;
            }
            self.time_start = self.time_start.min(time);
            self.time_end = self.time_end.max(time);
        } else {
            self.time_start = time;
            self.time_end = time;
        }
        self.events.push(event);
        self.inserted_count += 1;
        self.inserted_count == 1
    }

    /// Sorts the chunk if anything arrived out of order and refreshes its
    /// bounds. Returns true if a sort happened.
    pub(crate) fn reconcile_insertion(&mut self) -> bool {
        debug_assert_eq!(self.references.get(), 0, "reconciling an acquired chunk");
        let sorted = self.out_of_order;
        if sorted {
            self.events.sort_by(Event::cmp_order);
            self.out_of_order = false;
        }
        self.refresh_bounds();
        self.inserted_count = 0;
        self.reconciled_once = true;
        sorted
    }

    fn refresh_bounds(&mut self) {
        if let (Some(first), Some(last)) = (self.events.first(), self.events.last()) {
            self.time_start = first.time();
            self.time_end = last.time();
        }
    }

    pub(crate) fn first(&self) -> Option<&Event> {
        self.events.first()
    }

    pub(crate) fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub(crate) fn events_mut(&mut self) -> &mut [Event] {
        debug_assert_eq!(self.references.get(), 0, "mutating an acquired chunk");
        &mut self.events
    }

    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        self.inserted_count = 0;
        self.out_of_order = false;
        std::mem::take(&mut self.events)
    }

    /// Pins the chunk for reading until the guard drops.
    pub fn acquire(&self) -> ChunkGuard<'_> {
        self.references.set(self.references.get() + 1);
        ChunkGuard { chunk: self }
    }

    pub fn references(&self) -> u32 {
        self.references.get()
    }

    fn release(&self) {
        let references = self.references.get();
        debug_assert!(references > 0, "released an unreferenced chunk");
        self.references.set(references.saturating_sub(1));
    }
}

pub struct ChunkGuard<'a> {
    chunk: &'a Chunk,
}

impl<'a> ChunkGuard<'a> {
    /// Chunks are only paged out through `&mut` access, so the slice lives
    /// as long as the chunk borrow rather than the guard.
    pub fn events(&self) -> &'a [Event] {
        &self.chunk.events
    }
}

impl Deref for ChunkGuard<'_> {
    type Target = [Event];

    fn deref(&self) -> &[Event] {
        &self.chunk.events
    }
}

impl Drop for ChunkGuard<'_> {
    fn drop(&mut self) {
        self.chunk.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: u64, time: f64) -> Event {
        Event::new(id, 1, time, None)
    }

    #[test]
    fn test_state_transitions() {
        let mut chunk = Chunk::new();
        assert_eq!(chunk.state(), ChunkState::Empty);

        assert!(chunk.insert(event(0, 1.0)));
        assert!(!chunk.insert(event(1, 2.0)));
        assert_eq!(chunk.state(), ChunkState::Accumulating);

        assert!(!chunk.reconcile_insertion());
        assert_eq!(chunk.state(), ChunkState::Reconciled);

        assert!(chunk.insert(event(2, 3.0)));
        assert_eq!(chunk.state(), ChunkState::Dirty);
        chunk.reconcile_insertion();
        assert_eq!(chunk.state(), ChunkState::Reconciled);
    }

    #[test]
    fn test_out_of_order_insert_sorts_on_reconcile() {
        let mut chunk = Chunk::new();
        for (id, time) in [(0, 5.0), (1, 3.0), (2, 9.0), (3, 3.0)] {
            chunk.insert(event(id, time));
        }
        assert!(chunk.is_out_of_order());
        assert!(chunk.reconcile_insertion());

        let guard = chunk.acquire();
        let order: Vec<_> = guard.iter().map(|e| (e.time(), e.id())).collect();
        assert_eq!(order, vec![(3.0, 1), (3.0, 3), (5.0, 0), (9.0, 2)]);
        drop(guard);
        assert_eq!((chunk.time_start(), chunk.time_end()), (3.0, 9.0));
    }

    #[test]
    fn test_guard_counts_references() {
        let mut chunk = Chunk::new();
        chunk.insert(event(0, 1.0));
        {
            let a = chunk.acquire();
            let b = chunk.acquire();
            assert_eq!(chunk.references(), 2);
            assert_eq!(a.len(), b.events().len());
        }
        assert_eq!(chunk.references(), 0);
    }

    #[test]
    fn test_soft_cap() {
        let mut chunk = Chunk::new();
        for id in 0..3 {
            chunk.insert(event(id, id as f64));
        }
        assert!(chunk.is_full(3));
        assert!(!chunk.is_full(4));
    }
}
