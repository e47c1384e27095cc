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

use std::fmt;
use std::rc::Rc;

use crate::event::Event;
use crate::event_type::{EventType, EventTypeTable};

/// A structure derived from the store and rebuilt after every insertion
/// batch, sharing one scan of the events with the other indices.
pub trait AncillaryIndex {
    /// Resets rebuild state and lists the watched types. An event's position
    /// in the returned list is the `matched_index` passed to
    /// [`handle_event`](Self::handle_event); `None` entries watch nothing.
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<Rc<EventType>>>;

    /// Called in `(time, id)` order for each event of a watched type.
    fn handle_event(&mut self, matched_index: usize, event_type: &EventType, event: &Event);

    /// Finalizes the rebuild. `last_event_time` is the time of the store's
    /// last event, for entities that end where the trace ends.
    fn end_rebuild(&mut self, last_event_time: f64);
}

/// Listeners notified after a successful rebuild.
///
/// Listeners run while the owner is mutably borrowed and must not reach back
/// into it.
#[derive(Default)]
pub struct Invalidation {
    generation: u64,
    listeners: Vec<Box<dyn FnMut()>>,
}

impl Invalidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: impl FnMut() + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn emit(&mut self) {
        self.generation += 1;
        for listener in &mut self.listeners {
            listener();
        }
    }

    /// Bumped on every emit.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invalidation")
            .field("generation", &self.generation)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
