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

use std::rc::Rc;

use crate::ancillary::{AncillaryIndex, Invalidation};
use crate::event::{Event, EventId};
use crate::event_type::{EventType, EventTypeTable};
use crate::store::EventStore;

/// Ids of every event whose type is one of a fixed list of names, in
/// `(time, id)` order. Names not yet defined match nothing until a later
/// batch defines them.
#[derive(Debug)]
pub struct EventIndex {
    event_names: Vec<String>,
    events: Vec<EventId>,
    invalidation: Invalidation,
}

impl EventIndex {
    pub fn new<S: Into<String>>(event_names: impl IntoIterator<Item = S>) -> Self {
        EventIndex {
            event_names: event_names.into_iter().map(Into::into).collect(),
            events: Vec::new(),
            invalidation: Invalidation::new(),
        }
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    pub fn get_event_names(&self) -> &[String] {
        &self.event_names
    }

    pub fn get_count(&self) -> usize {
        self.events.len()
    }

    pub fn get_event_ids(&self) -> &[EventId] {
        &self.events
    }

    /// Indexed events resolved against `store`, in order.
    pub fn iter<'a>(&'a self, store: &'a EventStore) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter_map(|&id| store.get_event(id))
    }
}

impl AncillaryIndex for EventIndex {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<Rc<EventType>>> {
        self.events.clear();
        self.event_names
            .iter()
            .map(|name| types.get_by_name(name).cloned())
            .collect()
    }

    fn handle_event(&mut self, _matched_index: usize, _event_type: &EventType, event: &Event) {
        self.events.push(event.id());
    }

    fn end_rebuild(&mut self, _last_event_time: f64) {
        self.invalidation.emit();
    }
}
