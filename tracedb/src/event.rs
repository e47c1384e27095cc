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

use std::cmp::Ordering;

use protocol::{ArgValue, ArgumentValues};

use crate::event_type::{EventType, EventTypeId};

/// Insertion sequence number. Breaks ties between events with equal times.
pub type EventId = u64;

/// Decoded arguments in schema order, plus values merged in from
/// append-scope-data events.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArgumentData {
    values: ArgumentValues,
    appended: Vec<(String, ArgValue)>,
}

impl ArgumentData {
    pub fn new(values: ArgumentValues) -> Self {
        ArgumentData {
            values,
            appended: Vec::new(),
        }
    }

    pub fn values(&self) -> &[ArgValue] {
        &self.values
    }

    pub fn slot(&self, slot: usize) -> Option<&ArgValue> {
        self.values.get(slot)
    }

    pub fn appended(&self) -> &[(String, ArgValue)] {
        &self.appended
    }

    pub fn appended_value(&self, name: &str) -> Option<&ArgValue> {
        self.appended.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Later appends of the same name replace earlier ones.
    pub fn append(&mut self, name: &str, value: ArgValue) {
        match self.appended.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = value,
            None => self.appended.push((name.to_string(), value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.appended.is_empty()
    }
}

/// Filled in by the rescope pass once a scope's leave event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScopeData {
    pub end_time: f64,
    /// Total time of direct children.
    pub child_time: f64,
    /// Time of nested system-time scopes at any depth.
    pub system_time: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    time: f64,
    type_id: EventTypeId,
    args: Option<ArgumentData>,
    parent: Option<EventId>,
    depth: u32,
    scope: Option<ScopeData>,
}

impl Event {
    pub(crate) fn new(id: EventId, type_id: EventTypeId, time: f64, args: Option<ArgumentData>) -> Self {
        Event {
            id,
            time,
            type_id,
            args,
            parent: None,
            depth: 0,
            scope: None,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn type_id(&self) -> EventTypeId {
        self.type_id
    }

    pub fn arguments(&self) -> Option<&ArgumentData> {
        self.args.as_ref()
    }

    /// Looks an argument up by name through `event_type`'s slot map, then
    /// among appended values.
    pub fn argument<'a>(&'a self, event_type: &EventType, name: &str) -> Option<&'a ArgValue> {
        let args = self.args.as_ref()?;
        event_type
            .arg_slot(name)
            .and_then(|slot| args.slot(slot))
            .or_else(|| args.appended_value(name))
    }

    /// Enclosing scope event, if any.
    pub fn parent(&self) -> Option<EventId> {
        self.parent
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn scope(&self) -> Option<&ScopeData> {
        self.scope.as_ref()
    }

    pub fn end_time(&self) -> Option<f64> {
        self.scope.map(|s| s.end_time)
    }

    pub fn total_duration(&self) -> Option<f64> {
        self.scope.map(|s| s.end_time - self.time)
    }

    pub fn own_duration(&self) -> Option<f64> {
        self.scope.map(|s| s.end_time - self.time - s.child_time)
    }

    pub fn user_duration(&self) -> Option<f64> {
        self.scope.map(|s| s.end_time - self.time - s.system_time)
    }

    pub(crate) fn cmp_order(&self, other: &Event) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.id.cmp(&other.id))
    }

    pub(crate) fn reset_scope(&mut self, parent: Option<EventId>, depth: u32) {
        self.parent = parent;
        self.depth = depth;
        self.scope = None;
    }

    pub(crate) fn set_scope(&mut self, scope: ScopeData) {
        self.scope = Some(scope);
    }

    pub(crate) fn retype(&mut self, type_id: EventTypeId) {
        self.type_id = type_id;
        self.args = None;
    }

    pub(crate) fn take_arguments(&mut self) -> Option<ArgumentData> {
        self.args.take()
    }

    pub(crate) fn arguments_mut(&mut self) -> &mut ArgumentData {
        self.args.get_or_insert_with(ArgumentData::default)
    }
}
