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

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::rc::Rc;

use protocol::{ArgValue, ArgumentValues};

use crate::ancillary::{AncillaryIndex, Invalidation};
use crate::chunk::{Chunk, ChunkGuard};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::event::{ArgumentData, Event, EventId, ScopeData};
use crate::event_type::{builtin, EventClass, EventFlags, EventType, EventTypeId, EventTypeTable};

type SharedIndex = Rc<RefCell<dyn AncillaryIndex>>;

/// (chunk, position within chunk)
type Location = (usize, usize);

struct OpenScope {
    location: Location,
    id: EventId,
    time: f64,
    system: bool,
    child_time: f64,
    system_time: f64,
}

/// Time-ordered event log for one zone.
///
/// Events go in through `begin_inserting_events` / `insert*` /
/// `end_inserting_events`. Reads are valid between batches, when every chunk
/// is reconciled and events ascend by `(time, id)` across the whole store.
pub struct EventStore {
    soft_cap: usize,
    types: EventTypeTable,
    chunks: Vec<Chunk>,
    dirty_chunks: Vec<usize>,
    inserting: bool,
    next_event_id: EventId,
    locations: Vec<Location>,
    hidden_count: usize,
    maximum_scope_depth: u32,
    first_event_time: f64,
    last_event_time: f64,
    ancillary: Vec<SharedIndex>,
    invalidation: Invalidation,
}

impl EventStore {
    pub fn new(config: StoreConfig) -> Self {
        let mut types = EventTypeTable::new();
        types.define_builtins();
        EventStore {
            soft_cap: config.chunk_soft_cap.max(1),
            types,
            chunks: Vec::new(),
            dirty_chunks: Vec::new(),
            inserting: false,
            next_event_id: 0,
            locations: Vec::new(),
            hidden_count: 0,
            maximum_scope_depth: 0,
            first_event_time: 0.0,
            last_event_time: 0.0,
            ancillary: Vec::new(),
            invalidation: Invalidation::new(),
        }
    }

    pub fn types(&self) -> &EventTypeTable {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut EventTypeTable {
        &mut self.types
    }

    pub fn event_type_of(&self, event: &Event) -> Option<&Rc<EventType>> {
        self.types.get_by_id(event.type_id())
    }

    pub fn invalidation(&self) -> &Invalidation {
        &self.invalidation
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    pub fn is_inserting(&self) -> bool {
        self.inserting
    }

    pub fn begin_inserting_events(&mut self) {
        debug_assert!(!self.inserting, "nested insertion batch");
        self.inserting = true;
    }

    /// Inserts already-decoded arguments, given in schema order.
    pub fn insert(
        &mut self,
        type_id: EventTypeId,
        time: f64,
        args: Option<ArgumentValues>,
    ) -> Result<EventId> {
        let checked = self.check_insert(type_id, time).and_then(|event_type| {
            let actual = args.as_ref().map_or(0, Vec::len);
            if actual != event_type.args().len() {
                return Err(StoreError::ArgumentCount {
                    name: event_type.name().to_string(),
                    expected: event_type.args().len(),
                    actual,
                });
            }
            Ok(())
        });
        if let Err(e) = checked {
            tracing::warn!(type_id, time, error = %e, "dropping malformed event");
            return Err(e);
        }
        Ok(self.push_event(type_id, time, args))
    }

    /// Decodes `bytes` with the type's compiled decoder and inserts.
    pub fn insert_encoded(&mut self, type_id: EventTypeId, time: f64, bytes: &[u8]) -> Result<EventId> {
        let decoded = self.check_insert(type_id, time).and_then(|event_type| {
            event_type
                .decode_arguments(bytes)
                .map_err(|source| StoreError::Decode {
                    name: event_type.name().to_string(),
                    source,
                })
        });
        match decoded {
            Ok(values) => Ok(self.push_event(type_id, time, Some(values))),
            Err(e) => {
                tracing::warn!(type_id, time, error = %e, "dropping malformed event");
                Err(e)
            }
        }
    }

    fn check_insert(&self, type_id: EventTypeId, time: f64) -> Result<&Rc<EventType>> {
        if !self.inserting {
            return Err(StoreError::NotInserting);
        }
        if !time.is_finite() {
            return Err(StoreError::NonFiniteTime { time });
        }
        self.types
            .get_by_id(type_id)
            .ok_or(StoreError::UnknownEventType { type_id })
    }

    fn push_event(&mut self, type_id: EventTypeId, time: f64, args: Option<ArgumentValues>) -> EventId {
        let id = self.next_event_id;
        self.next_event_id += 1;
        let args = args.filter(|values| !values.is_empty()).map(ArgumentData::new);
        let index = self.route(time);
        if self.chunks[index].insert(Event::new(id, type_id, time, args)) {
            self.dirty_chunks.push(index);
        }
        id
    }

    /// Picks the chunk for an event at `time`: the tail unless the event is
    /// older than the tail's start, in which case the last chunk starting at
    /// or before it (or the head).
    fn route(&mut self, time: f64) -> usize {
        let Some(tail) = self.chunks.len().checked_sub(1) else {
            self.chunks.push(Chunk::new());
            return 0;
        };
        if time >= self.chunks[tail].time_start() {
            if self.chunks[tail].is_full(self.soft_cap) {
                self.chunks.push(Chunk::new());
                return tail + 1;
            }
            return tail;
        }
        self.chunks[..tail]
            .iter()
            .rposition(|chunk| time >= chunk.time_start())
            .unwrap_or(0)
    }

    pub fn end_inserting_events(&mut self) {
        debug_assert!(self.inserting, "end of batch without begin");
        if !self.inserting {
            return;
        }
        self.inserting = false;
        if self.dirty_chunks.is_empty() {
            return;
        }

        self.reconcile_changes();
        self.rescope();
        let indices = self.ancillary.clone();
        self.rebuild_ancillary_indices(&indices);
        self.invalidation.emit();

        tracing::debug!(
            events = self.count(),
            chunks = self.chunks.len(),
            max_depth = self.maximum_scope_depth,
            "ended insertion batch"
        );
    }

    fn reconcile_changes(&mut self) {
        let mut sorted = 0;
        for index in std::mem::take(&mut self.dirty_chunks) {
            if self.chunks[index].reconcile_insertion() {
                sorted += 1;
            }
        }
        self.chunks
            .sort_by(|a, b| a.time_start().total_cmp(&b.time_start()));

        let overlap = self.chunks.windows(2).position(|pair| {
            match (pair[0].last(), pair[1].first()) {
                (Some(last), Some(first)) => last.cmp_order(first) == Ordering::Greater,
                _ => false,
            }
        });
        if let Some(start) = overlap {
            self.rebalance_from(start);
        }
        let split = self.split_oversized();
        tracing::trace!(sorted, split, rebalanced = overlap.is_some(), "reconciled chunks");
    }

    /// Splits chunks that grew past the soft cap through out-of-order
    /// routing. Chunks are sorted here, so splitting keeps the global order.
    fn split_oversized(&mut self) -> usize {
        let soft_cap = self.soft_cap;
        if self.chunks.iter().all(|chunk| chunk.len() <= soft_cap) {
            return 0;
        }
        let mut split = 0;
        for mut chunk in std::mem::take(&mut self.chunks) {
            if chunk.len() <= soft_cap {
                self.chunks.push(chunk);
                continue;
            }
            split += 1;
            let events = chunk.take_events();
            self.push_runs(events);
        }
        split
    }

    /// Appends sorted `events` as chunks of at most `soft_cap` events.
    fn push_runs(&mut self, events: Vec<Event>) {
        let mut events = events.into_iter().peekable();
        while events.peek().is_some() {
            let run: Vec<Event> = events.by_ref().take(self.soft_cap).collect();
            self.chunks.push(Chunk::from_sorted(run));
        }
    }

    /// Merges every chunk from `start` on and splits the result back into
    /// chunks at the soft cap.
    fn rebalance_from(&mut self, start: usize) {
        let mut events: Vec<Event> = self
            .chunks
            .drain(start..)
            .flat_map(|mut chunk| chunk.take_events())
            .collect();
        events.sort_by(Event::cmp_order);
        let moved = events.len();
        self.push_runs(events);
        tracing::debug!(start, moved, chunks = self.chunks.len(), "rebalanced overlapping chunks");
    }

    fn event_at(&self, (chunk, index): Location) -> &Event {
        &self.chunks[chunk].acquire().events()[index]
    }

    fn event_at_mut(&mut self, (chunk, index): Location) -> &mut Event {
        &mut self.chunks[chunk].events_mut()[index]
    }

    fn builtin_id(&self, name: &str) -> Option<EventTypeId> {
        self.types.get_by_name(name).map(|t| t.id())
    }

    /// Pairs scope events with their leaves and derives durations, depths and
    /// parents. Runs over the whole store after every batch.
    fn rescope(&mut self) {
        let leave = self.builtin_id(builtin::SCOPE_LEAVE);
        let enter = self.builtin_id(builtin::SCOPE_ENTER);
        let timestamp = self.builtin_id(builtin::TIMESTAMP);

        let mut stack: Vec<OpenScope> = Vec::new();
        let mut hidden = 0;
        let mut max_depth = 0;
        self.locations.clear();
        self.locations.resize(self.next_event_id as usize, (0, 0));

        for chunk in 0..self.chunks.len() {
            for index in 0..self.chunks[chunk].len() {
                let location = (chunk, index);
                let parent = stack.last().map(|scope| scope.id);
                let depth = stack.len() as u32;

                let event = self.event_at_mut(location);
                event.reset_scope(parent, depth);
                let (id, time, type_id) = (event.id(), event.time(), event.type_id());
                self.locations[id as usize] = location;

                if Some(type_id) == leave {
                    hidden += 1;
                    if let Some(open) = stack.pop() {
                        let duration = time - open.time;
                        self.event_at_mut(open.location).set_scope(ScopeData {
                            end_time: time,
                            child_time: open.child_time,
                            system_time: open.system_time,
                        });
                        if let Some(parent) = stack.last_mut() {
                            parent.child_time += duration;
                            parent.system_time += if open.system {
                                duration
                            } else {
                                open.system_time
                            };
                        }
                    }
                    continue;
                }

                let Some(mut event_type) = self.types.get_by_id(type_id).cloned() else {
                    continue;
                };
                if Some(type_id) == enter || Some(type_id) == timestamp {
                    if let Some(named) = self.define_named_type(location, &event_type) {
                        self.event_at_mut(location).retype(named.id());
                        event_type = named;
                    }
                }

                let flags = event_type.flags();
                if flags.intersects(EventFlags::INTERNAL | EventFlags::BUILTIN | EventFlags::APPEND_SCOPE_DATA) {
                    hidden += 1;
                }
                if flags.contains(EventFlags::APPEND_SCOPE_DATA) {
                    if let Some(enclosing) = stack.last().map(|scope| scope.location) {
                        self.append_scope_data(location, enclosing, &event_type);
                    }
                }
                if event_type.is_scope() {
                    stack.push(OpenScope {
                        location,
                        id,
                        time,
                        system: flags.contains(EventFlags::SYSTEM_TIME),
                        child_time: 0.0,
                        system_time: 0.0,
                    });
                    max_depth = max_depth.max(stack.len() as u32);
                }
            }
        }

        self.hidden_count = hidden;
        self.maximum_scope_depth = max_depth;
        let first = self.chunks.first().and_then(Chunk::first);
        let last = self.chunks.last().and_then(Chunk::last);
        self.first_event_time = first.map_or(0.0, Event::time);
        self.last_event_time = last.map_or(0.0, |e| e.end_time().unwrap_or(e.time()));
    }

    /// `wtf.scope#enter(name)` and `wtf.trace#timeStamp(name)` become events
    /// of a type named by their argument.
    fn define_named_type(&mut self, location: Location, builtin_type: &EventType) -> Option<Rc<EventType>> {
        let name = self
            .event_at(location)
            .argument(builtin_type, "name")
            .and_then(ArgValue::as_str)
            .unwrap_or("unnamed")
            .to_string();
        let class = builtin_type.class();
        match self.types.define_type(&name, class, EventFlags::NONE, Vec::new()) {
            Ok(named) => Some(named),
            Err(e) => {
                tracing::warn!(name, error = %e, "failed to define named event type");
                None
            }
        }
    }

    fn append_scope_data(&mut self, from: Location, into: Location, event_type: &EventType) {
        let Some(args) = self.event_at_mut(from).take_arguments() else {
            return;
        };
        let target = self.event_at_mut(into);
        let target_type = target.type_id();
        let merged = target.arguments_mut();
        for (spec, value) in event_type.args().iter().zip(args.values()) {
            merged.append(&spec.name, value.clone());
        }
        if let Some(target_type) = self.types.get_by_id(target_type) {
            target_type.mark_appended_args();
        }
    }

    /// One scan of the store shared by every index in `indices`.
    fn rebuild_ancillary_indices(&self, indices: &[SharedIndex]) {
        if indices.is_empty() {
            return;
        }
        let mut handlers: HashMap<EventTypeId, Vec<(usize, usize, Rc<EventType>)>> = HashMap::new();
        for (n, index) in indices.iter().enumerate() {
            let watched = index.borrow_mut().begin_rebuild(&self.types);
            for (matched, event_type) in watched.into_iter().enumerate() {
                if let Some(event_type) = event_type {
                    handlers
                        .entry(event_type.id())
                        .or_default()
                        .push((n, matched, event_type));
                }
            }
        }
        if !handlers.is_empty() {
            for event in self.iter() {
                if let Some(targets) = handlers.get(&event.type_id()) {
                    for (n, matched, event_type) in targets {
                        indices[*n].borrow_mut().handle_event(*matched, event_type, event);
                    }
                }
            }
        }
        for index in indices {
            index.borrow_mut().end_rebuild(self.last_event_time);
        }
    }

    /// Adds an index and, if the store already holds events, rebuilds it.
    pub fn register_ancillary_index<T: AncillaryIndex + 'static>(&mut self, index: Rc<RefCell<T>>) {
        let index: SharedIndex = index;
        self.ancillary.push(index.clone());
        if self.count() > 0 && !self.inserting {
            self.rebuild_ancillary_indices(std::slice::from_ref(&index));
        }
    }

    pub fn unregister_ancillary_index<T: AncillaryIndex + 'static>(&mut self, index: &Rc<RefCell<T>>) {
        let target = Rc::as_ptr(index) as *const ();
        self.ancillary
            .retain(|registered| Rc::as_ptr(registered) as *const () != target);
    }

    pub fn ancillary_index_count(&self) -> usize {
        self.ancillary.len()
    }

    /// Index of the last chunk starting at or before `time`.
    fn chunk_index_near(&self, time: f64) -> Option<usize> {
        self.chunks
            .partition_point(|chunk| chunk.time_start() <= time)
            .checked_sub(1)
    }

    /// Latest event at or before `time` satisfying `predicate`.
    pub fn search(&self, time: f64, mut predicate: impl FnMut(&Event) -> bool) -> Option<&Event> {
        debug_assert!(self.dirty_chunks.is_empty(), "read during insertion batch");
        let start = self.chunk_index_near(time)?;
        for chunk in self.chunks[..=start].iter().rev() {
            let guard = chunk.acquire();
            let events = guard.events();
            let end = events.partition_point(|e| e.time() <= time);
            if let Some(found) = events[..end].iter().rev().find(|e| predicate(e)) {
                return Some(found);
            }
        }
        None
    }

    /// Calls `callback` for each event with `t0 <= time <= t1` until it breaks.
    pub fn for_each(&self, t0: f64, t1: f64, mut callback: impl FnMut(&Event) -> ControlFlow<()>) {
        for event in self.iter_range(t0, t1) {
            if callback(event).is_break() {
                return;
            }
        }
    }

    pub fn iter(&self) -> EventIter<'_> {
        self.iter_range(f64::NEG_INFINITY, f64::INFINITY)
    }

    pub fn iter_range(&self, t0: f64, t1: f64) -> EventIter<'_> {
        debug_assert!(self.dirty_chunks.is_empty(), "read during insertion batch");
        // Equal times may straddle a chunk boundary, so start from the first
        // chunk that ends at or after t0 rather than the last one starting
        // before it.
        let start = self.chunks.partition_point(|chunk| chunk.time_end() < t0);
        let mut iter = EventIter {
            chunks: &self.chunks,
            next_chunk: start,
            current: None,
            time_end: t1,
        };
        if let Some(chunk) = self.chunks.get(start) {
            let guard = chunk.acquire();
            let position = guard.events().partition_point(|e| e.time() < t0);
            iter.current = Some((guard, position));
            iter.next_chunk = start + 1;
        }
        iter
    }

    /// Innermost closed scope whose `[time, end_time]` contains `time`.
    pub fn find_enclosing_scope(&self, time: f64) -> Option<&Event> {
        let contains = |e: &Event| e.end_time().is_some_and(|end| end >= time);
        // A root-level event that does not contain `time` ends the walk, since
        // nothing before it can still be open.
        self.search(time, |e| e.depth() == 0 || contains(e))
            .filter(|e| contains(e))
    }

    /// Looks an event up by id. Valid between batches.
    pub fn get_event(&self, id: EventId) -> Option<&Event> {
        let (chunk, index) = *self.locations.get(usize::try_from(id).ok()?)?;
        self.chunks.get(chunk)?.acquire().events().get(index)
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Number of events held, hidden ones included.
    pub fn count(&self) -> usize {
        self.next_event_id as usize
    }

    /// Number of events a user would see: leaves, internal, builtin and
    /// append-scope-data events excluded.
    pub fn total_event_count(&self) -> usize {
        self.count() - self.hidden_count
    }

    pub fn first_event_time(&self) -> f64 {
        self.first_event_time
    }

    pub fn last_event_time(&self) -> f64 {
        self.last_event_time
    }

    pub fn maximum_scope_depth(&self) -> u32 {
        self.maximum_scope_depth
    }

    pub fn event_types_in_class(&self, class: EventClass) -> impl Iterator<Item = &Rc<EventType>> {
        self.types.get_all().iter().filter(move |t| t.class() == class)
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl fmt::Debug for EventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStore")
            .field("events", &self.count())
            .field("chunks", &self.chunks.len())
            .field("types", &self.types.len())
            .field("indices", &self.ancillary.len())
            .field("inserting", &self.inserting)
            .finish()
    }
}

/// Events in `(time, id)` order, acquiring each chunk while it is read.
pub struct EventIter<'a> {
    chunks: &'a [Chunk],
    next_chunk: usize,
    current: Option<(ChunkGuard<'a>, usize)>,
    time_end: f64,
}

impl<'a> Iterator for EventIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<&'a Event> {
        loop {
            if let Some((guard, position)) = &mut self.current {
                if let Some(event) = guard.events().get(*position) {
                    if event.time() > self.time_end {
                        self.current = None;
                        self.next_chunk = self.chunks.len();
                        return None;
                    }
                    *position += 1;
                    return Some(event);
                }
                self.current = None;
            }
            let chunk = self.chunks.get(self.next_chunk)?;
            self.next_chunk += 1;
            if chunk.time_start() > self.time_end {
                self.next_chunk = self.chunks.len();
                return None;
            }
            self.current = Some((chunk.acquire(), 0));
        }
    }
}
