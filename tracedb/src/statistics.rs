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
use std::collections::HashMap;
use std::rc::Rc;

use crate::ancillary::Invalidation;
use crate::event::Event;
use crate::event_type::{EventClass, EventFlags, EventType, EventTypeId};
use crate::filter::Filter;
use crate::store::EventStore;

/// Buckets of the user-duration distribution, one per whole time unit; the
/// last bucket collects everything longer.
pub const BUCKET_COUNT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Any,
    Count,
    TotalTime,
    MeanTime,
    OwnTime,
}

#[derive(Debug, Clone)]
pub struct InstanceEventDataEntry {
    event_type: Rc<EventType>,
    count: usize,
}

impl InstanceEventDataEntry {
    pub fn event_type(&self) -> &Rc<EventType> {
        &self.event_type
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug, Clone)]
pub struct ScopeEventDataEntry {
    event_type: Rc<EventType>,
    count: usize,
    total_time: f64,
    own_time: f64,
    user_time: f64,
    buckets: Vec<u32>,
}

impl ScopeEventDataEntry {
    fn new(event_type: Rc<EventType>) -> Self {
        ScopeEventDataEntry {
            event_type,
            count: 0,
            total_time: 0.0,
            own_time: 0.0,
            user_time: 0.0,
            buckets: vec![0; BUCKET_COUNT],
        }
    }

    pub fn event_type(&self) -> &Rc<EventType> {
        &self.event_type
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Total time minus the total time of direct children.
    pub fn own_time(&self) -> f64 {
        self.own_time
    }

    /// Total time minus nested system time.
    pub fn user_time(&self) -> f64 {
        self.user_time
    }

    pub fn mean_time(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        if self.event_type.flags().contains(EventFlags::SYSTEM_TIME) {
            self.total_time / self.count as f64
        } else {
            self.user_time / self.count as f64
        }
    }

    pub fn buckets(&self) -> &[u32] {
        &self.buckets
    }

    /// Only scopes whose leave has arrived are counted.
    fn append_event(&mut self, event: &Event) -> bool {
        let (Some(total), Some(own), Some(user)) = (
            event.total_duration(),
            event.own_duration(),
            event.user_duration(),
        ) else {
            return false;
        };
        self.count += 1;
        self.total_time += total;
        self.own_time += own;
        self.user_time += user;
        let bucket = (user.max(0.0).round() as usize).min(BUCKET_COUNT - 1);
        self.buckets[bucket] += 1;
        true
    }
}

#[derive(Debug, Clone)]
pub enum EventDataEntry {
    Scope(ScopeEventDataEntry),
    Instance(InstanceEventDataEntry),
}

impl EventDataEntry {
    fn new(event_type: Rc<EventType>) -> Self {
        match event_type.class() {
            EventClass::Scope => EventDataEntry::Scope(ScopeEventDataEntry::new(event_type)),
            EventClass::Instance => EventDataEntry::Instance(InstanceEventDataEntry {
                event_type,
                count: 0,
            }),
        }
    }

    pub fn event_type(&self) -> &Rc<EventType> {
        match self {
            EventDataEntry::Scope(entry) => &entry.event_type,
            EventDataEntry::Instance(entry) => &entry.event_type,
        }
    }

    pub fn count(&self) -> usize {
        match self {
            EventDataEntry::Scope(entry) => entry.count,
            EventDataEntry::Instance(entry) => entry.count,
        }
    }

    pub fn as_scope(&self) -> Option<&ScopeEventDataEntry> {
        match self {
            EventDataEntry::Scope(entry) => Some(entry),
            EventDataEntry::Instance(_) => None,
        }
    }

    fn append_event(&mut self, event: &Event) -> bool {
        match self {
            EventDataEntry::Scope(entry) => entry.append_event(event),
            EventDataEntry::Instance(entry) => {
                entry.count += 1;
                true
            }
        }
    }
}

/// Time-based orderings put scopes first, by the metric descending, then
/// instances by count.
fn compare_entries(sort: SortMode, a: &EventDataEntry, b: &EventDataEntry) -> Ordering {
    let metric: fn(&ScopeEventDataEntry) -> f64 = match sort {
        SortMode::Any => return Ordering::Equal,
        SortMode::Count => return b.count().cmp(&a.count()),
        SortMode::TotalTime => ScopeEventDataEntry::total_time,
        SortMode::MeanTime => ScopeEventDataEntry::mean_time,
        SortMode::OwnTime => ScopeEventDataEntry::own_time,
    };
    match (a.as_scope(), b.as_scope()) {
        (Some(a), Some(b)) => metric(b).total_cmp(&metric(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.count().cmp(&a.count()),
    }
}

/// Per-type aggregates over a time window.
#[derive(Debug)]
pub struct StatisticsTable {
    time_start: f64,
    time_end: f64,
    event_count: usize,
    entries: Vec<EventDataEntry>,
    by_name: HashMap<String, usize>,
    invalidation: Invalidation,
}

impl StatisticsTable {
    pub fn new(time_start: f64, time_end: f64) -> Self {
        StatisticsTable {
            time_start,
            time_end,
            event_count: 0,
            entries: Vec::new(),
            by_name: HashMap::new(),
            invalidation: Invalidation::new(),
        }
    }

    pub fn build(store: &EventStore, time_start: f64, time_end: f64, filter: Option<&Filter>) -> Self {
        let mut table = StatisticsTable::new(time_start, time_end);
        table.rebuild(store, filter);
        table
    }

    pub fn time_start(&self) -> f64 {
        self.time_start
    }

    pub fn time_end(&self) -> f64 {
        self.time_end
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    /// Rescans the window. A filter's type query prunes types, its argument
    /// query prunes events and its time range narrows the window.
    pub fn rebuild(&mut self, store: &EventStore, filter: Option<&Filter>) {
        let (mut t0, mut t1) = (self.time_start, self.time_end);
        if let Some((start, end)) = filter.map(Filter::time_range) {
            t0 = t0.max(start);
            t1 = t1.min(end);
        }
        let check_args = filter.is_some_and(Filter::has_argument_query);

        self.entries.clear();
        self.event_count = 0;
        let mut slots: HashMap<EventTypeId, Option<usize>> = HashMap::new();
        for event in store.iter_range(t0, t1) {
            let entries = &mut self.entries;
            let slot = *slots.entry(event.type_id()).or_insert_with(|| {
                let event_type = store.event_type_of(event)?;
                if event_type
                    .flags()
                    .intersects(EventFlags::INTERNAL | EventFlags::BUILTIN)
                {
                    return None;
                }
                if filter.is_some_and(|f| !f.event_type_matches(event_type)) {
                    return None;
                }
                entries.push(EventDataEntry::new(event_type.clone()));
                Some(entries.len() - 1)
            });
            let Some(index) = slot else {
                continue;
            };
            let entry = &mut self.entries[index];
            if check_args && !filter.is_some_and(|f| f.event_matches(entry.event_type(), event)) {
                continue;
            }
            if entry.append_event(event) {
                self.event_count += 1;
            }
        }

        self.entries.retain(|entry| entry.count() > 0);
        self.reindex();
        tracing::debug!(
            entries = self.entries.len(),
            events = self.event_count,
            t0,
            t1,
            "rebuilt statistics table"
        );
        self.invalidation.emit();
    }

    fn reindex(&mut self) {
        self.by_name = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.event_type().name().to_string(), i))
            .collect();
    }

    pub fn get_event_count(&self) -> usize {
        self.event_count
    }

    pub fn get_entries(&self) -> &[EventDataEntry] {
        &self.entries
    }

    pub fn get_event_type_entry(&self, name: &str) -> Option<&EventDataEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn get_entries_by_class(&self, class: EventClass) -> Vec<&EventDataEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.event_type().class() == class)
            .collect()
    }

    pub fn for_each(&self, sort: SortMode, mut callback: impl FnMut(&EventDataEntry)) {
        let mut entries: Vec<&EventDataEntry> = self.entries.iter().collect();
        if sort != SortMode::Any {
            entries.sort_by(|a, b| compare_entries(sort, a, b));
        }
        for entry in entries {
            callback(entry);
        }
    }

    /// A table narrowed by `filter`. Type-only filters reuse this table's
    /// entries; anything touching arguments or time rescans the store.
    pub fn filter(&self, store: &EventStore, filter: &Filter) -> StatisticsTable {
        let (start, end) = filter.time_range();
        let covers_window = start <= self.time_start && end >= self.time_end;
        if filter.has_argument_query() || !covers_window {
            return StatisticsTable::build(store, self.time_start, self.time_end, Some(filter));
        }

        let mut table = StatisticsTable::new(self.time_start, self.time_end);
        table.entries = self
            .entries
            .iter()
            .filter(|entry| filter.event_type_matches(entry.event_type()))
            .cloned()
            .collect();
        table.event_count = table.entries.iter().map(EventDataEntry::count).sum();
        table.reindex();
        table
    }
}

/// Caches the full-range table and the most recent selected-range table,
/// dropping both whenever the store changes.
#[derive(Debug, Default)]
pub struct EventStatistics {
    generation: Option<u64>,
    full: Option<StatisticsTable>,
    selected: Option<StatisticsTable>,
}

impl EventStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_table(&mut self, store: &EventStore, time_start: f64, time_end: f64) -> &StatisticsTable {
        let generation = store.invalidation().generation();
        if self.generation != Some(generation) {
            self.generation = Some(generation);
            self.full = None;
            self.selected = None;
        }

        if time_start <= store.first_event_time() && time_end >= store.last_event_time() {
            return self.full.get_or_insert_with(|| {
                StatisticsTable::build(store, f64::NEG_INFINITY, f64::INFINITY, None)
            });
        }

        let reusable = self
            .selected
            .as_ref()
            .is_some_and(|t| t.time_start == time_start && t.time_end == time_end);
        if !reusable {
            self.selected = Some(StatisticsTable::build(store, time_start, time_end, None));
        }
        self.selected
            .get_or_insert_with(|| StatisticsTable::build(store, time_start, time_end, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::event_type::builtin;
    use protocol::ArgValue;
    use rstest::{fixture, rstest};

    struct Fixture {
        store: EventStore,
    }

    #[fixture]
    fn populated() -> Fixture {
        let mut store = EventStore::new(StoreConfig::builder().chunk_soft_cap(8).build());
        let types = store.types_mut();
        let render = types
            .define_from_signature("app#render(uint32 frame)", EventClass::Scope, EventFlags::NONE)
            .unwrap()
            .id();
        let layout = types
            .define_from_signature("app#layout", EventClass::Scope, EventFlags::NONE)
            .unwrap()
            .id();
        let gc = types
            .define_from_signature("sys#gc", EventClass::Scope, EventFlags::SYSTEM_TIME)
            .unwrap()
            .id();
        let click = types
            .define_from_signature("app#click(ascii button)", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();
        let leave = store.types().get_by_name(builtin::SCOPE_LEAVE).unwrap().id();
        let frame_start = store.types().get_by_name(builtin::FRAME_START).unwrap().id();

        store.begin_inserting_events();
        for frame in 0..4u32 {
            let t = frame as f64 * 100.0;
            store.insert(frame_start, t, Some(vec![frame.into()])).unwrap();
            // render[t, t+40] { layout[t+5, t+15], gc[t+20, t+30] }
            store.insert(render, t, Some(vec![frame.into()])).unwrap();
            store.insert(layout, t + 5.0, None).unwrap();
            store.insert(leave, t + 15.0, None).unwrap();
            store.insert(gc, t + 20.0, None).unwrap();
            store.insert(leave, t + 30.0, None).unwrap();
            store.insert(leave, t + 40.0, None).unwrap();
            store.insert(click, t + 50.0, Some(vec!["left".into()])).unwrap();
        }
        // still open at the end of the trace
        store.insert(render, 500.0, Some(vec![ArgValue::Int(9)])).unwrap();
        store.end_inserting_events();
        Fixture { store }
    }

    fn scope<'a>(table: &'a StatisticsTable, name: &str) -> &'a ScopeEventDataEntry {
        table.get_event_type_entry(name).and_then(EventDataEntry::as_scope).unwrap()
    }

    #[rstest]
    fn test_full_table(populated: Fixture) {
        let table = StatisticsTable::build(&populated.store, f64::NEG_INFINITY, f64::INFINITY, None);
        let render = scope(&table, "app#render");
        assert_eq!(render.count(), 4);
        assert_eq!(render.total_time(), 160.0);
        assert_eq!(render.own_time(), 80.0);
        assert_eq!(render.user_time(), 120.0);
        assert_eq!(render.mean_time(), 30.0);
        assert_eq!(render.buckets()[30], 4);

        let gc = scope(&table, "sys#gc");
        assert_eq!(gc.mean_time(), 10.0);
        assert_eq!(table.get_event_type_entry("app#click").unwrap().count(), 4);
        assert!(table.get_event_type_entry(builtin::FRAME_START).is_none());
        assert!(table.get_event_type_entry(builtin::SCOPE_LEAVE).is_none());
        assert_eq!(table.get_event_count(), 16);
        assert_eq!(table.get_entries_by_class(EventClass::Instance).len(), 1);
    }

    #[rstest]
    fn test_rebuild_is_idempotent(populated: Fixture) {
        let mut table = StatisticsTable::new(0.0, 250.0);
        table.rebuild(&populated.store, None);
        let first: Vec<(String, usize)> = table
            .get_entries()
            .iter()
            .map(|e| (e.event_type().name().to_string(), e.count()))
            .collect();
        table.rebuild(&populated.store, None);
        let second: Vec<(String, usize)> = table
            .get_entries()
            .iter()
            .map(|e| (e.event_type().name().to_string(), e.count()))
            .collect();
        assert_eq!(first, second);
        assert_eq!(scope(&table, "app#render").count(), 3);
    }

    /// Each sort mode ranks these types differently:
    ///
    /// | type     | count | total | own | mean |
    /// |----------|-------|-------|-----|------|
    /// | a#long   | 1     | 100   | 30  | 100  |
    /// | a#inner  | 2     | 70    | 70  | 35   |
    /// | a#short  | 5     | 50    | 50  | 10   |
    /// | a#tick   | 7     |       |     |      |
    #[fixture]
    fn ranked() -> Fixture {
        let mut store = EventStore::new(StoreConfig::builder().chunk_soft_cap(8).build());
        let types = store.types_mut();
        let long = types
            .define_from_signature("a#long", EventClass::Scope, EventFlags::NONE)
            .unwrap()
            .id();
        let inner = types
            .define_from_signature("a#inner", EventClass::Scope, EventFlags::NONE)
            .unwrap()
            .id();
        let short = types
            .define_from_signature("a#short", EventClass::Scope, EventFlags::NONE)
            .unwrap()
            .id();
        let tick = types
            .define_from_signature("a#tick", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();
        let leave = store.types().get_by_name(builtin::SCOPE_LEAVE).unwrap().id();

        store.begin_inserting_events();
        // long[0, 100] { inner[10, 50], inner[60, 90] }
        store.insert(long, 0.0, None).unwrap();
        store.insert(inner, 10.0, None).unwrap();
        store.insert(leave, 50.0, None).unwrap();
        store.insert(inner, 60.0, None).unwrap();
        store.insert(leave, 90.0, None).unwrap();
        store.insert(leave, 100.0, None).unwrap();
        for i in 0..5 {
            let t = 200.0 + i as f64 * 20.0;
            store.insert(short, t, None).unwrap();
            store.insert(leave, t + 10.0, None).unwrap();
        }
        for i in 0..7 {
            store.insert(tick, 400.0 + i as f64, None).unwrap();
        }
        store.end_inserting_events();
        Fixture { store }
    }

    #[rstest]
    fn test_ranked_metrics(ranked: Fixture) {
        let table = StatisticsTable::build(&ranked.store, f64::NEG_INFINITY, f64::INFINITY, None);
        let metrics = |name: &str| {
            let entry = scope(&table, name);
            (entry.count(), entry.total_time(), entry.own_time(), entry.mean_time())
        };
        assert_eq!(metrics("a#long"), (1, 100.0, 30.0, 100.0));
        assert_eq!(metrics("a#inner"), (2, 70.0, 70.0, 35.0));
        assert_eq!(metrics("a#short"), (5, 50.0, 50.0, 10.0));
    }

    #[rstest]
    #[case(SortMode::Count, vec!["a#tick", "a#short", "a#inner", "a#long"])]
    #[case(SortMode::TotalTime, vec!["a#long", "a#inner", "a#short", "a#tick"])]
    #[case(SortMode::OwnTime, vec!["a#inner", "a#short", "a#long", "a#tick"])]
    #[case(SortMode::MeanTime, vec!["a#long", "a#inner", "a#short", "a#tick"])]
    fn test_sorting(ranked: Fixture, #[case] sort: SortMode, #[case] expected: Vec<&str>) {
        let table = StatisticsTable::build(&ranked.store, f64::NEG_INFINITY, f64::INFINITY, None);
        let mut names = Vec::new();
        table.for_each(sort, |e| names.push(e.event_type().name().to_string()));
        assert_eq!(names, expected);
    }

    #[test]
    fn test_window_counts_equal_times_across_chunks() {
        let mut store = EventStore::new(StoreConfig::builder().chunk_soft_cap(4).build());
        let tick = store
            .types_mut()
            .define_from_signature("a#tick", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();
        store.begin_inserting_events();
        for time in [0.0, 1.0, 2.0, 3.0, 3.0, 4.0, 5.0, 6.0] {
            store.insert(tick, time, None).unwrap();
        }
        store.end_inserting_events();

        let table = StatisticsTable::build(&store, 3.0, 10.0, None);
        assert_eq!(table.get_event_count(), 5);
        assert_eq!(table.get_event_type_entry("a#tick").unwrap().count(), 5);
    }

    #[rstest]
    fn test_sorting_any_keeps_table_order(ranked: Fixture) {
        let table = StatisticsTable::build(&ranked.store, f64::NEG_INFINITY, f64::INFINITY, None);
        let mut names = Vec::new();
        table.for_each(SortMode::Any, |e| names.push(e.event_type().name().to_string()));
        let stored: Vec<String> = table
            .get_entries()
            .iter()
            .map(|e| e.event_type().name().to_string())
            .collect();
        assert_eq!(names, stored);
    }

    #[rstest]
    fn test_filter_fast_path_and_rescan(populated: Fixture) {
        let table = StatisticsTable::build(&populated.store, f64::NEG_INFINITY, f64::INFINITY, None);

        let mut by_type = Filter::new();
        by_type.set_from_string("app#");
        let narrowed = table.filter(&populated.store, &by_type);
        assert!(narrowed.get_event_type_entry("sys#gc").is_none());
        assert_eq!(narrowed.get_event_count(), 12);

        let mut by_args = Filter::new();
        by_args.set_from_string("render(frame >= 2)");
        let rescanned = table.filter(&populated.store, &by_args);
        assert_eq!(rescanned.get_entries().len(), 1);
        assert_eq!(scope(&rescanned, "app#render").count(), 2);
    }

    #[rstest]
    fn test_event_statistics_cache(mut populated: Fixture) {
        let mut stats = EventStatistics::new();
        let full = stats.get_table(&populated.store, f64::NEG_INFINITY, f64::INFINITY);
        assert_eq!(scope(full, "app#render").count(), 4);
        let part = stats.get_table(&populated.store, 0.0, 150.0);
        assert_eq!(scope(part, "app#render").count(), 2);

        let render = populated.store.types().get_by_name("app#render").unwrap().id();
        let leave = populated.store.types().get_by_name(builtin::SCOPE_LEAVE).unwrap().id();
        populated.store.begin_inserting_events();
        populated.store.insert(leave, 520.0, None).unwrap();
        populated.store.insert(render, 600.0, Some(vec![ArgValue::Int(10)])).unwrap();
        populated.store.insert(leave, 610.0, None).unwrap();
        populated.store.end_inserting_events();

        let full = stats.get_table(&populated.store, f64::NEG_INFINITY, f64::INFINITY);
        assert_eq!(scope(full, "app#render").count(), 6);
    }
}
