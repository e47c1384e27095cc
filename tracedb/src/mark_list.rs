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

use protocol::ArgValue;

use crate::ancillary::{AncillaryIndex, Invalidation};
use crate::event::{Event, EventId};
use crate::event_type::{builtin, EventType, EventTypeTable};

#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    event_id: EventId,
    name: String,
    value: ArgValue,
    time: f64,
    end_time: f64,
}

impl Mark {
    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &ArgValue {
        &self.value
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// The next mark's time, or the last event time for the final mark.
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.time
    }
}

/// Marks split the trace into named sections. A mark event carries no
/// duration; each mark lasts until the next one starts.
#[derive(Debug, Default)]
pub struct MarkList {
    marks: Vec<Mark>,
    invalidation: Invalidation,
}

impl MarkList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    pub fn get_count(&self) -> usize {
        self.marks.len()
    }

    pub fn get_all_marks(&self) -> &[Mark] {
        &self.marks
    }

    /// Mark whose `[time, end_time]` contains `time`.
    pub fn get_mark_at_time(&self, time: f64) -> Option<&Mark> {
        let index = self.marks.partition_point(|m| m.time <= time).checked_sub(1)?;
        let mark = &self.marks[index];
        (mark.end_time >= time).then_some(mark)
    }

    pub fn for_each_intersecting(&self, t0: f64, t1: f64, mut callback: impl FnMut(&Mark)) {
        let start = self
            .marks
            .partition_point(|m| m.time <= t0)
            .saturating_sub(1);
        for mark in &self.marks[start..] {
            if mark.time > t1 {
                break;
            }
            if mark.end_time < t0 {
                continue;
            }
            callback(mark);
        }
    }
}

impl AncillaryIndex for MarkList {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<Rc<EventType>>> {
        self.marks.clear();
        vec![types.get_by_name(builtin::MARK).cloned()]
    }

    fn handle_event(&mut self, _matched_index: usize, event_type: &EventType, event: &Event) {
        let name = event
            .argument(event_type, "name")
            .and_then(ArgValue::as_str)
            .unwrap_or_default();
        let value = event
            .argument(event_type, "value")
            .cloned()
            .unwrap_or(ArgValue::Null);
        self.marks.push(Mark {
            event_id: event.id(),
            name: name.to_string(),
            value,
            time: event.time(),
            end_time: f64::MAX,
        });
    }

    fn end_rebuild(&mut self, last_event_time: f64) {
        let next_times: Vec<f64> = self.marks.iter().skip(1).map(|m| m.time).collect();
        for (mark, end_time) in self.marks.iter_mut().zip(next_times) {
            mark.end_time = end_time;
        }
        if let Some(last) = self.marks.last_mut() {
            last.end_time = last_event_time;
        }
        self.invalidation.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_type::{EventClass, EventFlags};
    use crate::store::EventStore;
    use rstest::{fixture, rstest};
    use std::cell::RefCell;

    /// `(time, Some(mark name))` inserts a mark, `(time, None)` an unrelated
    /// instance event.
    fn insert_events(store: &mut EventStore, events: &[(f64, Option<&str>)]) {
        let mark = store.types().get_by_name(builtin::MARK).unwrap().id();
        let other = store
            .types_mut()
            .define_from_signature("someInstanceEvent", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();
        store.begin_inserting_events();
        for &(time, name) in events {
            match name {
                Some(name) => store
                    .insert(mark, time, Some(vec![name.into(), ArgValue::Null]))
                    .unwrap(),
                None => store.insert(other, time, None).unwrap(),
            };
        }
        store.end_inserting_events();
    }

    #[fixture]
    fn marks() -> (EventStore, Rc<RefCell<MarkList>>) {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(MarkList::new()));
        store.register_ancillary_index(list.clone());
        insert_events(
            &mut store,
            &[
                (0.0, None),
                (10.0, Some("a")),
                (20.0, None),
                (30.0, Some("b")),
                (40.0, None),
                (50.0, Some("c")),
                (60.0, None),
                (70.0, Some("d")),
                (80.0, None),
            ],
        );
        (store, list)
    }

    #[test]
    fn test_values_and_durations() {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(MarkList::new()));
        store.register_ancillary_index(list.clone());
        let mark = store.types().get_by_name(builtin::MARK).unwrap().id();
        let other = store
            .types_mut()
            .define_from_signature("someInstanceEvent", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();

        store.begin_inserting_events();
        store.insert(other, 0.0, None).unwrap();
        store.insert(mark, 10.0, Some(vec!["a".into(), "foo".into()])).unwrap();
        store.insert(other, 20.0, None).unwrap();
        store.insert(mark, 30.0, Some(vec!["b".into(), ArgValue::Int(7)])).unwrap();
        store.insert(other, 40.0, None).unwrap();
        store.end_inserting_events();

        let list = list.borrow();
        assert_eq!(list.get_count(), 2);
        let a = list.get_mark_at_time(10.0).unwrap();
        assert_eq!((a.name(), a.value()), ("a", &ArgValue::String("foo".into())));
        assert_eq!((a.time(), a.end_time(), a.duration()), (10.0, 30.0, 20.0));
        assert_eq!(a.event_id(), 1);
        let b = list.get_mark_at_time(30.0).unwrap();
        assert_eq!((b.name(), b.value()), ("b", &ArgValue::Int(7)));
        assert_eq!((b.time(), b.end_time(), b.duration()), (30.0, 40.0, 10.0));
        assert_eq!(list.get_all_marks(), &[a.clone(), b.clone()]);
    }

    #[rstest]
    #[case(0.0, None)]
    #[case(10.0, Some("a"))]
    #[case(11.0, Some("a"))]
    #[case(30.0, Some("b"))]
    #[case(70.0, Some("d"))]
    #[case(80.0, Some("d"))]
    #[case(1000.0, None)]
    fn test_mark_at_time(
        marks: (EventStore, Rc<RefCell<MarkList>>),
        #[case] time: f64,
        #[case] expected: Option<&str>,
    ) {
        let (_store, list) = marks;
        assert_eq!(list.borrow().get_mark_at_time(time).map(Mark::name), expected);
    }

    #[rstest]
    #[case(0.0, 1000.0, vec!["a", "b", "c", "d"])]
    #[case(0.0, 5.0, vec![])]
    #[case(40.0, 60.0, vec!["b", "c"])]
    #[case(80.0, 150.0, vec!["d"])]
    fn test_for_each_intersecting(
        marks: (EventStore, Rc<RefCell<MarkList>>),
        #[case] t0: f64,
        #[case] t1: f64,
        #[case] expected: Vec<&str>,
    ) {
        let (_store, list) = marks;
        let list = list.borrow();
        let mut seen = Vec::new();
        list.for_each_intersecting(t0, t1, |m| seen.push(m.name().to_string()));
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_incremental_batches() {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(MarkList::new()));
        store.register_ancillary_index(list.clone());

        insert_events(&mut store, &[(0.0, None), (10.0, Some("a")), (20.0, None)]);
        assert_eq!(list.borrow().get_count(), 1);
        assert_eq!(list.borrow().get_all_marks()[0].end_time(), 20.0);

        insert_events(&mut store, &[(30.0, Some("b")), (40.0, None)]);
        let list = list.borrow();
        assert_eq!(list.get_count(), 2);
        assert_eq!(list.get_all_marks()[0].end_time(), 30.0);
        assert_eq!(list.get_all_marks()[1].end_time(), 40.0);
    }

    #[test]
    fn test_no_marks() {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(MarkList::new()));
        store.register_ancillary_index(list.clone());
        insert_events(&mut store, &[(0.0, None), (20.0, None), (40.0, None)]);

        let list = list.borrow();
        assert_eq!(list.get_count(), 0);
        assert!(list.get_all_marks().is_empty());
        assert!(list.get_mark_at_time(20.0).is_none());
        let mut calls = 0;
        list.for_each_intersecting(0.0, 100.0, |_| calls += 1);
        assert_eq!(calls, 0);
    }
}
