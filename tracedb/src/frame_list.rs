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

use std::collections::HashMap;
use std::rc::Rc;

use protocol::ArgValue;

use crate::ancillary::{AncillaryIndex, Invalidation};
use crate::event::{Event, EventId};
use crate::event_type::{builtin, EventType, EventTypeTable};

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    number: i64,
    ordinal: usize,
    start_event_id: Option<EventId>,
    end_event_id: Option<EventId>,
    time: f64,
    end_time: f64,
}

impl Frame {
    fn new(number: i64) -> Self {
        Frame {
            number,
            ordinal: 0,
            start_event_id: None,
            end_event_id: None,
            time: 0.0,
            end_time: 0.0,
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    /// Position in the frame list.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn start_event_id(&self) -> Option<EventId> {
        self.start_event_id
    }

    pub fn end_event_id(&self) -> Option<EventId> {
        self.end_event_id
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.time
    }

    fn is_paired(&self) -> bool {
        self.start_event_id.is_some() && self.end_event_id.is_some()
    }
}

/// Frames delimited by `frameStart`/`frameEnd` pairs sharing a number.
#[derive(Debug, Default)]
pub struct FrameList {
    frames: Vec<Frame>,
    by_number: HashMap<i64, usize>,
    pending: Vec<Frame>,
    pending_by_number: HashMap<i64, usize>,
    invalidation: Invalidation,
}

impl FrameList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    pub fn get_count(&self) -> usize {
        self.frames.len()
    }

    pub fn get_all_frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn get_frame(&self, number: i64) -> Option<&Frame> {
        self.by_number.get(&number).map(|&i| &self.frames[i])
    }

    pub fn get_previous_frame(&self, frame: &Frame) -> Option<&Frame> {
        frame.ordinal.checked_sub(1).and_then(|i| self.frames.get(i))
    }

    pub fn get_next_frame(&self, frame: &Frame) -> Option<&Frame> {
        self.frames.get(frame.ordinal + 1)
    }

    /// Frame whose `[time, end_time]` contains `time`.
    pub fn get_frame_at_time(&self, time: f64) -> Option<&Frame> {
        let index = self.frames.partition_point(|f| f.time <= time).checked_sub(1)?;
        let frame = &self.frames[index];
        (frame.end_time >= time).then_some(frame)
    }

    /// The frames before and after `time`, for a time between frames.
    pub fn get_intra_frame_at_time(&self, time: f64) -> (Option<&Frame>, Option<&Frame>) {
        let next = self.frames.partition_point(|f| f.time <= time);
        let previous = next.checked_sub(1).and_then(|i| self.frames.get(i));
        (previous, self.frames.get(next))
    }

    pub fn for_each_intersecting(&self, t0: f64, t1: f64, mut callback: impl FnMut(&Frame)) {
        let start = self
            .frames
            .partition_point(|f| f.time <= t0)
            .saturating_sub(1);
        for frame in &self.frames[start..] {
            if frame.time > t1 {
                break;
            }
            if frame.end_time < t0 {
                continue;
            }
            callback(frame);
        }
    }

    fn pending_frame(&mut self, number: i64) -> &mut Frame {
        let index = *self.pending_by_number.entry(number).or_insert_with(|| {
            self.pending.push(Frame::new(number));
            self.pending.len() - 1
        });
        &mut self.pending[index]
    }
}

impl AncillaryIndex for FrameList {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<Rc<EventType>>> {
        self.pending.clear();
        self.pending_by_number.clear();
        vec![
            types.get_by_name(builtin::FRAME_START).cloned(),
            types.get_by_name(builtin::FRAME_END).cloned(),
        ]
    }

    fn handle_event(&mut self, matched_index: usize, event_type: &EventType, event: &Event) {
        let Some(number) = event.argument(event_type, "number").and_then(ArgValue::as_i64) else {
            tracing::trace!(id = event.id(), "frame event without a number");
            return;
        };
        let frame = self.pending_frame(number);
        match matched_index {
            0 => {
                frame.start_event_id = Some(event.id());
                frame.time = event.time();
            }
            _ => {
                frame.end_event_id = Some(event.id());
                frame.end_time = event.time();
            }
        }
    }

    fn end_rebuild(&mut self, _last_event_time: f64) {
        let mut frames: Vec<Frame> = self.pending.drain(..).filter(Frame::is_paired).collect();
        frames.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.by_number.clear();
        for (ordinal, frame) in frames.iter_mut().enumerate() {
            frame.ordinal = ordinal;
            self.by_number.insert(frame.number, ordinal);
        }
        self.frames = frames;
        self.pending_by_number.clear();
        self.invalidation.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;
    use rstest::{fixture, rstest};
    use std::cell::RefCell;

    fn insert_frames(store: &mut EventStore, frames: &[(u32, f64, f64)]) {
        let start = store.types().get_by_name(builtin::FRAME_START).unwrap().id();
        let end = store.types().get_by_name(builtin::FRAME_END).unwrap().id();
        store.begin_inserting_events();
        for &(number, t0, t1) in frames {
            store.insert(start, t0, Some(vec![number.into()])).unwrap();
            store.insert(end, t1, Some(vec![number.into()])).unwrap();
        }
        store.end_inserting_events();
    }

    #[fixture]
    fn frames() -> (EventStore, Rc<RefCell<FrameList>>) {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(FrameList::new()));
        store.register_ancillary_index(list.clone());
        insert_frames(&mut store, &[(0, 0.0, 10.0), (1, 16.0, 30.0), (2, 33.0, 40.0)]);
        (store, list)
    }

    #[rstest]
    fn test_pairing_and_ordinals(frames: (EventStore, Rc<RefCell<FrameList>>)) {
        let (_store, list) = frames;
        let list = list.borrow();
        assert_eq!(list.get_count(), 3);
        for (i, frame) in list.get_all_frames().iter().enumerate() {
            assert_eq!(frame.ordinal(), i);
            assert_eq!(frame.number(), i as i64);
        }
        let middle = list.get_frame(1).unwrap();
        assert_eq!(middle.duration(), 14.0);
        assert_eq!(list.get_previous_frame(middle).unwrap().number(), 0);
        assert_eq!(list.get_next_frame(middle).unwrap().number(), 2);
        assert!(list.get_next_frame(list.get_frame(2).unwrap()).is_none());
    }

    #[rstest]
    #[case(0.0, Some(0))]
    #[case(5.0, Some(0))]
    #[case(10.0, Some(0))]
    #[case(12.0, None)]
    #[case(30.0, Some(1))]
    #[case(-1.0, None)]
    #[case(41.0, None)]
    fn test_frame_at_time(
        frames: (EventStore, Rc<RefCell<FrameList>>),
        #[case] time: f64,
        #[case] expected: Option<i64>,
    ) {
        let (_store, list) = frames;
        assert_eq!(list.borrow().get_frame_at_time(time).map(Frame::number), expected);
    }

    #[rstest]
    fn test_intra_frame(frames: (EventStore, Rc<RefCell<FrameList>>)) {
        let (_store, list) = frames;
        let list = list.borrow();
        let numbers = |(a, b): (Option<&Frame>, Option<&Frame>)| (a.map(Frame::number), b.map(Frame::number));
        assert_eq!(numbers(list.get_intra_frame_at_time(12.0)), (Some(0), Some(1)));
        assert_eq!(numbers(list.get_intra_frame_at_time(-5.0)), (None, Some(0)));
        assert_eq!(numbers(list.get_intra_frame_at_time(50.0)), (Some(2), None));
    }

    #[rstest]
    #[case(0.0, 20.0, vec![0, 1])]
    #[case(11.0, 15.0, vec![])]
    #[case(12.0, 35.0, vec![1, 2])]
    #[case(-10.0, 100.0, vec![0, 1, 2])]
    fn test_for_each_intersecting(
        frames: (EventStore, Rc<RefCell<FrameList>>),
        #[case] t0: f64,
        #[case] t1: f64,
        #[case] expected: Vec<i64>,
    ) {
        let (_store, list) = frames;
        let mut seen = Vec::new();
        list.borrow().for_each_intersecting(t0, t1, |f| seen.push(f.number()));
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_unpaired_frames_are_dropped() {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(FrameList::new()));
        store.register_ancillary_index(list.clone());
        let start = store.types().get_by_name(builtin::FRAME_START).unwrap().id();

        insert_frames(&mut store, &[(4, 0.0, 5.0)]);
        store.begin_inserting_events();
        store.insert(start, 6.0, Some(vec![5u32.into()])).unwrap();
        store.end_inserting_events();
        assert_eq!(list.borrow().get_count(), 1);
        assert!(list.borrow().get_frame(5).is_none());

        // the end arrives in a later batch
        let end = store.types().get_by_name(builtin::FRAME_END).unwrap().id();
        store.begin_inserting_events();
        store.insert(end, 9.0, Some(vec![5u32.into()])).unwrap();
        store.end_inserting_events();
        let list = list.borrow();
        assert_eq!(list.get_count(), 2);
        assert_eq!(list.get_frame(5).unwrap().ordinal(), 1);
    }

    #[test]
    fn test_rebuild_emits_invalidation() {
        let mut store = EventStore::default();
        let list = Rc::new(RefCell::new(FrameList::new()));
        let calls = Rc::new(std::cell::Cell::new(0));
        {
            let calls = calls.clone();
            list.borrow_mut()
                .invalidation_mut()
                .subscribe(move || calls.set(calls.get() + 1));
        }
        store.register_ancillary_index(list.clone());
        insert_frames(&mut store, &[(0, 0.0, 1.0)]);
        insert_frames(&mut store, &[(1, 2.0, 3.0)]);
        assert_eq!(calls.get(), 2);
    }
}
