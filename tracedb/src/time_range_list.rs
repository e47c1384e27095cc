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
pub struct TimeRange {
    id: i64,
    begin_event_id: EventId,
    end_event_id: Option<EventId>,
    name: String,
    value: ArgValue,
    time: f64,
    end_time: f64,
    level: usize,
    overlap: usize,
}

impl TimeRange {
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn begin_event_id(&self) -> EventId {
        self.begin_event_id
    }

    pub fn end_event_id(&self) -> Option<EventId> {
        self.end_event_id
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

    /// Equal to `time` until the range's end arrives.
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.time
    }

    /// Display row: the lowest slot free when the range began.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Number of ranges still open when this one began.
    pub fn overlap(&self) -> usize {
        self.overlap
    }
}

#[derive(Debug, Default)]
struct RebuildState {
    ranges: Vec<TimeRange>,
    open: HashMap<i64, usize>,
    levels: Vec<Option<usize>>,
    overlap: usize,
}

/// Named, possibly nested intervals delimited by `timeRange#begin` and
/// `timeRange#end` events sharing an id.
#[derive(Debug, Default)]
pub struct TimeRangeList {
    ranges: Vec<TimeRange>,
    by_id: HashMap<i64, usize>,
    maximum_level: usize,
    state: RebuildState,
    invalidation: Invalidation,
}

impl TimeRangeList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidation_mut(&mut self) -> &mut Invalidation {
        &mut self.invalidation
    }

    pub fn get_count(&self) -> usize {
        self.ranges.len()
    }

    pub fn get_all_time_ranges(&self) -> &[TimeRange] {
        &self.ranges
    }

    /// Most recent range with the given id.
    pub fn get_time_range(&self, id: i64) -> Option<&TimeRange> {
        self.by_id.get(&id).map(|&i| &self.ranges[i])
    }

    pub fn maximum_level(&self) -> usize {
        self.maximum_level
    }

    pub fn get_time_ranges_at_time(&self, time: f64) -> Vec<&TimeRange> {
        let mut ranges = Vec::new();
        self.for_each_intersecting(time, time, |range| ranges.push(range));
        ranges
    }

    pub fn for_each_intersecting<'a>(&'a self, t0: f64, t1: f64, mut callback: impl FnMut(&'a TimeRange)) {
        if self.ranges.is_empty() {
            return;
        }
        let first_at = self.ranges.partition_point(|r| r.time < t0);
        let mut start = match self.ranges.get(first_at) {
            Some(range) if range.time == t0 => first_at,
            _ => first_at.saturating_sub(1),
        };
        // Ranges open when `start` began may still cover t0.
        while start > 0 && self.ranges[start].overlap > 0 {
            start -= 1;
        }
        for range in &self.ranges[start..] {
            if range.time > t1 {
                break;
            }
            if range.end_time >= t0 {
                callback(range);
            }
        }
    }

    fn begin(&mut self, id: i64, name: String, value: ArgValue, event: &Event) {
        let state = &mut self.state;
        let level = state
            .levels
            .iter()
            .position(Option::is_none)
            .unwrap_or(state.levels.len());
        if level == state.levels.len() {
            state.levels.push(None);
        }
        let index = state.ranges.len();
        state.levels[level] = Some(index);
        state.ranges.push(TimeRange {
            id,
            begin_event_id: event.id(),
            end_event_id: None,
            name,
            value,
            time: event.time(),
            end_time: event.time(),
            level,
            overlap: state.overlap,
        });
        state.overlap += 1;
        if state.open.insert(id, index).is_some() {
            tracing::trace!(id, "time range id reused before its end");
        }
    }

    fn end(&mut self, id: i64, event: &Event) {
        let state = &mut self.state;
        let Some(index) = state.open.remove(&id) else {
            return;
        };
        let range = &mut state.ranges[index];
        range.end_event_id = Some(event.id());
        range.end_time = event.time();
        if state.levels.get(range.level) == Some(&Some(index)) {
            state.levels[range.level] = None;
            state.overlap = state.overlap.saturating_sub(1);
        }
    }
}

impl AncillaryIndex for TimeRangeList {
    fn begin_rebuild(&mut self, types: &EventTypeTable) -> Vec<Option<Rc<EventType>>> {
        self.state = RebuildState::default();
        vec![
            types.get_by_name(builtin::TIME_RANGE_BEGIN).cloned(),
            types.get_by_name(builtin::TIME_RANGE_END).cloned(),
        ]
    }

    fn handle_event(&mut self, matched_index: usize, event_type: &EventType, event: &Event) {
        let Some(id) = event.argument(event_type, "id").and_then(ArgValue::as_i64) else {
            return;
        };
        if matched_index == 0 {
            let name = event
                .argument(event_type, "name")
                .and_then(ArgValue::as_str)
                .unwrap_or_default()
                .to_string();
            let value = event
                .argument(event_type, "value")
                .cloned()
                .unwrap_or(ArgValue::Null);
            self.begin(id, name, value, event);
        } else {
            self.end(id, event);
        }
    }

    fn end_rebuild(&mut self, _last_event_time: f64) {
        let state = std::mem::take(&mut self.state);
        self.maximum_level = state.levels.len();
        self.by_id = state
            .ranges
            .iter()
            .enumerate()
            .map(|(index, range)| (range.id, index))
            .collect();
        self.ranges = state.ranges;
        self.invalidation.emit();
    }
}
