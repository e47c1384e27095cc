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

//! Event filter expressions: `typeQuery (argQuery)? [t0, t1]?`.

mod eval;
pub mod parser;

use std::ops::ControlFlow;
use std::rc::Rc;

use thiserror::Error;

use crate::event::Event;
use crate::event_type::{EventFlags, EventType, EventTypeTable};
use crate::store::EventStore;
use eval::CompiledFilter;
pub use parser::{parse, FilterExpr, FilterSyntaxError};

#[derive(Error, Debug)]
pub enum FilterError {
    #[error(transparent)]
    Syntax(#[from] FilterSyntaxError),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("unsupported regex flag '{0}'")]
    UnsupportedRegexFlag(char),

    #[error("unsupported operand: {0}")]
    UnsupportedOperand(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    Updated,
    Failed,
    NoChange,
}

/// A compiled filter. Inactive (matches everything) until a non-empty
/// expression is set.
#[derive(Debug, Default)]
pub struct Filter {
    source: String,
    compiled: Option<CompiledFilter>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `value` and swaps it in. A string that fails to parse or
    /// compile leaves the current filter in place.
    pub fn set_from_string(&mut self, value: &str) -> FilterResult {
        let value = value.trim();
        if self.source == value {
            return FilterResult::NoChange;
        }
        if value.is_empty() {
            return self.clear();
        }

        match parse(value)
            .map_err(FilterError::from)
            .and_then(CompiledFilter::compile)
        {
            Ok(compiled) => {
                self.source = value.to_string();
                self.compiled = Some(compiled);
                FilterResult::Updated
            }
            Err(e) => {
                tracing::debug!(filter = value, error = %e, "rejected filter expression");
                FilterResult::Failed
            }
        }
    }

    pub fn clear(&mut self) -> FilterResult {
        if self.compiled.is_none() {
            return FilterResult::NoChange;
        }
        self.source.clear();
        self.compiled = None;
        FilterResult::Updated
    }

    pub fn is_active(&self) -> bool {
        self.compiled.is_some()
    }

    /// The expression the active filter was compiled from, or `""`.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn time_range(&self) -> (f64, f64) {
        self.compiled
            .as_ref()
            .map_or((f64::NEG_INFINITY, f64::INFINITY), CompiledFilter::time_range)
    }

    pub fn has_argument_query(&self) -> bool {
        self.compiled
            .as_ref()
            .is_some_and(CompiledFilter::has_argument_query)
    }

    pub fn event_type_matches(&self, event_type: &EventType) -> bool {
        self.compiled
            .as_ref()
            .is_none_or(|compiled| compiled.type_matches(event_type))
    }

    /// Type, time window and argument clauses together.
    pub fn event_matches(&self, event_type: &EventType, event: &Event) -> bool {
        self.compiled
            .as_ref()
            .is_none_or(|compiled| compiled.event_matches(event_type, event))
    }

    /// Non-internal types accepted by the type query.
    pub fn get_matched_event_types(&self, types: &EventTypeTable) -> Vec<Rc<EventType>> {
        types
            .get_all()
            .iter()
            .filter(|t| !t.flags().contains(EventFlags::INTERNAL) && self.event_type_matches(t))
            .cloned()
            .collect()
    }

    /// Visits matching events inside the filter's time window in order.
    pub fn for_each_matching(&self, store: &EventStore, mut callback: impl FnMut(&Event) -> ControlFlow<()>) {
        let (t0, t1) = self.time_range();
        store.for_each(t0, t1, |event| match store.event_type_of(event) {
            Some(event_type) if self.event_matches(event_type, event) => callback(event),
            _ => ControlFlow::Continue(()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_type::EventClass;
    use rstest::rstest;

    #[test]
    fn test_set_from_string_results() {
        let mut filter = Filter::new();
        assert!(!filter.is_active());
        assert_eq!(filter.set_from_string(""), FilterResult::NoChange);
        assert_eq!(filter.set_from_string("  render "), FilterResult::Updated);
        assert_eq!(filter.source(), "render");
        assert_eq!(filter.set_from_string("render"), FilterResult::NoChange);

        assert_eq!(filter.set_from_string("render(frame >"), FilterResult::Failed);
        assert_eq!(filter.set_from_string("/x/q"), FilterResult::Failed);
        assert_eq!(filter.source(), "render");
        assert!(filter.is_active());

        assert_eq!(filter.set_from_string(""), FilterResult::Updated);
        assert!(!filter.is_active());
        assert_eq!(filter.clear(), FilterResult::NoChange);
    }

    #[test]
    fn test_inactive_matches_everything() {
        let mut types = EventTypeTable::new();
        let t = types
            .define_type("a#b", EventClass::Instance, EventFlags::NONE, Vec::new())
            .unwrap();
        let filter = Filter::new();
        assert!(filter.event_type_matches(&t));
        assert!(!filter.has_argument_query());
        assert_eq!(filter.time_range(), (f64::NEG_INFINITY, f64::INFINITY));
    }

    #[rstest]
    #[case("", vec!["app#render", "app#layout", "gc#collect"])]
    #[case("app", vec!["app#render", "app#layout"])]
    #[case("/^gc/", vec!["gc#collect"])]
    #[case("frame", vec![])]
    fn test_matched_event_types(#[case] query: &str, #[case] expected: Vec<&str>) {
        let mut types = EventTypeTable::new();
        for name in ["app#render", "app#layout", "gc#collect"] {
            types
                .define_type(name, EventClass::Scope, EventFlags::NONE, Vec::new())
                .unwrap();
        }
        types.define_builtins();

        let mut filter = Filter::new();
        filter.set_from_string(query);
        let names: Vec<String> = filter
            .get_matched_event_types(&types)
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        let builtins = ["wtf.scope#enter", "wtf.trace#timeStamp"];
        let names: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| !builtins.contains(n))
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_for_each_matching() {
        let mut store = EventStore::default();
        let click = store
            .types_mut()
            .define_from_signature("ui#click(int32 button)", EventClass::Instance, EventFlags::NONE)
            .unwrap()
            .id();
        store.begin_inserting_events();
        for (i, time) in [1.0, 2.0, 3.0, 4.0].into_iter().enumerate() {
            store.insert(click, time, Some(vec![(i as i64 % 2).into()])).unwrap();
        }
        store.end_inserting_events();

        let mut filter = Filter::new();
        assert_eq!(filter.set_from_string("click(button == 1) [0, 3.5]"), FilterResult::Updated);
        let mut times = Vec::new();
        filter.for_each_matching(&store, |e| {
            times.push(e.time());
            ControlFlow::Continue(())
        });
        assert_eq!(times, vec![2.0]);
    }
}
