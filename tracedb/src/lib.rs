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

pub mod ancillary;
pub mod chunk;
pub mod config;
pub mod error;
pub mod event;
pub mod event_index;
pub mod event_type;
pub mod filter;
pub mod frame_list;
pub mod json_source;
pub mod mark_list;
pub mod statistics;
pub mod store;
pub mod time_range_list;

pub use ancillary::{AncillaryIndex, Invalidation};
pub use error::{Result, SourceError, StoreError};
pub use event::{ArgumentData, Event, EventId, ScopeData};
pub use event_index::EventIndex;
pub use event_type::{builtin, EventClass, EventFlags, EventType, EventTypeId, EventTypeTable};
pub use filter::{Filter, FilterError, FilterResult, FilterSyntaxError};
pub use frame_list::{Frame, FrameList};
pub use json_source::{load_json_file, load_json_str, LoadSummary};
pub use mark_list::{Mark, MarkList};
pub use statistics::{EventDataEntry, EventStatistics, SortMode, StatisticsTable};
pub use store::EventStore;
pub use time_range_list::{TimeRange, TimeRangeList};
