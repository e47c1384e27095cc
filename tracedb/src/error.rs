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

use protocol::DecodeError;
use thiserror::Error;

use crate::event_type::EventTypeId;

/// A tuple rejected by the store. Nothing is mutated when this is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("insert outside of an insertion batch")]
    NotInserting,
    #[error("event time {time} is not finite")]
    NonFiniteTime { time: f64 },
    #[error("unknown event type id {type_id}")]
    UnknownEventType { type_id: EventTypeId },
    #[error("event type {name} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("failed to decode arguments for {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },
    #[error("event type table is full")]
    TooManyEventTypes,
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse trace json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported trace format version {0}")]
    UnsupportedVersion(u32),
    #[error("event references undefined type {0}")]
    UndefinedEvent(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}
