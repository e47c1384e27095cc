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

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;

use protocol::{parse_signature, ArgDecoder, ArgSpec, ArgumentValues, DecodeError, Signature};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub type EventTypeId = u16;

/// Names of the event types every trace understands.
pub mod builtin {
    pub const SCOPE_ENTER: &str = "wtf.scope#enter";
    pub const SCOPE_LEAVE: &str = "wtf.scope#leave";
    pub const TIMESTAMP: &str = "wtf.trace#timeStamp";
    pub const MARK: &str = "wtf.trace#mark";
    pub const FRAME_START: &str = "wtf.timing#frameStart";
    pub const FRAME_END: &str = "wtf.timing#frameEnd";
    pub const TIME_RANGE_BEGIN: &str = "wtf.timeRange#begin";
    pub const TIME_RANGE_END: &str = "wtf.timeRange#end";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventClass {
    Instance,
    Scope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const NONE: EventFlags = EventFlags(0);
    pub const HIGH_FREQUENCY: EventFlags = EventFlags(1 << 1);
    /// Time spent in the event is not attributed to user code.
    pub const SYSTEM_TIME: EventFlags = EventFlags(1 << 2);
    pub const INTERNAL: EventFlags = EventFlags(1 << 3);
    /// Arguments are merged into the enclosing scope instead of kept.
    pub const APPEND_SCOPE_DATA: EventFlags = EventFlags(1 << 4);
    pub const BUILTIN: EventFlags = EventFlags(1 << 5);
    pub const APPEND_FLOW_DATA: EventFlags = EventFlags(1 << 6);

    pub const fn from_bits(bits: u32) -> Self {
        EventFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: EventFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: EventFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EventFlags {
    type Output = EventFlags;

    fn bitor(self, rhs: EventFlags) -> EventFlags {
        EventFlags(self.0 | rhs.0)
    }
}

pub struct EventType {
    id: EventTypeId,
    name: String,
    class: EventClass,
    flags: EventFlags,
    args: Vec<ArgSpec>,
    slots: HashMap<String, usize>,
    decoder: ArgDecoder,
    may_have_appended_args: Cell<bool>,
}

impl EventType {
    fn new(
        id: EventTypeId,
        name: String,
        class: EventClass,
        flags: EventFlags,
        args: Vec<ArgSpec>,
    ) -> Self {
        let slots = args
            .iter()
            .enumerate()
            .map(|(slot, arg)| (arg.name.clone(), slot))
            .collect();
        let decoder = ArgDecoder::compile(&args);
        EventType {
            id,
            name,
            class,
            flags,
            args,
            slots,
            decoder,
            may_have_appended_args: Cell::new(false),
        }
    }

    pub fn id(&self) -> EventTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> EventClass {
        self.class
    }

    pub fn is_scope(&self) -> bool {
        self.class == EventClass::Scope
    }

    pub fn flags(&self) -> EventFlags {
        self.flags
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn arg_slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    pub fn decode_arguments(&self, mut bytes: &[u8]) -> std::result::Result<ArgumentValues, DecodeError> {
        self.decoder.decode(&mut bytes)
    }

    /// Set once an append-scope-data event merged values into an event of
    /// this type.
    pub fn may_have_appended_args(&self) -> bool {
        self.may_have_appended_args.get()
    }

    pub(crate) fn mark_appended_args(&self) {
        self.may_have_appended_args.set(true);
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.class)
            .field("flags", &self.flags)
            .field("args", &self.args.len())
            .finish()
    }
}

/// Registry of event types, one per store.
#[derive(Debug, Default)]
pub struct EventTypeTable {
    types: Vec<Rc<EventType>>,
    by_name: HashMap<String, Rc<EventType>>,
    next_placeholder: u64,
}

impl EventTypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name`, or returns the existing type of that name unchanged.
    pub fn define_type(
        &mut self,
        name: &str,
        class: EventClass,
        flags: EventFlags,
        args: Vec<ArgSpec>,
    ) -> Result<Rc<EventType>> {
        if let Some(existing) = self.by_name.get(name) {
            return Ok(existing.clone());
        }

        // id 0 is reserved
        let id = EventTypeId::try_from(self.types.len() + 1)
            .map_err(|_| StoreError::TooManyEventTypes)?;
        let event_type = Rc::new(EventType::new(id, name.to_string(), class, flags, args));
        self.types.push(event_type.clone());
        self.by_name.insert(name.to_string(), event_type.clone());
        tracing::debug!(id, name, ?class, "defined event type");
        Ok(event_type)
    }

    /// Parses `signature` and defines the type. A signature that fails to
    /// parse yields an argument-less placeholder type so loading can go on.
    pub fn define_from_signature(
        &mut self,
        signature: &str,
        class: EventClass,
        flags: EventFlags,
    ) -> Result<Rc<EventType>> {
        let signature = match parse_signature(signature) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.next_placeholder += 1;
                tracing::warn!(signature, error = %e, "unparsable event signature");
                Signature::placeholder(self.next_placeholder)
            }
        };
        self.define_type(&signature.name, class, flags, signature.args)
    }

    pub fn define_builtins(&mut self) {
        let internal = EventFlags::INTERNAL;
        let builtins = [
            (
                "wtf.scope#leave",
                EventClass::Instance,
                EventFlags::BUILTIN | EventFlags::INTERNAL,
            ),
            ("wtf.scope#enter(ascii name)", EventClass::Scope, EventFlags::BUILTIN),
            ("wtf.trace#timeStamp(ascii name)", EventClass::Instance, EventFlags::BUILTIN),
            (
                "wtf.trace#mark(ascii name, utf8 value)",
                EventClass::Instance,
                EventFlags::BUILTIN | EventFlags::INTERNAL,
            ),
            ("wtf.timing#frameStart(uint32 number)", EventClass::Instance, internal),
            ("wtf.timing#frameEnd(uint32 number)", EventClass::Instance, internal),
            (
                "wtf.timeRange#begin(uint32 id, ascii name, utf8 value)",
                EventClass::Instance,
                internal,
            ),
            ("wtf.timeRange#end(uint32 id)", EventClass::Instance, internal),
        ];
        for (signature, class, flags) in builtins {
            if let Err(e) = self.define_from_signature(signature, class, flags) {
                tracing::warn!(signature, error = %e, "failed to define builtin event type");
            }
        }
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Rc<EventType>> {
        self.by_name.get(name)
    }

    pub fn get_by_id(&self, id: EventTypeId) -> Option<&Rc<EventType>> {
        let index = usize::from(id).checked_sub(1)?;
        self.types.get(index)
    }

    pub fn get_all(&self) -> &[Rc<EventType>] {
        &self.types
    }

    pub fn get_all_matching(&self, pattern: &Regex, class: Option<EventClass>) -> Vec<Rc<EventType>> {
        self.types
            .iter()
            .filter(|t| class.is_none_or(|c| t.class == c) && pattern.is_match(&t.name))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
