// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Port the main thread tries first for its accept socket. When it is taken
/// the runtime keeps incrementing (wrapping past 0) until a free port is
/// found, and gives up after a full cycle.
pub const DEFAULT_ACCEPT_PORT: u16 = 50002;

/// Upper bound on a subsystem name.
pub const SUBSYSTEM_ID_SIZE: usize = 128;
/// Upper bound on an operation (function) name.
pub const FUNCTION_NAME_SIZE: usize = 256;
/// Upper bound on a wire thread-ID, `"subsystem@function"`.
pub const THREAD_ID_SIZE: usize = SUBSYSTEM_ID_SIZE + FUNCTION_NAME_SIZE;

/// Maximum number of subsystems a roster can hold.
pub const MAX_SUBSYSTEMS: usize = 16;

/// IPv4 dotted quads only, so at most 15 characters.
pub const IP_STR_LEN: usize = 15;

/// Conventional name of the subsystem that drives the bootstrap.
pub const TASK_PLANNER: &str = "TP";

/// Protocol-level result codes, as carried by the `#return` parameter of a
/// Return message. Negative values are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Success,
    Error,
    Disconnected,
    BufferOver,
    DoubleCreate,
    ExitedThread,
    NonConnection,
    NotUpdated,
    NoValue,
    FailToInit,
}

impl ReturnCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ReturnCode::Success       => 0,
            ReturnCode::Error         => -1,
            ReturnCode::Disconnected  => -2,
            ReturnCode::BufferOver    => -3,
            ReturnCode::DoubleCreate  => -4,
            ReturnCode::ExitedThread  => -5,
            ReturnCode::NonConnection => -6,
            ReturnCode::NotUpdated    => -7,
            ReturnCode::NoValue       => -8,
            ReturnCode::FailToInit    => -9,
        }
    }

    pub fn from_i32(value: i32) -> Option<ReturnCode> {
        match value {
            0  => Some(ReturnCode::Success),
            -1 => Some(ReturnCode::Error),
            -2 => Some(ReturnCode::Disconnected),
            -3 => Some(ReturnCode::BufferOver),
            -4 => Some(ReturnCode::DoubleCreate),
            -5 => Some(ReturnCode::ExitedThread),
            -6 => Some(ReturnCode::NonConnection),
            -7 => Some(ReturnCode::NotUpdated),
            -8 => Some(ReturnCode::NoValue),
            -9 => Some(ReturnCode::FailToInit),
            _  => None,
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        self.as_i32().fmt(formatter)
    }
}

/// Builds the wire thread-ID of an operation thread, checking the bounds on
/// both components.
pub fn thread_id(subsystem: &str, function: &str) -> Result<String> {
    if subsystem.len() >= SUBSYSTEM_ID_SIZE || function.len() >= FUNCTION_NAME_SIZE {
        return Err(Error::IdTooLong(format!("{}@{}", subsystem, function)));
    }

    Ok(format!("{}@{}", subsystem, function))
}

/// Wall-clock seconds since the unix epoch, the value written into `#time`.
pub(crate) fn now_seconds() -> f64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

#[derive(Clone)]
pub(crate) struct IdSequence {
    value: Rc<Cell<usize>>
}

impl IdSequence {
    pub fn new() -> IdSequence {
        IdSequence { value: Rc::new(Cell::new(0)) }
    }

    pub fn next(&self) -> usize {
        let id = self.value.get();

        self.value.set(id + 1);
        id
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        IdSequence::new()
    }
}
