// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io;

use crate::global::ReturnCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside the runtime. Errors that travel back
/// over the wire are mapped onto a protocol [`ReturnCode`] by [`Error::code`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The remote end of a connection hung up. Carries the peer thread-ID
    /// when the owner of the connection is known.
    #[error("peer <{0}> disconnected")]
    Disconnected(String),

    #[error("message exceeds the wire length limit")]
    BufferOver,

    #[error("thread <{0}> is already running")]
    DoubleCreate(String),

    #[error("no open connection for <{0}>")]
    NonConnection(String),

    #[error("no value stored under <{0}>")]
    NoValue(String),

    #[error("subsystem <{0}> is not in the roster")]
    NoPeer(String),

    #[error("failed to connect to <{0}>: {1}")]
    ConnectError(String, io::Error),

    #[error("no operation <{0}> registered")]
    UnknownOperation(String),

    #[error("malformed parameter <{0}>")]
    MalformedParameter(String),

    #[error("malformed wire data: {0}")]
    MalformedWire(&'static str),

    #[error("shared-value table is full")]
    TableFull,

    #[error("roster already holds the maximum number of subsystems")]
    RosterFull,

    #[error("subsystem table is frozen")]
    TableFrozen,

    #[error("identifier too long: <{0}>")]
    IdTooLong(String),
}

impl Error {
    /// The protocol return code a requester sees when this error is reported
    /// through a Return message.
    pub fn code(&self) -> ReturnCode {
        match *self {
            Error::Disconnected(_)  => ReturnCode::Disconnected,
            Error::BufferOver       => ReturnCode::BufferOver,
            Error::DoubleCreate(_)  => ReturnCode::DoubleCreate,
            Error::NonConnection(_) => ReturnCode::NonConnection,
            Error::NoValue(_)       => ReturnCode::NoValue,
            _                       => ReturnCode::Error,
        }
    }
}
