// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Wire framing: an 8-digit lowercase-hex byte length, then that many
//! payload bytes, the last of which is the `\0` terminator. The payload may
//! be the concatenation of a primary message and a suffix fragment.
//!
//! A control socket multiplexes stop signals into the same stream: a `\0`
//! where the first length digit should be is the stop signal, consumed one
//! byte at a time until a real length prefix lines up again.

use std::io::{self, Read, Write};

use log::debug;

use crate::error::{Error, Result};

const LENGTH_PREFIX_SIZE: usize = 8;
const MAX_PAYLOAD: u64 = 0xffff_ffff;

const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Receive scratch space reused across messages. Grows only when an incoming
/// payload no longer fits.
pub(crate) struct RecvBuffer {
    data: Vec<u8>,
}

impl RecvBuffer {
    pub fn new() -> RecvBuffer {
        RecvBuffer { data: vec![0; DEFAULT_BUFFER_SIZE] }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    fn ensure(&mut self, len: usize) {
        if len > self.data.len() {
            debug!("recv buffer grows {} -> {}", self.data.len(), len);
            self.data.resize(len, 0);
        }
    }
}

/// One received frame, plus whether a stop signal was consumed on the way.
#[derive(Debug)]
pub(crate) struct Received {
    pub text: String,
    pub stopped: bool,
}

pub(crate) fn map_recv_err(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Disconnected(String::new())
    } else {
        Error::Io(err)
    }
}

/// Sends one framed message, `suffix` concatenated into the same frame.
pub(crate) fn send_frame<W: Write>(writer: &mut W, primary: &str, suffix: Option<&str>) -> Result<()> {
    let suffix = suffix.unwrap_or("");
    let total = primary.len() as u64 + suffix.len() as u64 + 1;

    if total > MAX_PAYLOAD {
        return Err(Error::BufferOver);
    }

    writer.write_all(format!("{:08x}", total).as_bytes())?;
    writer.write_all(primary.as_bytes())?;
    writer.write_all(suffix.as_bytes())?;
    writer.write_all(&[0])?;

    Ok(())
}

/// Reads one framed message, draining any stop-signal bytes in front of it.
pub(crate) fn recv_frame<R: Read>(reader: &mut R, buf: &mut RecvBuffer) -> Result<Received> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut stopped = false;

    reader.read_exact(&mut prefix).map_err(map_recv_err)?;
    while prefix[0] == 0 {
        stopped = true;
        prefix.copy_within(1.., 0);
        reader
            .read_exact(&mut prefix[LENGTH_PREFIX_SIZE - 1..])
            .map_err(map_recv_err)?;
    }

    let digits = std::str::from_utf8(&prefix).map_err(|_| Error::MalformedWire("length prefix is not ascii"))?;
    let len = usize::from_str_radix(digits, 16).map_err(|_| Error::MalformedWire("length prefix is not hex"))?;

    if len == 0 {
        return Err(Error::MalformedWire("empty frame"));
    }

    buf.ensure(len);
    reader.read_exact(&mut buf.data[..len]).map_err(map_recv_err)?;

    if buf.data[len - 1] != 0 {
        return Err(Error::MalformedWire("payload not terminated"));
    }

    let text = std::str::from_utf8(&buf.data[..len - 1])
        .map_err(|_| Error::MalformedWire("payload is not utf-8"))?
        .to_owned();

    Ok(Received { text, stopped })
}

/// Reads a NUL-terminated bootstrap line, at most `max` bytes including the
/// terminator.
pub(crate) fn read_cstring<R: Read>(reader: &mut R, max: usize) -> Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        reader.read_exact(&mut byte).map_err(map_recv_err)?;
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
        if bytes.len() >= max {
            return Err(Error::BufferOver);
        }
    }

    String::from_utf8(bytes).map_err(|_| Error::MalformedWire("bootstrap line is not utf-8"))
}

/// Writes a NUL-terminated bootstrap line.
pub(crate) fn write_cstring<W: Write>(writer: &mut W, line: &str) -> Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.write_all(&[0])?;

    Ok(())
}
