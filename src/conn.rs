// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Per-thread collection of open sockets, keyed by the peer thread-ID.
//! A worker's first entry is the control connection to its own main thread.

use std::net::TcpStream;

use log::debug;
use mio::Token;

use crate::error::{Error, Result};
use crate::frame::write_cstring;
use crate::table::SubsystemTable;

pub(crate) struct Conn {
    pub id: String,
    pub token: Token,
    pub stream: TcpStream,
}

pub(crate) struct ConnSet {
    conns: Vec<Conn>,
}

impl ConnSet {
    pub fn new() -> ConnSet {
        ConnSet { conns: Vec::new() }
    }

    pub fn insert(&mut self, id: String, token: Token, stream: TcpStream) -> &mut Conn {
        self.conns.push(Conn { id, token, stream });
        let last = self.conns.len() - 1;

        &mut self.conns[last]
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.conns.iter().position(|conn| conn.id == id)
    }

    pub fn position_of_token(&self, token: Token) -> Option<usize> {
        self.conns.iter().position(|conn| conn.token == token)
    }

    pub fn at_mut(&mut self, index: usize) -> &mut Conn {
        &mut self.conns[index]
    }

    pub fn remove_at(&mut self, index: usize) -> Conn {
        self.conns.remove(index)
    }

    /// The control connection of a worker, when one exists.
    pub fn first_mut(&mut self) -> Option<&mut Conn> {
        self.conns.first_mut()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Conn> {
        self.conns.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Opens a connection to the main thread of `dst` and announces
    /// `self_id` so the remote accept loop can bind the socket to this
    /// thread.
    pub fn connect_to(
        &mut self,
        table: &SubsystemTable,
        self_id: &str,
        token: Token,
        dst: &str,
    ) -> Result<&mut Conn> {
        let info = table.find(dst).ok_or_else(|| Error::NoPeer(dst.to_owned()))?;
        let mut stream = TcpStream::connect((info.ip.as_str(), info.port))
            .map_err(|e| Error::ConnectError(dst.to_owned(), e))?;

        write_cstring(&mut stream, self_id)?;
        debug!("<{}> connected to <{}> ({}:{})", self_id, dst, info.ip, info.port);

        Ok(self.insert(dst.to_owned(), token, stream))
    }
}
