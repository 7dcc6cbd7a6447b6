// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The main-thread side of the runtime: process startup, the bootstrap
//! roster exchange, and the dispatcher loop that owns the shared-value
//! store and the join queues.
//!
//! A Task Planner calls [`Runtime::startup`], [`Runtime::accept_connection`]
//! and then [`Runtime::run`]; every other subsystem calls
//! [`Runtime::startup`], [`Runtime::make_connection`] and [`Runtime::run`].

use std::collections::{HashSet, VecDeque};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

use crate::conn::{Conn, ConnSet};
use crate::error::{Error, Result};
use crate::frame::{self, RecvBuffer};
use crate::global::{self, IdSequence, ReturnCode};
use crate::global::{DEFAULT_ACCEPT_PORT, IP_STR_LEN, SUBSYSTEM_ID_SIZE, TASK_PLANNER, THREAD_ID_SIZE};
use crate::join::{JoinQueue, Rendezvous};
use crate::message::{Message, MessageType};
use crate::operation::{OperationFn, Operations};
use crate::store::ValueStore;
use crate::table::{self, SubsystemInfo, SubsystemTable};
use crate::worker::{self, Worker};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Main-thread state of one subsystem process.
pub struct Runtime {
    table: Arc<SubsystemTable>,
    listener: TcpListener,
    accept_port: u16,
    accept_token: Token,
    poll: Poll,
    events: Events,
    tokens: IdSequence,
    conns: ConnSet,
    store: ValueStore,
    queue: JoinQueue,
    live_ops: HashSet<String>,
    pending: VecDeque<Token>,
    buf: RecvBuffer,
}

/// Binds the accept socket, walking up from the default port until a free
/// one is found and giving up after a full wrap-around.
fn create_accept_socket() -> Result<(TcpListener, u16)> {
    let mut port = DEFAULT_ACCEPT_PORT;

    loop {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(listener) => return Ok((listener, port)),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                port = port.wrapping_add(1);
                if port == DEFAULT_ACCEPT_PORT {
                    return Err(Error::Io(e));
                }
                if port == 0 {
                    port = 1;
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

impl Runtime {
    /// Initialises the main thread: accept socket, readiness poll and the
    /// roster seeded with this process itself. Must be called exactly once,
    /// before any other runtime API.
    pub fn startup(subsystem_name: &str) -> Result<Runtime> {
        if subsystem_name.is_empty() || subsystem_name.len() >= SUBSYSTEM_ID_SIZE {
            return Err(Error::IdTooLong(subsystem_name.to_owned()));
        }

        let (listener, accept_port) = create_accept_socket()?;
        let poll = Poll::new()?;
        let tokens = IdSequence::new();
        let accept_token = Token(tokens.next());

        poll.registry()
            .register(&mut SourceFd(&listener.as_raw_fd()), accept_token, Interest::READABLE)?;

        let own = SubsystemInfo {
            id: subsystem_name.to_owned(),
            ip: "127.0.0.1".to_owned(),
            port: accept_port,
        };

        info!("<{}> main thread up, accept socket on port {}", subsystem_name, accept_port);

        Ok(Runtime {
            table: Arc::new(SubsystemTable::new(own)),
            listener,
            accept_port,
            accept_token,
            poll,
            events: Events::with_capacity(64),
            tokens,
            conns: ConnSet::new(),
            store: ValueStore::new(),
            queue: JoinQueue::new(),
            live_ops: HashSet::new(),
            pending: VecDeque::new(),
            buf: RecvBuffer::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.table.self_info().id
    }

    pub fn accept_port(&self) -> u16 {
        self.accept_port
    }

    pub fn table(&self) -> &SubsystemTable {
        &self.table
    }

    fn table_mut(&mut self) -> Result<&mut SubsystemTable> {
        Arc::get_mut(&mut self.table).ok_or(Error::TableFrozen)
    }

    fn install_conn(&mut self, id: String, stream: TcpStream) -> Result<()> {
        let token = Token(self.tokens.next());

        self.poll
            .registry()
            .register(&mut SourceFd(&stream.as_raw_fd()), token, Interest::READABLE)?;
        debug!("<{}> installed connection <{}> [{:?}]", self.name(), id, token);
        self.conns.insert(id, token, stream);
        Ok(())
    }

    fn remove_conn(&mut self, index: usize) -> Conn {
        let conn = self.conns.remove_at(index);

        let _ = self
            .poll
            .registry()
            .deregister(&mut SourceFd(&conn.stream.as_raw_fd()));
        self.live_ops.remove(&conn.id);
        conn
    }

    /// Collects the roster as the Task Planner: accepts every expected peer,
    /// then broadcasts the complete table back. The sockets stay installed
    /// as the dispatcher's inbound channels.
    pub fn accept_connection(&mut self, port: u16, expected: &[&str]) -> Result<()> {
        let bootstrap_listener = if port == self.accept_port {
            None
        } else {
            Some(TcpListener::bind(("0.0.0.0", port))?)
        };

        while !self.table.contains_all(expected) {
            let accepted = match &bootstrap_listener {
                Some(listener) => listener.accept(),
                None => self.listener.accept(),
            };
            let (mut stream, addr) = accepted?;

            let hello = match frame::read_cstring(&mut stream, SUBSYSTEM_ID_SIZE + 8) {
                Ok(hello) => hello,
                Err(Error::Disconnected(_)) => continue, // retry the accept
                Err(e) => return Err(e),
            };
            let (peer_port, peer_name) = table::parse_hello(&hello)?;

            if self.table.contains(&peer_name) {
                error!("<{}> double connection from <{}>@{}", self.name(), peer_name, addr);
                continue;
            }

            let info = SubsystemInfo {
                id: peer_name.clone(),
                ip: addr.ip().to_string(),
                port: peer_port,
            };

            info!("<{}> got info <{}>({}:{})", self.name(), info.id, info.ip, info.port);
            self.table_mut()?.push(info)?;
            self.install_conn(peer_name, stream)?;
        }

        info!("<{}> collected the complete roster", self.name());

        let lines: Vec<String> = self.table.iter().map(table::format_roster_entry).collect();

        for conn in self.conns.iter_mut() {
            for line in &lines {
                frame::write_cstring(&mut conn.stream, line)?;
            }
            frame::write_cstring(&mut conn.stream, "")?;
        }

        Ok(())
    }

    /// Joins the network as a peer: connects to the Task Planner, announces
    /// this process and receives the roster.
    pub fn make_connection(&mut self, ip: &str, port: u16) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", ip, port)
            .parse()
            .map_err(|_| Error::ConnectError(ip.to_owned(), io::Error::new(io::ErrorKind::InvalidInput, "bad address")))?;

        let mut stream = loop {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => break stream,
                Err(e) => {
                    debug!("<{}> retrying the task planner at {} ({})", self.name(), addr, e);
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
            }
        };

        info!("<{}> connected to ({}:{})", self.name(), ip, port);

        let hello = table::format_hello(self.accept_port, self.name());

        frame::write_cstring(&mut stream, &hello)?;

        loop {
            let line = frame::read_cstring(&mut stream, SUBSYSTEM_ID_SIZE + IP_STR_LEN + 8)?;

            if line.is_empty() {
                break;
            }

            let info = table::parse_roster_entry(&line)?;

            if info.id == self.name() {
                continue;
            }
            self.table_mut()?.push(info)?;
        }

        // NAT may have rewritten the address the roster reports for the
        // task planner, the caller-supplied one wins
        match self.table_mut()?.find_mut(TASK_PLANNER) {
            Some(info) => info.ip = ip.to_owned(),
            None => return Err(Error::NoPeer(TASK_PLANNER.to_owned())),
        }

        self.install_conn(TASK_PLANNER.to_owned(), stream)
    }

    /// Spawns a named helper thread before or outside the dispatcher loop,
    /// e.g. the subsystem's own driving logic.
    pub fn create_subthread<F>(&mut self, name: &str, args: Vec<String>, func: F) -> Result<()>
    where
        F: FnOnce(&mut Worker, Vec<String>) -> i32 + Send + 'static,
    {
        let own = self.name().to_owned();

        worker::spawn_subthread(&own, &self.conns, self.table.clone(), name, args, func)
    }

    /// Accepts every connection currently queued on the listener. Each new
    /// peer thread announces its thread-ID as its first bytes.
    fn accept_peers(&mut self) -> Result<()> {
        loop {
            self.listener.set_nonblocking(true)?;
            let accepted = self.listener.accept();
            self.listener.set_nonblocking(false)?;

            let (mut stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            match frame::read_cstring(&mut stream, THREAD_ID_SIZE) {
                Ok(id) => {
                    debug!("<{}> accepted <{}> from {}", self.name(), id, addr);
                    self.install_conn(id, stream)?;
                }
                Err(e) => error!("<{}> failed to read a thread-id from {}: {}", self.name(), addr, e),
            }
        }
    }

    /// Whether a connection has bytes buffered right now.
    fn has_buffered(&mut self, index: usize) -> bool {
        let conn = self.conns.at_mut(index);

        if conn.stream.set_nonblocking(true).is_err() {
            return true; // let the receive path surface the error
        }
        let mut byte = [0u8; 1];
        let peeked = conn.stream.peek(&mut byte);
        let _ = conn.stream.set_nonblocking(false);

        match peeked {
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => false,
            // data, an orderly shutdown or a broken socket: all of these
            // want the receive path to run
            _ => true,
        }
    }

    /// Waits until any installed socket (or the accept socket) is ready and
    /// returns the next framed message. Disconnects of roster subsystems
    /// escalate to the caller; worker hang-ups just drop the entry.
    ///
    /// Readiness is edge-triggered: a serviced connection re-queues its own
    /// token while bytes remain buffered, and stale tokens are skipped by a
    /// non-blocking peek, so no event is needed until a drained socket
    /// receives new data.
    fn receive_message(&mut self) -> Result<Message> {
        loop {
            while let Some(token) = self.pending.pop_front() {
                if token == self.accept_token {
                    self.accept_peers()?;
                    continue;
                }

                let index = match self.conns.position_of_token(token) {
                    Some(index) => index,
                    None => continue, // removed while the event was queued
                };

                if !self.has_buffered(index) {
                    continue;
                }

                let received = {
                    let conn = self.conns.at_mut(index);

                    frame::recv_frame(&mut conn.stream, &mut self.buf)
                };

                match received {
                    Ok(received) => {
                        if self.has_buffered(index) {
                            self.pending.push_back(token);
                        }
                        if received.stopped {
                            error!("<{}> stray stop signal on a main-thread connection", self.name());
                        }
                        return Ok(Message::from_text(received.text));
                    }
                    Err(Error::Disconnected(_)) => {
                        let conn = self.remove_conn(index);

                        if self.table.contains(&conn.id) {
                            return Err(Error::Disconnected(conn.id));
                        }
                        debug!("<{}> thread <{}> hung up", self.name(), conn.id);
                    }
                    // malformed wire data on the main thread is fatal
                    Err(e) => return Err(e),
                }
            }

            if let Err(e) = self.poll.poll(&mut self.events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }
            for event in self.events.iter() {
                self.pending.push_back(event.token());
            }
        }
    }

    /// The dispatcher loop. Returns with [`Error::Disconnected`] when a
    /// roster subsystem goes away, or with a wire error when the stream is
    /// corrupt.
    pub fn run(&mut self, ops: Operations) -> Result<()> {
        loop {
            let msg = self.receive_message()?;

            debug!("<{}> dispatching [{}]", self.name(), msg);

            match msg.message_type() {
                Ok(MessageType::Start) => self.on_start(&ops, msg),
                Ok(MessageType::Return) => self.on_return(msg),
                Ok(MessageType::Wait) => self.on_wait(msg),
                Ok(MessageType::Stop) => self.on_stop(&msg),
                Ok(MessageType::Read) => self.on_read(&msg),
                Ok(MessageType::Write) => self.on_write(&msg),
                Err(e) => {
                    error!("<{}> dropped a message: {} [{}]", self.name(), e, msg);
                    debug_assert!(false, "unknown message header");
                }
            }
        }
    }

    fn create_operation_thread(&mut self, func: Arc<OperationFn>, msg: &Message) -> Result<()> {
        let thread_id = msg.target_thread_id()?;

        if self.live_ops.contains(&thread_id) || self.conns.position(&thread_id).is_some() {
            return Err(Error::DoubleCreate(thread_id));
        }

        worker::spawn_operation(func, msg.clone(), self.table.clone())?;
        self.live_ops.insert(thread_id);
        Ok(())
    }

    fn on_start(&mut self, ops: &Operations, msg: Message) {
        let subject = match msg.subject() {
            Ok(subject) => subject,
            Err(e) => {
                error!("<{}> start without a subject: {} [{}]", self.name(), e, msg);
                return;
            }
        };

        let spawned = match ops.find(&subject) {
            Some(func) => self.create_operation_thread(func.clone(), &msg),
            None => Err(Error::UnknownOperation(subject.clone())),
        };

        match spawned {
            Ok(()) => {
                // the start message itself joins the wait list, so the
                // spawned thread's init acknowledgement reaches the caller
                self.on_wait(msg);
            }
            Err(e) => {
                error!("<{}> failed to start <{}>: {}", self.name(), subject, e);
                self.send_system_return(&msg, e.code());
            }
        }
    }

    fn on_return(&mut self, msg: Message) {
        match self.queue.push_return(msg) {
            Ok(Some(rendezvous)) => self.forward_reply(rendezvous),
            Ok(None) => (),
            Err(e) => error!("<{}> dropped an unroutable return: {}", self.name(), e),
        }
    }

    fn on_wait(&mut self, msg: Message) {
        match self.queue.push_wait(msg) {
            Ok(Some(rendezvous)) => self.forward_reply(rendezvous),
            Ok(None) => (),
            Err(e) => error!("<{}> dropped an unroutable wait: {}", self.name(), e),
        }
    }

    fn forward_reply(&mut self, rendezvous: Rendezvous) {
        let forwarded = rendezvous
            .waiter
            .source()
            .and_then(|src| self.send_to(&src, rendezvous.reply.as_str(), None));

        if let Err(e) = forwarded {
            error!("<{}> failed to forward a return: {}", self.name(), e);
        }
    }

    fn on_stop(&mut self, msg: &Message) {
        let thread_id = match msg.target_thread_id() {
            Ok(thread_id) => thread_id,
            Err(e) => {
                error!("<{}> unroutable stop: {} [{}]", self.name(), e, msg);
                return;
            }
        };

        let signalled = match self.conns.position(&thread_id) {
            Some(index) => self
                .conns
                .at_mut(index)
                .stream
                .write_all(&[0])
                .map_err(Error::Io),
            None => Err(Error::NonConnection(thread_id.clone())),
        };

        if let Err(e) = signalled {
            error!("<{}> failed to signal <{}>: {}", self.name(), thread_id, e);
        }
    }

    fn on_read(&mut self, msg: &Message) {
        if let Err(e) = self.try_reply_read(msg) {
            error!("<{}> failed to answer a read: {}", self.name(), e);
        }
    }

    fn try_reply_read(&mut self, msg: &Message) -> Result<()> {
        let src = msg.source()?;
        let subject = msg.subject()?;

        let (code, payload) = match self.store.get(&subject) {
            Some(payload) => (ReturnCode::Success, Some(payload.to_owned())),
            None => (ReturnCode::NoValue, None),
        };

        let mut ret = Message::ret(&subject)?;

        ret.set_return_value(code.as_i32())?;
        self.send_to(&src, ret.as_str(), payload.as_deref())
    }

    fn on_write(&mut self, msg: &Message) {
        let code = match self.try_store_write(msg) {
            Ok(()) => ReturnCode::Success,
            Err(e) => {
                error!("<{}> failed to store a write: {}", self.name(), e);
                e.code()
            }
        };

        self.send_system_return(msg, code);
    }

    fn try_store_write(&mut self, msg: &Message) -> Result<()> {
        let subject = msg.subject()?;
        let mut payload = Message::from_text(msg.body().to_owned());

        payload.set_time(global::now_seconds())?;
        self.store.put(&subject, payload.into_text())
    }

    /// Sends over an already-installed connection. The main thread never
    /// opens connections of its own.
    fn send_to(&mut self, dst: &str, primary: &str, suffix: Option<&str>) -> Result<()> {
        let index = self
            .conns
            .position(dst)
            .ok_or_else(|| Error::NonConnection(dst.to_owned()))?;
        let conn = self.conns.at_mut(index);

        frame::send_frame(&mut conn.stream, primary, suffix)
    }

    fn send_system_return(&mut self, original: &Message, code: ReturnCode) {
        if let Err(e) = self.try_send_system_return(original, code) {
            error!("<{}> failed to reply to [{}]: {}", self.name(), original, e);
        }
    }

    fn try_send_system_return(&mut self, original: &Message, code: ReturnCode) -> Result<()> {
        let src = original.source()?;
        let subject = original.subject()?;
        let mut ret = Message::ret(&subject)?;

        ret.set_return_value(code.as_i32())?;

        let own = self.name().to_owned();
        let mut suffix = Message::fragment();

        suffix.set_source(&own)?;
        suffix.set_destination(&src)?;
        suffix.set_subject(&subject)?;

        self.send_to(&src, ret.as_str(), Some(suffix.as_str()))
    }
}
