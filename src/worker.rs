// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The operation-thread side of the runtime: the per-thread context handed
//! to every registered function, the worker send/receive surface, and the
//! detached thread wrapper that runs an operation from init acknowledgement
//! to completion Return.

use std::io::Read;
use std::sync::Arc;
use std::thread;

use log::{debug, error};
use mio::Token;

use crate::conn::ConnSet;
use crate::error::{Error, Result};
use crate::frame::{self, RecvBuffer};
use crate::global::{self, IdSequence, ReturnCode};
use crate::message::Message;
use crate::operation::OperationFn;
use crate::table::SubsystemTable;

/// Per-thread context of an operation or subthread. All communication with
/// the rest of the system goes through the methods on this handle; the
/// first connection it opens is the control connection to its own main
/// thread, which also carries stop signals.
pub struct Worker {
    thread_id: String,
    table: Arc<SubsystemTable>,
    conns: ConnSet,
    tokens: IdSequence,
    buf: RecvBuffer,
    working: bool,
}

impl Worker {
    pub(crate) fn new(thread_id: String, table: Arc<SubsystemTable>) -> Worker {
        Worker {
            thread_id,
            table,
            conns: ConnSet::new(),
            tokens: IdSequence::new(),
            buf: RecvBuffer::new(),
            working: true,
        }
    }

    /// Wire thread-ID of this thread, `"subsystem@function"`.
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Name of the subsystem this thread belongs to.
    pub fn subsystem(&self) -> &str {
        &self.table.self_info().id
    }

    /// The roster snapshot taken when this thread was spawned.
    pub fn table(&self) -> &SubsystemTable {
        &self.table
    }

    fn conn_index(&mut self, dst: &str) -> Result<usize> {
        if let Some(index) = self.conns.position(dst) {
            return Ok(index);
        }

        let token = Token(self.tokens.next());
        self.conns.connect_to(&self.table, &self.thread_id, token, dst)?;
        Ok(self.conns.len() - 1)
    }

    fn send_message(&mut self, dst: &str, primary: &str, suffix: Option<&str>) -> Result<()> {
        let index = self.conn_index(dst)?;
        let conn = self.conns.at_mut(index);

        frame::send_frame(&mut conn.stream, primary, suffix)
    }

    /// Stamps `#src`/`#dst` and sends `msg` to the main thread of `dst`,
    /// opening a connection first if none exists yet.
    pub fn send_command(&mut self, dst: &str, msg: &mut Message) -> Result<()> {
        msg.set_source(&self.thread_id)?;
        msg.set_destination(dst)?;
        self.send_message(dst, msg.as_str(), None)
    }

    /// Sends a Return message to this thread's own main thread, which
    /// forwards it to whoever waits on the subject.
    pub fn send_return(&mut self, msg: &Message) -> Result<()> {
        let mut suffix = Message::fragment();

        suffix.set_source(&self.thread_id)?;

        let own = self.subsystem().to_owned();
        self.send_message(&own, msg.as_str(), Some(suffix.as_str()))
    }

    /// System-level reply path: answers `original` with `ret`, routed
    /// through this thread's own main thread.
    pub(crate) fn send_system_return(&mut self, original: &Message, ret: &Message) -> Result<()> {
        let src = original.source()?;
        let subject = original.subject()?;
        let mut suffix = Message::fragment();

        suffix.set_source(&self.thread_id)?;
        suffix.set_destination(&src)?;
        suffix.set_subject(&subject)?;

        let own = self.subsystem().to_owned();
        self.send_message(&own, ret.as_str(), Some(suffix.as_str()))
    }

    fn acknowledge_init(&mut self, original: &Message, code: ReturnCode) -> Result<()> {
        let subject = original.subject()?;
        let mut ack = Message::ret(&subject)?;

        ack.set_return_value(code.as_i32())?;
        self.send_system_return(original, &ack)
    }

    /// Reads one framed message from the connection identified by `src`.
    /// A stop signal multiplexed in front of it is consumed on the way.
    pub fn receive_return(&mut self, src: &str) -> Result<Message> {
        let index = self
            .conns
            .position(src)
            .ok_or_else(|| Error::NonConnection(src.to_owned()))?;
        let conn = self.conns.at_mut(index);
        let received = frame::recv_frame(&mut conn.stream, &mut self.buf)?;

        if received.stopped {
            self.working = false;
        }

        Ok(Message::from_text(received.text))
    }

    /// Polls the control connection for a stop signal. Returns `false` once
    /// a stop has been observed; this is the cooperative cancellation check
    /// operation bodies are expected to call periodically.
    pub fn check_working(&mut self) -> bool {
        loop {
            let working = self.working;
            let ctrl = match self.conns.first_mut() {
                Some(conn) => conn,
                None => return working,
            };

            if ctrl.stream.set_nonblocking(true).is_err() {
                return working;
            }
            let mut byte = [0u8; 1];
            let peeked = ctrl.stream.peek(&mut byte);
            let _ = ctrl.stream.set_nonblocking(false);

            match peeked {
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return working,
                Err(e) => {
                    error!("<{}> control connection broke: {}", self.thread_id, e);
                    self.working = false;
                    return false;
                }
                Ok(0) => {
                    // main thread hung up
                    self.working = false;
                    return false;
                }
                Ok(_) => {
                    if byte[0] != 0 {
                        // a framed message is waiting, not a stop signal
                        return working;
                    }
                    let mut consumed = [0u8; 1];
                    if ctrl.stream.read_exact(&mut consumed).is_err() {
                        self.working = false;
                        return false;
                    }
                    self.working = false;
                }
            }
        }
    }

    /// Blocks until the stop signal arrives on the control connection.
    pub fn wait_for_stop(&mut self) -> Result<()> {
        if !self.working {
            return Ok(());
        }

        let thread_id = self.thread_id.clone();
        let ctrl = self
            .conns
            .first_mut()
            .ok_or(Error::NonConnection(thread_id))?;
        let mut byte = [0u8; 1];

        ctrl.stream.read_exact(&mut byte).map_err(frame::map_recv_err)?;
        self.working = false;

        if byte[0] != 0 {
            return Err(Error::MalformedWire("unexpected data on the control connection"));
        }
        Ok(())
    }

    /// Asks the operation thread `function` of `dst` to stop.
    pub fn request_stop(&mut self, dst: &str, function: &str) -> Result<()> {
        let mut msg = Message::stop(function)?;

        self.send_command(dst, &mut msg)
    }

    /// Waits for the operation `function` of `dst` to complete and returns
    /// its completion Return message.
    pub fn wait_operation(&mut self, dst: &str, function: &str) -> Result<Message> {
        let mut msg = Message::wait(function)?;

        self.send_command(dst, &mut msg)?;
        self.receive_return(dst)
    }

    /// Stop and wait in one call.
    pub fn stop_operation(&mut self, dst: &str, function: &str) -> Result<Message> {
        self.request_stop(dst, function)?;
        self.wait_operation(dst, function)
    }

    /// Spawns a named helper thread sharing this thread's roster snapshot.
    /// No completion Return is generated for subthreads.
    pub fn create_subthread<F>(&mut self, name: &str, args: Vec<String>, func: F) -> Result<()>
    where
        F: FnOnce(&mut Worker, Vec<String>) -> i32 + Send + 'static,
    {
        spawn_subthread(&self.thread_id, &self.conns, self.table.clone(), name, args, func)
    }
}

fn completion_return(subject: &str, value: i32) -> Result<Message> {
    let mut msg = Message::ret(subject)?;

    msg.set_return_value(value)?;
    Ok(msg)
}

/// Detaches a thread running the registered function carried by a Start
/// message. The caller has already checked for double creation.
pub(crate) fn spawn_operation(
    func: Arc<OperationFn>,
    message: Message,
    table: Arc<SubsystemTable>,
) -> Result<()> {
    let thread_id = message.target_thread_id()?;

    thread::Builder::new()
        .name(thread_id.clone())
        .spawn(move || run_operation(thread_id, func, message, table))?;

    Ok(())
}

fn run_operation(thread_id: String, func: Arc<OperationFn>, message: Message, table: Arc<SubsystemTable>) {
    let mut worker = Worker::new(thread_id, table);

    if let Err(e) = worker.acknowledge_init(&message, ReturnCode::Success) {
        error!("<{}> failed to acknowledge its start: {}", worker.thread_id(), e);
    }

    let value = func(&mut worker, &message);

    debug!("<{}> finished with {}", worker.thread_id(), value);

    let sent = message
        .subject()
        .and_then(|subject| completion_return(&subject, value))
        .and_then(|msg| worker.send_return(&msg));
    if let Err(e) = sent {
        error!("<{}> failed to send its completion: {}", worker.thread_id(), e);
    }

    // drain a pending stop signal before the sockets close
    worker.check_working();
}

pub(crate) fn spawn_subthread<F>(
    parent_id: &str,
    parent_conns: &ConnSet,
    table: Arc<SubsystemTable>,
    name: &str,
    args: Vec<String>,
    func: F,
) -> Result<()>
where
    F: FnOnce(&mut Worker, Vec<String>) -> i32 + Send + 'static,
{
    let thread_id = global::thread_id(parent_id, name)?;

    if parent_conns.position(&thread_id).is_some() {
        return Err(Error::DoubleCreate(thread_id));
    }

    let mut message = Message::start(name)?;

    message.set_source(parent_id)?;
    message.set_destination(parent_id)?;

    thread::Builder::new()
        .name(thread_id.clone())
        .spawn(move || run_subthread(thread_id, func, message, args, table))?;

    Ok(())
}

fn run_subthread<F>(thread_id: String, func: F, message: Message, args: Vec<String>, table: Arc<SubsystemTable>)
where
    F: FnOnce(&mut Worker, Vec<String>) -> i32,
{
    let mut worker = Worker::new(thread_id, table);

    if let Err(e) = worker.acknowledge_init(&message, ReturnCode::Success) {
        error!("<{}> failed to acknowledge its start: {}", worker.thread_id(), e);
    }

    let value = func(&mut worker, args);

    debug!("subthread <{}> finished with {}", worker.thread_id(), value);
    worker.check_working();
}
