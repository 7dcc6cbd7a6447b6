// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Lightweight distributed runtime for robot-control subsystems.
//!
//! Each subsystem is a process with one main thread and dynamically spawned
//! operation threads. Processes exchange textual messages over TCP to start
//! operations, wait for their completion, stop them, and share named values
//! held on the main thread.
//!
//! The subsystem called `TP` (Task Planner) drives the bootstrap: it
//! accepts every expected peer, collects their connection info and
//! broadcasts the roster back. After that any worker thread can talk to any
//! subsystem directly.
//!
//! ```rust,no_run
//! use openrobo::{Operations, Runtime};
//!
//! fn main() -> openrobo::Result<()> {
//!     let mut runtime = Runtime::startup("VS")?;
//!
//!     runtime.make_connection("127.0.0.1", 50002)?;
//!
//!     let ops = Operations::new().operation("Grasp", |worker, _msg| {
//!         while worker.check_working() {
//!             // move the arm a little
//!         }
//!         0
//!     });
//!
//!     runtime.run(ops)
//! }
//! ```

mod conn;
mod error;
mod frame;
mod global;
mod join;
mod message;
mod operation;
mod runtime;
mod store;
mod table;
mod worker;

pub use crate::error::{Error, Result};
pub use crate::global::{
    thread_id, ReturnCode, DEFAULT_ACCEPT_PORT, FUNCTION_NAME_SIZE, IP_STR_LEN, MAX_SUBSYSTEMS,
    SUBSYSTEM_ID_SIZE, TASK_PLANNER, THREAD_ID_SIZE,
};
pub use crate::message::{
    Message, MessageType, PARAM_DST, PARAM_RETURN, PARAM_SRC, PARAM_SUBJECT, PARAM_TIME,
};
pub use crate::operation::{OperationFn, Operations};
pub use crate::runtime::Runtime;
pub use crate::table::{SubsystemInfo, SubsystemTable};
pub use crate::worker::Worker;
