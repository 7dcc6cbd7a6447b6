// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Return/Wait rendezvous on the main thread: two FIFO lists of cloned
//! messages matched by `#subject`. A Return finding no waiter parks on the
//! return list; a Wait finding no Return parks on the wait list. At steady
//! state both lists are empty.

use log::error;

use crate::error::Result;
use crate::message::Message;

pub(crate) struct JoinQueue {
    returns: Vec<Message>,
    waits: Vec<Message>,
}

/// A completed rendezvous: `reply` is the Return to forward to the `#src`
/// of `waiter`.
pub(crate) struct Rendezvous {
    pub waiter: Message,
    pub reply: Message,
}

fn position_by_subject(list: &[Message], subject: &str) -> Option<usize> {
    list.iter().position(|message| match message.subject() {
        Ok(s) => s == subject,
        Err(e) => {
            error!("queued message without a subject: {} [{}]", e, message);
            false
        }
    })
}

impl JoinQueue {
    pub fn new() -> JoinQueue {
        JoinQueue { returns: Vec::new(), waits: Vec::new() }
    }

    /// Stores a Return message, or matches it against a pending wait.
    pub fn push_return(&mut self, ret: Message) -> Result<Option<Rendezvous>> {
        let subject = ret.subject()?;

        match position_by_subject(&self.waits, &subject) {
            Some(index) => {
                let waiter = self.waits.remove(index);
                Ok(Some(Rendezvous { waiter, reply: ret }))
            }
            None => {
                self.returns.push(ret);
                Ok(None)
            }
        }
    }

    /// Enqueues a Wait message (explicit, or the implicit one a Start
    /// carries), or matches it against a stored Return.
    pub fn push_wait(&mut self, wait: Message) -> Result<Option<Rendezvous>> {
        let subject = wait.subject()?;

        match position_by_subject(&self.returns, &subject) {
            Some(index) => {
                let reply = self.returns.remove(index);
                Ok(Some(Rendezvous { waiter: wait, reply }))
            }
            None => {
                self.waits.push(wait);
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.returns.is_empty() && self.waits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ret(subject: &str, value: i32) -> Message {
        let mut msg = Message::ret(subject).unwrap();

        msg.set_return_value(value).unwrap();
        msg
    }

    fn wait(subject: &str, src: &str) -> Message {
        let mut msg = Message::wait(subject).unwrap();

        msg.set_source(src).unwrap();
        msg
    }

    #[test]
    fn wait_then_return_rendezvous_exactly_once() {
        let mut queue = JoinQueue::new();

        assert!(queue.push_wait(wait("Grasp", "TP@A")).unwrap().is_none());

        let rendezvous = queue.push_return(ret("Grasp", 7)).unwrap().unwrap();

        assert_eq!("TP@A", rendezvous.waiter.source().unwrap());
        assert_eq!(7, rendezvous.reply.return_value().unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn return_then_wait_rendezvous_exactly_once() {
        let mut queue = JoinQueue::new();

        assert!(queue.push_return(ret("Grasp", 7)).unwrap().is_none());

        let rendezvous = queue.push_wait(wait("Grasp", "TP@A")).unwrap().unwrap();

        assert_eq!("TP@A", rendezvous.waiter.source().unwrap());
        assert_eq!(7, rendezvous.reply.return_value().unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn subjects_do_not_cross_match() {
        let mut queue = JoinQueue::new();

        assert!(queue.push_wait(wait("Grasp", "TP@A")).unwrap().is_none());
        assert!(queue.push_return(ret("Release", 1)).unwrap().is_none());
        assert!(!queue.is_empty());

        let rendezvous = queue.push_return(ret("Grasp", 7)).unwrap().unwrap();

        assert_eq!(7, rendezvous.reply.return_value().unwrap());
    }

    #[test]
    fn matching_is_first_in_first_out() {
        let mut queue = JoinQueue::new();

        queue.push_return(ret("Grasp", 1)).unwrap();
        queue.push_return(ret("Grasp", 2)).unwrap();

        let first = queue.push_wait(wait("Grasp", "TP@A")).unwrap().unwrap();
        let second = queue.push_wait(wait("Grasp", "TP@B")).unwrap().unwrap();

        assert_eq!(1, first.reply.return_value().unwrap());
        assert_eq!(2, second.reply.return_value().unwrap());
        assert!(queue.is_empty());
    }

    #[test]
    fn a_start_message_can_wait_because_matching_uses_the_subject() {
        let mut queue = JoinQueue::new();
        let mut start = Message::start("Grasp").unwrap();

        start.set_source("TP@A").unwrap();
        assert!(queue.push_wait(start).unwrap().is_none());

        let rendezvous = queue.push_return(ret("Grasp", 0)).unwrap().unwrap();

        assert_eq!("TP@A", rendezvous.waiter.source().unwrap());
        assert!(queue.is_empty());
    }
}
