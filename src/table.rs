// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The subsystem roster: which peers exist and where to connect to them.
//! Built once during bootstrap, frozen afterwards; operation threads get an
//! `Arc` snapshot.

use crate::error::{Error, Result};
use crate::global::{IP_STR_LEN, MAX_SUBSYSTEMS, SUBSYSTEM_ID_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemInfo {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

/// Entry 0 is always the owning process itself; on peers entry 1 is the
/// Task Planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsystemTable {
    infos: Vec<SubsystemInfo>,
}

impl SubsystemTable {
    pub(crate) fn new(own: SubsystemInfo) -> SubsystemTable {
        SubsystemTable { infos: vec![own] }
    }

    pub fn self_info(&self) -> &SubsystemInfo {
        &self.infos[0]
    }

    pub fn find(&self, id: &str) -> Option<&SubsystemInfo> {
        self.infos.iter().find(|info| info.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    pub fn contains_all(&self, ids: &[&str]) -> bool {
        ids.iter().all(|id| self.contains(id))
    }

    pub(crate) fn push(&mut self, info: SubsystemInfo) -> Result<()> {
        if self.infos.len() >= MAX_SUBSYSTEMS {
            return Err(Error::RosterFull);
        }
        self.infos.push(info);
        Ok(())
    }

    pub(crate) fn find_mut(&mut self, id: &str) -> Option<&mut SubsystemInfo> {
        self.infos.iter_mut().find(|info| info.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubsystemInfo> {
        self.infos.iter()
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

fn parse_port(digits: &str) -> Result<u16> {
    match digits.parse::<u32>() {
        Ok(port) if port > 0 && port <= 65535 => Ok(port as u16),
        _ => Err(Error::MalformedWire("port out of range")),
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() >= SUBSYSTEM_ID_SIZE {
        return Err(Error::MalformedWire("subsystem name out of bounds"));
    }
    Ok(())
}

/// First bootstrap line a peer sends the Task Planner: `"PORT NAME"`.
pub(crate) fn format_hello(port: u16, name: &str) -> String {
    format!("{} {}", port, name)
}

pub(crate) fn parse_hello(line: &str) -> Result<(u16, String)> {
    let mut parts = line.splitn(2, ' ');
    let port = parse_port(parts.next().unwrap_or(""))?;
    let name = parts.next().ok_or(Error::MalformedWire("hello line without a name"))?;

    check_name(name)?;
    Ok((port, name.to_owned()))
}

/// One roster line the Task Planner broadcasts back: `"IP:PORT NAME"`.
pub(crate) fn format_roster_entry(info: &SubsystemInfo) -> String {
    format!("{}:{} {}", info.ip, info.port, info.id)
}

pub(crate) fn parse_roster_entry(line: &str) -> Result<SubsystemInfo> {
    let colon = line.find(':').ok_or(Error::MalformedWire("roster line without a port"))?;
    let ip = &line[..colon];
    let mut parts = line[colon + 1..].splitn(2, ' ');
    let port = parse_port(parts.next().unwrap_or(""))?;
    let name = parts.next().ok_or(Error::MalformedWire("roster line without a name"))?;

    if ip.is_empty() || ip.len() > IP_STR_LEN {
        return Err(Error::MalformedWire("ip string out of bounds"));
    }
    check_name(name)?;

    Ok(SubsystemInfo { id: name.to_owned(), ip: ip.to_owned(), port })
}
