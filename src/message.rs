// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Textual message codec.
//!
//! A message is a UTF-8 string: a one-word header (`Start;`, `stop;`,
//! `Wait;`, `Return;`, `read;`, `write;`) followed by parameters of the form
//! `;name=(TC N),v1,…,vN` where `TC` is one of `i` (int), `d` (double),
//! `s` (string, N = 1), `c` (string records) or `b` (hex bytes).
//! Decoding always hands out fresh owned values.

use std::fmt;

use crate::error::{Error, Result};
use crate::global;

pub const PARAM_SRC: &str = "#src";
pub const PARAM_DST: &str = "#dst";
pub const PARAM_SUBJECT: &str = "#subject";
pub const PARAM_RETURN: &str = "#return";
pub const PARAM_TIME: &str = "#time";

const HEADER_START: &str = "Start;";
const HEADER_STOP: &str = "stop;";
const HEADER_WAIT: &str = "Wait;";
const HEADER_RETURN: &str = "Return;";
const HEADER_READ: &str = "read;";
const HEADER_WRITE: &str = "write;";

/// Message kind, decided by the case-sensitive first character of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Start,
    Stop,
    Wait,
    Return,
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    text: String,
}

impl Message {
    fn with_header(header: &str, subject: &str) -> Result<Message> {
        let mut message = Message { text: String::from(header) };

        message.set_subject(subject)?;
        Ok(message)
    }

    /// A Start message requesting the operation `subject`.
    pub fn start(subject: &str) -> Result<Message> {
        Message::with_header(HEADER_START, subject)
    }

    /// A Stop message for the operation `subject`.
    pub fn stop(subject: &str) -> Result<Message> {
        Message::with_header(HEADER_STOP, subject)
    }

    /// A Wait message for the operation `subject`.
    pub fn wait(subject: &str) -> Result<Message> {
        Message::with_header(HEADER_WAIT, subject)
    }

    /// A Return message answering for the operation `subject`.
    pub fn ret(subject: &str) -> Result<Message> {
        Message::with_header(HEADER_RETURN, subject)
    }

    /// A Read message for the shared value `subject`.
    pub fn read(subject: &str) -> Result<Message> {
        Message::with_header(HEADER_READ, subject)
    }

    /// A Write message for the shared value `subject`.
    pub fn write(subject: &str) -> Result<Message> {
        Message::with_header(HEADER_WRITE, subject)
    }

    /// A headerless parameter fragment, as appended to a primary message by
    /// the forwarding paths.
    pub(crate) fn fragment() -> Message {
        Message { text: String::new() }
    }

    pub(crate) fn from_text(text: String) -> Message {
        Message { text }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub(crate) fn into_text(self) -> String {
        self.text
    }

    /// Everything after the header token, leading separator included.
    pub(crate) fn body(&self) -> &str {
        match self.text.find(';') {
            Some(i) => &self.text[i..],
            None => "",
        }
    }

    pub fn message_type(&self) -> Result<MessageType> {
        match self.text.as_bytes().first() {
            Some(b'S') => Ok(MessageType::Start),
            Some(b's') => Ok(MessageType::Stop),
            Some(b'W') => Ok(MessageType::Wait),
            Some(b'R') => Ok(MessageType::Return),
            Some(b'r') => Ok(MessageType::Read),
            Some(b'w') => Ok(MessageType::Write),
            _ => Err(Error::MalformedWire("unknown message header")),
        }
    }

    /// Offset of the value spec of `name`, just past `;name=`.
    fn find_param(&self, name: &str) -> Option<usize> {
        let pattern = format!(";{}=", name);

        self.text.find(&pattern).map(|i| i + pattern.len())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.find_param(name).is_some()
    }

    /// Splits the value spec of `name` into type tag, element count and the
    /// raw comma-separated values behind it.
    fn param_parts(&self, name: &str) -> Result<(char, usize, &str)> {
        let malformed = || Error::MalformedParameter(name.to_owned());
        let start = self.find_param(name).ok_or_else(malformed)?;
        let spec = &self.text[start..];

        if !spec.starts_with('(') {
            return Err(malformed());
        }
        let close = spec.find(')').ok_or_else(malformed)?;
        let tag = spec[1..close].chars().next().ok_or_else(malformed)?;
        if !"idscb".contains(tag) {
            return Err(malformed());
        }
        let count: usize = spec[2..close].parse().map_err(|_| malformed())?;

        Ok((tag, count, &spec[close + 1..]))
    }

    /// Scans exactly `count` comma-separated value tokens.
    fn scan_values<'a>(&self, name: &str, mut rest: &'a str, count: usize) -> Result<Vec<&'a str>> {
        let malformed = || Error::MalformedParameter(name.to_owned());
        let mut values = Vec::with_capacity(count);

        for _ in 0..count {
            if !rest.starts_with(',') {
                return Err(malformed());
            }
            rest = &rest[1..];
            let end = rest.find(|c| c == ',' || c == ';').unwrap_or_else(|| rest.len());
            values.push(&rest[..end]);
            rest = &rest[end..];
        }
        if rest.starts_with(',') {
            // more values on the wire than the spec announced
            return Err(malformed());
        }

        Ok(values)
    }

    fn typed_values(&self, name: &str, expected: char) -> Result<Vec<&str>> {
        let (tag, count, rest) = self.param_parts(name)?;

        if tag != expected {
            return Err(Error::MalformedParameter(name.to_owned()));
        }
        self.scan_values(name, rest, count)
    }

    pub fn get_str(&self, name: &str) -> Result<String> {
        let values = self.typed_values(name, 's')?;

        match values.as_slice() {
            [value] => Ok((*value).to_owned()),
            _ => Err(Error::MalformedParameter(name.to_owned())),
        }
    }

    /// Values of a `c` parameter, one owned string per record.
    pub fn get_records(&self, name: &str) -> Result<Vec<String>> {
        let values = self.typed_values(name, 'c')?;

        Ok(values.into_iter().map(str::to_owned).collect())
    }

    pub fn get_int(&self, name: &str) -> Result<i32> {
        match self.get_int_array(name)?.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::MalformedParameter(name.to_owned())),
        }
    }

    pub fn get_int_array(&self, name: &str) -> Result<Vec<i32>> {
        self.typed_values(name, 'i')?
            .into_iter()
            .map(|v| v.parse().map_err(|_| Error::MalformedParameter(name.to_owned())))
            .collect()
    }

    pub fn get_double(&self, name: &str) -> Result<f64> {
        match self.get_double_array(name)?.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::MalformedParameter(name.to_owned())),
        }
    }

    pub fn get_double_array(&self, name: &str) -> Result<Vec<f64>> {
        self.typed_values(name, 'd')?
            .into_iter()
            .map(|v| v.parse().map_err(|_| Error::MalformedParameter(name.to_owned())))
            .collect()
    }

    pub fn get_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.typed_values(name, 'b')?
            .into_iter()
            .map(|v| u8::from_str_radix(v, 16).map_err(|_| Error::MalformedParameter(name.to_owned())))
            .collect()
    }

    fn check_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains(|c| ";,=()".contains(c)) {
            return Err(Error::MalformedParameter(name.to_owned()));
        }
        Ok(())
    }

    fn check_value(name: &str, value: &str) -> Result<()> {
        if value.contains(|c| c == ';' || c == ',') {
            return Err(Error::MalformedParameter(name.to_owned()));
        }
        Ok(())
    }

    /// Appends `;name=(TC N)` to the message, reusing the trailing separator
    /// the header already provides for the first parameter.
    fn append_spec(&mut self, name: &str, tag: char, count: usize) {
        if !self.text.ends_with(';') {
            self.text.push(';');
        }
        self.text.push_str(name);
        self.text.push_str("=(");
        self.text.push(tag);
        self.text.push_str(&count.to_string());
        self.text.push(')');
    }

    pub fn set_str(&mut self, name: &str, value: &str) -> Result<()> {
        Message::check_name(name)?;
        Message::check_value(name, value)?;
        self.append_spec(name, 's', 1);
        self.text.push(',');
        self.text.push_str(value);
        Ok(())
    }

    pub fn set_records(&mut self, name: &str, values: &[&str]) -> Result<()> {
        Message::check_name(name)?;
        for value in values {
            Message::check_value(name, value)?;
        }
        self.append_spec(name, 'c', values.len());
        for value in values {
            self.text.push(',');
            self.text.push_str(value);
        }
        Ok(())
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> Result<()> {
        self.set_int_array(name, &[value])
    }

    pub fn set_int_array(&mut self, name: &str, values: &[i32]) -> Result<()> {
        Message::check_name(name)?;
        self.append_spec(name, 'i', values.len());
        for value in values {
            self.text.push(',');
            self.text.push_str(&value.to_string());
        }
        Ok(())
    }

    pub fn set_double(&mut self, name: &str, value: f64) -> Result<()> {
        self.set_double_array(name, &[value])
    }

    pub fn set_double_array(&mut self, name: &str, values: &[f64]) -> Result<()> {
        Message::check_name(name)?;
        self.append_spec(name, 'd', values.len());
        for value in values {
            self.text.push(',');
            self.text.push_str(&value.to_string());
        }
        Ok(())
    }

    pub fn set_bytes(&mut self, name: &str, values: &[u8]) -> Result<()> {
        Message::check_name(name)?;
        self.append_spec(name, 'b', values.len());
        for value in values {
            self.text.push(',');
            self.text.push_str(&format!("{:02x}", value));
        }
        Ok(())
    }

    /// Drops `name` and its values from the message, if present.
    pub(crate) fn remove_param(&mut self, name: &str) {
        let pattern = format!(";{}=", name);

        if let Some(start) = self.text.find(&pattern) {
            let after = start + pattern.len();
            let end = self.text[after..]
                .find(';')
                .map(|i| after + i)
                .unwrap_or_else(|| self.text.len());
            self.text.replace_range(start..end, "");
        }
    }

    pub fn subject(&self) -> Result<String> {
        self.get_str(PARAM_SUBJECT)
    }

    pub fn source(&self) -> Result<String> {
        self.get_str(PARAM_SRC)
    }

    pub fn destination(&self) -> Result<String> {
        self.get_str(PARAM_DST)
    }

    pub fn return_value(&self) -> Result<i32> {
        self.get_int(PARAM_RETURN)
    }

    /// Seconds timestamp a shared value was stored at.
    pub fn time(&self) -> Result<f64> {
        self.get_double(PARAM_TIME)
    }

    pub fn set_subject(&mut self, subject: &str) -> Result<()> {
        self.set_str(PARAM_SUBJECT, subject)
    }

    pub(crate) fn set_source(&mut self, source: &str) -> Result<()> {
        self.set_str(PARAM_SRC, source)
    }

    pub(crate) fn set_destination(&mut self, destination: &str) -> Result<()> {
        self.set_str(PARAM_DST, destination)
    }

    pub fn set_return_value(&mut self, value: i32) -> Result<()> {
        self.set_int(PARAM_RETURN, value)
    }

    /// Stamps `#time`, overwriting any prior occurrence.
    pub(crate) fn set_time(&mut self, seconds: f64) -> Result<()> {
        self.remove_param(PARAM_TIME);
        self.set_double(PARAM_TIME, seconds)
    }

    /// Thread-ID of the operation thread a message is aimed at,
    /// `"#dst@#subject"`.
    pub(crate) fn target_thread_id(&self) -> Result<String> {
        global::thread_id(&self.destination()?, &self.subject()?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        self.text.fmt(formatter)
    }
}
