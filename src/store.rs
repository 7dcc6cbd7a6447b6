// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Shared-value memory served by Read/Write messages. Open addressing with
//! linear probing; grows by x1.5 once the load factor reaches 2/3.

use log::debug;

use crate::error::{Error, Result};

const INITIAL_CAPACITY: usize = 128;

struct Slot {
    key: String,
    payload: String,
}

pub(crate) struct ValueStore {
    slots: Vec<Option<Slot>>,
    entries: usize,
}

impl ValueStore {
    pub fn new() -> ValueStore {
        ValueStore::with_capacity(INITIAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> ValueStore {
        let mut slots = Vec::new();

        slots.resize_with(capacity, || None);
        ValueStore { slots, entries: 0 }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
    }

    fn hash(&self, key: &str) -> usize {
        let mut h = 0usize;

        for byte in key.bytes() {
            h = (h.wrapping_mul(137) + byte as usize) % self.slots.len();
        }
        h
    }

    /// Stores `payload` under `key`, overwriting any previous value.
    pub fn put(&mut self, key: &str, payload: String) -> Result<()> {
        let h = self.hash(key);

        for probe in 0..self.slots.len() {
            let index = (h + probe) % self.slots.len();

            match &mut self.slots[index] {
                Some(slot) if slot.key == key => {
                    slot.payload = payload;
                    return Ok(());
                }
                Some(_) => (),
                empty => {
                    *empty = Some(Slot { key: key.to_owned(), payload });
                    self.entries += 1;
                    if self.entries * 3 > self.slots.len() * 2 {
                        self.grow();
                    }
                    return Ok(());
                }
            }
        }

        Err(Error::TableFull)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        let h = self.hash(key);

        for probe in 0..self.slots.len() {
            let index = (h + probe) % self.slots.len();

            match &self.slots[index] {
                None => return None,
                Some(slot) if slot.key == key => return Some(&slot.payload),
                Some(_) => (),
            }
        }
        None
    }

    fn grow(&mut self) {
        let new_capacity = self.slots.len() * 3 / 2;

        debug!("shared-value store grows {} -> {} [{}]", self.slots.len(), new_capacity, self.entries);

        let mut grown = ValueStore::with_capacity(new_capacity);
        for slot in self.slots.drain(..).flatten() {
            // the freshly sized table cannot fill up while rehashing
            let _ = grown.put(&slot.key, slot.payload);
        }
        *self = grown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_of_absent_key_is_none() {
        let store = ValueStore::new();

        assert_eq!(None, store.get("Pose"));
    }

    #[test]
    fn put_then_get_returns_the_payload() {
        let mut store = ValueStore::new();

        store.put("Pose", ";x=(d1),1.5".to_owned()).unwrap();

        assert_eq!(Some(";x=(d1),1.5"), store.get("Pose"));
    }

    #[test]
    fn second_put_overwrites_the_first() {
        let mut store = ValueStore::new();

        store.put("Pose", ";x=(d1),1.5".to_owned()).unwrap();
        store.put("Pose", ";x=(d1),2.5".to_owned()).unwrap();

        assert_eq!(Some(";x=(d1),2.5"), store.get("Pose"));
        assert_eq!(1, store.len());
    }

    #[test]
    fn default_capacity_is_128() {
        assert_eq!(128, ValueStore::new().capacity());
    }

    #[test]
    fn grows_past_two_thirds_load() {
        let mut store = ValueStore::with_capacity(6);

        for n in 0..4 {
            store.put(&format!("key{}", n), String::new()).unwrap();
        }
        assert_eq!(6, store.capacity());

        store.put("key4", String::new()).unwrap();

        assert_eq!(9, store.capacity());
        for n in 0..5 {
            assert!(store.get(&format!("key{}", n)).is_some());
        }
    }

    #[test]
    fn colliding_keys_probe_linearly() {
        let mut store = ValueStore::with_capacity(64);

        // enough keys that some buckets collide
        for n in 0..32 {
            store.put(&format!("k{}", n), format!(";n=(i1),{}", n)).unwrap();
        }
        for n in 0..32 {
            assert_eq!(Some(format!(";n=(i1),{}", n).as_str()), store.get(&format!("k{}", n)));
        }
    }

    #[test]
    fn growth_policy_keeps_the_table_from_filling() {
        let mut store = ValueStore::with_capacity(3);

        store.put("a", String::new()).unwrap();
        store.put("b", String::new()).unwrap();
        store.put("c", String::new()).unwrap();

        assert!(store.capacity() > 3);
        assert!(store.get("a").is_some() && store.get("b").is_some() && store.get("c").is_some());
    }
}
