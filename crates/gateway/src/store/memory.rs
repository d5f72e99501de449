// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory backing for unit tests, shared between `SharedStore` instances
//! the way one Redis is shared between gateway instances. Covers the
//! operations the handlers use for shared records: get/set/delete, glob
//! key scans, and bounded lists. TTLs are ignored.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

#[derive(Default)]
pub(crate) struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    lists: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lists(&self) -> MutexGuard<'_, HashMap<String, Vec<Value>>> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, key: &str) -> Option<Value> {
        self.entries().get(key).cloned()
    }

    pub(crate) fn set(&self, key: &str, value: Value) {
        self.entries().insert(key.to_owned(), value);
    }

    pub(crate) fn delete(&self, key: &str) {
        self.entries().remove(key);
        self.lists().remove(key);
    }

    pub(crate) fn keys(&self, pattern: &str) -> Vec<String> {
        self.entries()
            .keys()
            .chain(self.lists().keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect()
    }

    pub(crate) fn list_push_trim(&self, key: &str, value: Value, limit: usize) {
        let mut lists = self.lists();
        let list = lists.entry(key.to_owned()).or_default();
        list.push(value);
        if list.len() > limit {
            let excess = list.len() - limit;
            list.drain(..excess);
        }
    }

    pub(crate) fn list_range(&self, key: &str, start: i64, stop: i64) -> Vec<Value> {
        let lists = self.lists();
        let Some(list) = lists.get(key) else { return Vec::new() };
        let len = list.len() as i64;
        let first = (if start < 0 { len + start } else { start }).max(0);
        let last = (if stop < 0 { len + stop } else { stop }).min(len - 1);
        if len == 0 || last < 0 || first > last {
            return Vec::new();
        }
        list[first as usize..=last as usize].to_vec()
    }
}

/// Redis-style glob matching, `*` wildcards only.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let last = parts.len() - 1;
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            let Some(after) = rest.strip_prefix(part) else { return false };
            rest = after;
        } else if i == last {
            return rest.ends_with(part);
        } else if !part.is_empty() {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}
