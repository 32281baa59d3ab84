// Copyright (c) 2021 Open vStorage QA. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// A map whose entries expire after a fixed time to live.
///
/// Expired entries are dropped lazily, on lookup.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, k: &K) -> Option<V> {
        let mut entries = self.entries.lock();

        match entries.get(k) {
            Some((v, expires)) if Instant::now() < *expires => Some(v.clone()),
            Some(_) => {
                entries.remove(k);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, k: K, v: V) {
        self.insert_with_ttl(k, v, self.ttl);
    }

    /// Insert with a per-entry lifetime. A zero `ttl` stores nothing.
    pub fn insert_with_ttl(&self, k: K, v: V, ttl: Duration) {
        if ttl == Duration::from_secs(0) {
            return;
        }

        self.entries.lock().insert(k, (v, Instant::now() + ttl));
    }

    /// Replace every entry at once
    pub fn replace_all(&self, xs: impl IntoIterator<Item = (K, V)>) {
        let expires = Instant::now() + self.ttl;

        let mut entries = self.entries.lock();

        entries.clear();
        entries.extend(xs.into_iter().map(|(k, v)| (k, (v, expires))));
    }

    pub fn invalidate(&self, k: &K) -> Option<V> {
        self.entries.lock().remove(k).map(|(v, _)| v)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
