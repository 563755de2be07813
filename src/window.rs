//! Sharded per-key sliding windows.
//!
//! Keys are routed to a shard by xxh3 hash, so updates to keys on different
//! shards never contend. Updates to the same key are serialized by the shard
//! mutex, which is never held across an await point.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use xxhash_rust::xxh3::xxh3_64;

pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// Fixed-capacity FIFO of the most recent values for one key.
#[derive(Debug, Clone)]
pub struct Window {
    values: VecDeque<f64>,
    capacity: usize,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a value, returning the evicted oldest value once full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.values.push_back(value);
        if self.values.len() > self.capacity {
            self.values.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Owned copy in arrival order, oldest first.
    pub fn to_vec(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

type Shard = Mutex<HashMap<String, Window>>;

/// Concurrent map from grouping key to [`Window`].
pub struct WindowStore {
    shards: Box<[Shard]>,
    capacity: usize,
}

impl WindowStore {
    /// Store with the default shard count (4 per available core).
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, default_shard_count())
    }

    pub fn with_shards(capacity: usize, shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_index(&self, key: &str) -> usize {
        (xxh3_64(key.as_bytes()) as usize) % self.shards.len()
    }

    fn lock_shard(&self, index: usize) -> MutexGuard<'_, HashMap<String, Window>> {
        // A panic mid-update leaves at worst one partially pushed window
        self.shards[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `value` to the window for `key` and return its contents
    /// after the append. Creates the window on first sight of the key.
    pub fn update(&self, key: &str, value: f64) -> Vec<f64> {
        let mut shard = self.lock_shard(self.shard_index(key));

        if let Some(window) = shard.get_mut(key) {
            window.push(value);
            return window.to_vec();
        }

        let mut window = Window::new(self.capacity);
        window.push(value);
        let snapshot = window.to_vec();
        shard.insert(key.to_owned(), window);
        snapshot
    }

    /// Current contents for `key`, if it has ever reported.
    pub fn snapshot(&self, key: &str) -> Option<Vec<f64>> {
        self.lock_shard(self.shard_index(key))
            .get(key)
            .map(Window::to_vec)
    }

    /// Number of keys with a window.
    pub fn len(&self) -> usize {
        (0..self.shards.len())
            .map(|i| self.lock_shard(i).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_shard_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
        * 4
}
