// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Thread-safe queue of cells awaiting unload

use ahash::AHashSet;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;

use crate::coord::CellKey;

/// FIFO of cells to unload at the end of the tick.
///
/// Any thread may enqueue at any time; the tick thread drains it during the
/// unload phase. Enqueueing a key that is already queued is a no-op.
#[derive(Default)]
pub struct DestructionQueue {
    queue: SegQueue<CellKey>,
    queued: Mutex<AHashSet<CellKey>>,
}

impl DestructionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `key` for unload. Returns false if it was already queued.
    pub fn enqueue(&self, key: CellKey) -> bool {
        let mut queued = self.queued.lock();
        if !queued.insert(key) {
            return false;
        }
        // Pushed under the set lock so `drain` never sees a key it cannot clear
        self.queue.push(key);
        true
    }

    /// Take every queued key in arrival order
    pub fn drain(&self) -> Vec<CellKey> {
        let mut queued = self.queued.lock();
        let mut keys = Vec::with_capacity(self.queue.len());
        while let Some(key) = self.queue.pop() {
            queued.remove(&key);
            keys.push(key);
        }
        keys
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.queued.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn key(x: i32, y: i32) -> CellKey {
        CellKey::at(x, y).unwrap()
    }

    #[test]
    fn test_drain_is_fifo_and_dedups() {
        let q = DestructionQueue::new();
        assert!(q.enqueue(key(3, 3)));
        assert!(q.enqueue(key(1, 1)));
        assert!(!q.enqueue(key(3, 3)));
        assert_eq!(q.len(), 2);
        assert!(q.contains(&key(1, 1)));

        assert_eq!(q.drain(), vec![key(3, 3), key(1, 1)]);
        assert!(q.is_empty());
        assert!(!q.contains(&key(1, 1)));

        // Drained keys can be queued again
        assert!(q.enqueue(key(3, 3)));
    }

    #[test]
    fn test_concurrent_enqueue() {
        let q = Arc::new(DestructionQueue::new());
        thread::scope(|s| {
            for t in 0..4 {
                let q = Arc::clone(&q);
                s.spawn(move || {
                    for i in 0..50 {
                        // Every thread also pushes the shared key (0, 0)
                        q.enqueue(key(i, t));
                        q.enqueue(key(0, 0));
                    }
                });
            }
        });
        let drained = q.drain();
        let unique: AHashSet<CellKey> = drained.iter().copied().collect();
        assert_eq!(unique.len(), drained.len());
        assert_eq!(drained.len(), 4 * 50);
    }
}
