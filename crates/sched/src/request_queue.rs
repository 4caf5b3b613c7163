//! Array-backed binary max-heap of pending requests, keyed by priority.
//!
//! Each element's heap position is tracked so any request can be removed by
//! identity. Ordering among equal priorities is unspecified.

use std::collections::HashMap;
use std::hash::Hash;

/// An element that can sit in a [`RequestQueue`].
pub trait Queued {
    type Id: Eq + Hash + Clone;

    fn id(&self) -> Self::Id;
    /// Larger is more urgent.
    fn priority(&self) -> i32;
}

#[derive(Debug)]
pub struct RequestQueue<T: Queued> {
    items: Vec<T>,
    index: HashMap<T::Id, usize>,
}

impl<T: Queued> Default for RequestQueue<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Queued> RequestQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, item: T) {
        let n = self.items.len();
        self.index.insert(item.id(), n);
        self.items.push(item);
        self.up(n);
    }

    /// Remove and return the most urgent request.
    pub fn pop(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let n = self.items.len() - 1;
        self.swap(0, n);
        self.down(0, n);
        self.take_last()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Request at heap position `i`.
    pub fn get(&self, i: usize) -> Option<&T> {
        self.items.get(i)
    }

    /// Remove the request at heap position `i`.
    pub fn remove(&mut self, i: usize) -> Option<T> {
        if i >= self.items.len() {
            return None;
        }
        let n = self.items.len() - 1;
        if n != i {
            self.swap(i, n);
            if !self.down(i, n) {
                self.up(i);
            }
        }
        self.take_last()
    }

    pub fn remove_by_id(&mut self, id: &T::Id) -> Option<T> {
        let i = *self.index.get(id)?;
        self.remove(i)
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.index.contains_key(id)
    }

    /// Remove every request matching `pred`, returning them.
    pub fn extract_if(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let ids: Vec<T::Id> = self
            .items
            .iter()
            .filter(|item| pred(item))
            .map(Queued::id)
            .collect();
        ids.iter().filter_map(|id| self.remove_by_id(id)).collect()
    }

    /// Heap positions ordered most urgent first.
    ///
    /// The sort is stable over heap layout, so requests of equal priority
    /// keep whatever relative order the heap happens to hold them in.
    pub fn priority_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.items.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.items[i].priority()));
        order
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    fn take_last(&mut self) -> Option<T> {
        let item = self.items.pop()?;
        self.index.remove(&item.id());
        Some(item)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        self.items[i].priority() > self.items[j].priority()
    }

    fn swap(&mut self, i: usize, j: usize) {
        if i == j {
            return;
        }
        self.items.swap(i, j);
        self.index.insert(self.items[i].id(), i);
        self.index.insert(self.items[j].id(), j);
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sift down within the first `n` items. Returns whether `i0` moved.
    fn down(&mut self, i0: usize, n: usize) -> bool {
        let mut i = i0;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut j = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                j = right;
            }
            if !self.less(j, i) {
                break;
            }
            self.swap(i, j);
            i = j;
        }
        i > i0
    }
}
