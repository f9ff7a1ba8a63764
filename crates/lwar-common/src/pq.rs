// pq.rs — bounded binary min-heap
//
// Backs the collision queue: events are pushed as they are predicted and
// drained in time order within the same tick. Capacity is fixed; a full heap
// rejects the push and the caller decides what to drop.

use std::cmp::Ordering;

pub struct MinHeap<T> {
    items: Vec<T>,
    cap: usize,
    cmp: fn(&T, &T) -> Ordering,
}

impl<T> MinHeap<T> {
    pub fn new(cap: usize, cmp: fn(&T, &T) -> Ordering) -> Self {
        assert!(cap > 0);
        Self { items: Vec::with_capacity(cap), cap, cmp }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.cap
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Insert an element. Returns false (and drops the element) when full.
    pub fn push(&mut self, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push(item);
        self.sift_up(self.items.len() - 1);
        true
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn pop_min(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let min = self.items.pop();
        if !self.items.is_empty() {
            self.sift_down(0);
        }
        min
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Restore heap order after the key at `i` was decreased in place.
    pub fn decreased(&mut self, i: usize) {
        self.sift_up(i);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if (self.cmp)(&self.items[i], &self.items[parent]) == Ordering::Less {
                self.items.swap(i, parent);
                i = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.items.len();
        loop {
            let mut j = i;
            let (l, r) = (2 * i + 1, 2 * i + 2);
            if l < n && (self.cmp)(&self.items[l], &self.items[j]) == Ordering::Less {
                j = l;
            }
            if r < n && (self.cmp)(&self.items[r], &self.items[j]) == Ordering::Less {
                j = r;
            }
            if i == j {
                break;
            }
            self.items.swap(i, j);
            i = j;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> MinHeap<i32> {
        MinHeap::new(7, |a, b| a.cmp(b))
    }

    #[test]
    fn drains_in_key_order() {
        let mut h = heap();
        for v in [5, 1, 4, 2, 3] {
            assert!(h.push(v));
        }
        let mut out = Vec::new();
        while let Some(v) = h.pop_min() {
            out.push(v);
        }
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn peek_sees_min_without_removal() {
        let mut h = heap();
        h.push(9);
        h.push(3);
        assert_eq!(h.peek(), Some(&3));
        assert_eq!(h.len(), 2);
    }

    #[test]
    fn rejects_past_capacity() {
        let mut h = heap();
        for v in 0..7 {
            assert!(h.push(v));
        }
        assert!(h.is_full());
        assert!(!h.push(100));
        assert_eq!(h.len(), 7);
    }

    #[test]
    fn clear_empties() {
        let mut h = heap();
        h.push(1);
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.pop_min(), None);
    }

    #[test]
    fn decreased_resifts() {
        let mut h = MinHeap::<(i32, &str)>::new(7, |a, b| a.0.cmp(&b.0));
        h.push((10, "a"));
        h.push((20, "b"));
        h.push((30, "c"));
        // find "c" and decrease its key in place
        let i = h.items.iter().position(|e| e.1 == "c").unwrap();
        h.items[i].0 = 5;
        h.decreased(i);
        assert_eq!(h.pop_min(), Some((5, "c")));
        assert_eq!(h.pop_min(), Some((10, "a")));
    }

    #[test]
    fn equal_keys_all_surface() {
        let mut h = heap();
        for _ in 0..3 {
            h.push(7);
        }
        h.push(1);
        assert_eq!(h.pop_min(), Some(1));
        assert_eq!(h.pop_min(), Some(7));
        assert_eq!(h.pop_min(), Some(7));
        assert_eq!(h.pop_min(), Some(7));
    }
}
