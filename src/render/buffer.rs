//! Bounded LRU buffer of materialized pages

use std::collections::HashSet;

use log::debug;
use lru::LruCache;

use super::page::PageId;

/// An item the buffer can hold and evict
pub trait BufferItem {
    /// Stable identity of the item
    fn id(&self) -> PageId;

    /// Release whatever resources the item holds. Called once per eviction.
    fn destroy(&mut self);
}

/// Fixed-capacity container with least-recently-used eviction.
///
/// The underlying `LruCache` is unbounded; capacity is enforced here so that
/// eviction always goes through [`BufferItem::destroy`].
pub struct Buffer<T: BufferItem> {
    items: LruCache<PageId, T>,
    capacity: usize,
}

impl<T: BufferItem> Buffer<T> {
    /// Create a buffer. A zero capacity is treated as 1.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: LruCache::unbounded(),
            capacity: capacity.max(1),
        }
    }

    /// Insert an item at the most-recently-used end.
    ///
    /// A held item is moved without being destroyed. If the buffer overflows,
    /// the least-recently-used item is destroyed and dropped.
    pub fn push(&mut self, item: T) {
        // `put` on a held key replaces the value and promotes it; the old
        // value is the same item, so it is dropped without destroy.
        let _ = self.items.put(item.id(), item);

        if self.items.len() > self.capacity {
            self.evict_lru();
        }
    }

    /// Change the capacity, optionally protecting `ids_to_keep` from eviction
    /// by promoting them to the most-recently-used end first.
    pub fn resize(&mut self, new_capacity: usize, ids_to_keep: &HashSet<PageId>) {
        self.capacity = new_capacity.max(1);

        if !ids_to_keep.is_empty() {
            // Snapshot the original order so promotions are applied once each,
            // in their original relative order.
            let to_promote: Vec<PageId> = self
                .items
                .iter()
                .rev()
                .map(|(id, _)| *id)
                .filter(|id| ids_to_keep.contains(id))
                .collect();
            for id in &to_promote {
                self.items.promote(id);
            }
        }

        while self.items.len() > self.capacity {
            self.evict_lru();
        }
    }

    /// Destroy every held item
    pub fn reset(&mut self) {
        while self.evict_lru() {}
    }

    #[must_use]
    pub fn has(&self, id: PageId) -> bool {
        self.items.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Held items from least to most recently used
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().rev().map(|(_, item)| item)
    }

    /// Held ids from least to most recently used
    #[must_use]
    pub fn ids(&self) -> Vec<PageId> {
        self.items.iter().rev().map(|(id, _)| *id).collect()
    }

    fn evict_lru(&mut self) -> bool {
        match self.items.pop_lru() {
            Some((id, mut item)) => {
                debug!("Evicting page {id} from buffer");
                item.destroy();
                true
            }
            None => false,
        }
    }
}

impl<T: BufferItem> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity)
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct Item {
        id: PageId,
        destroyed: Rc<Cell<u32>>,
    }

    impl BufferItem for Item {
        fn id(&self) -> PageId {
            self.id
        }

        fn destroy(&mut self) {
            self.destroyed.set(self.destroyed.get() + 1);
        }
    }

    struct Fixture {
        counters: Vec<Rc<Cell<u32>>>,
    }

    impl Fixture {
        fn new(n: usize) -> Self {
            Self {
                counters: (0..=n).map(|_| Rc::new(Cell::new(0))).collect(),
            }
        }

        fn item(&self, id: PageId) -> Item {
            Item {
                id,
                destroyed: Rc::clone(&self.counters[id as usize]),
            }
        }

        fn destroyed(&self, id: PageId) -> u32 {
            self.counters[id as usize].get()
        }
    }

    fn keep(ids: &[PageId]) -> HashSet<PageId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn push_over_capacity_evicts_oldest() {
        let fx = Fixture::new(4);
        let mut buffer = Buffer::new(3);
        for id in 1..=4 {
            buffer.push(fx.item(id));
        }

        assert_eq!(buffer.ids(), vec![2, 3, 4]);
        assert_eq!(fx.destroyed(1), 1);
        assert_eq!(fx.destroyed(2), 0);
    }

    #[test]
    fn repush_moves_to_mru_without_destroy() {
        let fx = Fixture::new(3);
        let mut buffer = Buffer::new(3);
        for id in 1..=3 {
            buffer.push(fx.item(id));
        }

        buffer.push(fx.item(1));
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.ids(), vec![2, 3, 1]);
        assert_eq!(fx.destroyed(1), 0);
    }

    #[test]
    fn resize_promotes_kept_ids_before_evicting() {
        let fx = Fixture::new(4);
        let mut buffer = Buffer::new(3);
        for id in 2..=4 {
            buffer.push(fx.item(id));
        }

        buffer.resize(2, &keep(&[2]));
        assert_eq!(buffer.ids(), vec![4, 2]);
        assert_eq!(fx.destroyed(3), 1);
        assert_eq!(fx.destroyed(4), 0);
        assert_eq!(fx.destroyed(2), 0);
    }

    #[test]
    fn resize_preserves_relative_order_of_kept_ids() {
        let fx = Fixture::new(5);
        let mut buffer = Buffer::new(5);
        for id in 1..=5 {
            buffer.push(fx.item(id));
        }

        buffer.resize(5, &keep(&[4, 1, 2]));
        assert_eq!(buffer.ids(), vec![3, 5, 1, 2, 4]);
    }

    #[test]
    fn resize_without_keep_evicts_from_lru_end() {
        let fx = Fixture::new(5);
        let mut buffer = Buffer::new(5);
        for id in 1..=5 {
            buffer.push(fx.item(id));
        }

        buffer.resize(2, &HashSet::new());
        assert_eq!(buffer.ids(), vec![4, 5]);
        assert_eq!(buffer.capacity(), 2);
        for id in 1..=3 {
            assert_eq!(fx.destroyed(id), 1);
        }
    }

    #[test]
    fn growing_capacity_evicts_nothing() {
        let fx = Fixture::new(2);
        let mut buffer = Buffer::new(2);
        buffer.push(fx.item(1));
        buffer.push(fx.item(2));

        buffer.resize(10, &keep(&[1]));
        assert_eq!(buffer.ids(), vec![2, 1]);
        assert_eq!(fx.destroyed(1) + fx.destroyed(2), 0);
    }

    #[test]
    fn reset_destroys_each_item_once() {
        let fx = Fixture::new(3);
        let mut buffer = Buffer::new(3);
        for id in 1..=3 {
            buffer.push(fx.item(id));
        }

        buffer.reset();
        assert!(buffer.is_empty());
        for id in 1..=3 {
            assert_eq!(fx.destroyed(id), 1);
        }

        buffer.reset();
        assert_eq!(fx.destroyed(1), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let fx = Fixture::new(2);
        let mut buffer = Buffer::new(0);
        buffer.push(fx.item(1));
        buffer.push(fx.item(2));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.ids(), vec![2]);
    }

    #[test]
    fn iteration_does_not_reorder() {
        let fx = Fixture::new(3);
        let mut buffer = Buffer::new(3);
        for id in 1..=3 {
            buffer.push(fx.item(id));
        }

        let seen: Vec<PageId> = buffer.iter().map(BufferItem::id).collect();
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(buffer.ids(), vec![1, 2, 3]);
        assert!(buffer.has(2));
        assert!(!buffer.has(7));
    }
}
