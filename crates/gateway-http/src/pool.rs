// src/pool.rs
use std::os::fd::{AsRawFd, RawFd};

use crate::conn::ConnectionSlot;

/// Fixed-capacity connection pool.
///
/// Occupied slots always form a dense prefix `0..len()`. Freeing a slot
/// shifts every later slot down by one, so a caller iterating by index must
/// service the same index again after a free.
pub struct ConnectionPool<S> {
    slots: Box<[Option<ConnectionSlot<S>>]>,
    count: usize,
}

impl<S> ConnectionPool<S> {
    /// Allocates every slot once at startup.
    pub fn new(capacity: usize) -> Self {
        let slots: Vec<Option<ConnectionSlot<S>>> = (0..capacity).map(|_| None).collect();
        Self {
            slots: slots.into_boxed_slice(),
            count: 0,
        }
    }

    /// Places the socket in the first free slot. A full pool hands the
    /// socket back to the caller untouched.
    #[inline]
    pub fn allocate(&mut self, socket: S) -> Result<usize, S> {
        if self.count == self.slots.len() {
            return Err(socket);
        }
        let idx = self.count;
        self.slots[idx] = Some(ConnectionSlot::new(socket));
        self.count += 1;
        Ok(idx)
    }

    /// Removes the slot at `index` and compacts the pool.
    pub fn free(&mut self, index: usize) -> Option<ConnectionSlot<S>> {
        if index >= self.count {
            return None;
        }
        let slot = self.slots[index].take();
        self.slots[index..self.count].rotate_left(1);
        self.count -= 1;
        slot
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut ConnectionSlot<S>> {
        if index >= self.count {
            return None;
        }
        self.slots[index].as_mut()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&ConnectionSlot<S>> {
        if index >= self.count {
            return None;
        }
        self.slots[index].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionSlot<S>> {
        self.slots[..self.count].iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionSlot<S>> {
        self.slots[..self.count].iter_mut().flatten()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<S: AsRawFd> ConnectionPool<S> {
    pub fn descriptor(&self, index: usize) -> Option<RawFd> {
        self.get(index).map(|slot| slot.socket.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(pool: &ConnectionPool<u32>) -> Vec<u32> {
        pool.iter().map(|slot| slot.socket).collect()
    }

    #[test]
    fn test_pool_operations() {
        let mut pool = ConnectionPool::new(3);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 3);

        assert_eq!(pool.allocate(100), Ok(0));
        assert_eq!(pool.allocate(101), Ok(1));
        assert_eq!(pool.allocate(102), Ok(2));
        assert!(pool.is_full());

        // A full pool hands the socket back.
        assert_eq!(pool.allocate(103), Err(103));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_free_shifts_later_slots_down() {
        let mut pool = ConnectionPool::new(3);
        for id in [10, 11, 12] {
            pool.allocate(id).unwrap();
        }

        let freed = pool.free(0).unwrap();
        assert_eq!(freed.socket, 10);
        assert_eq!(ids(&pool), [11, 12]);
        assert_eq!(pool.get(0).map(|s| s.socket), Some(11));
        assert!(pool.get(2).is_none());

        // The freed capacity is reused at the end of the prefix.
        assert_eq!(pool.allocate(13), Ok(2));
        assert_eq!(ids(&pool), [11, 12, 13]);
    }

    #[test]
    fn test_free_out_of_range() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(2);
        pool.allocate(1).unwrap();
        assert!(pool.free(1).is_none());
        assert!(pool.free(5).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_servicing_by_index_after_free() {
        // Closing every slot while walking the pool must visit each exactly once.
        let mut pool = ConnectionPool::new(3);
        for id in [1, 2, 3] {
            pool.allocate(id).unwrap();
        }

        let mut visited = Vec::new();
        let mut i = 0;
        while i < pool.len() {
            visited.push(pool.get(i).map(|s| s.socket).unwrap());
            if pool.get(i).is_some_and(|s| s.socket % 2 == 1) {
                pool.free(i);
                continue;
            }
            i += 1;
        }

        assert_eq!(visited, [1, 2, 3]);
        assert_eq!(ids(&pool), [2]);
    }
}
