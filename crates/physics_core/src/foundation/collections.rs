//! Handle types and pooled storage
//!
//! Every object the physics core links to another object (colliders,
//! bodies, nodes, contacts, joints) lives in an index-stable slot map and
//! is referenced by a typed key. Edges store keys, so tearing an object
//! down can never leave a dangling link behind.

pub use slotmap::{Key, SlotMap};

slotmap::new_key_type! {
    /// Handle to a [`Collider`](crate::physics::Collider) inside a space
    pub struct ColliderHandle;
    /// Handle to a [`RigidBody`](crate::physics::RigidBody) inside a space
    pub struct BodyHandle;
    /// Handle to a [`PhysicsNode`](crate::physics::PhysicsNode) inside a space
    pub struct NodeHandle;
    /// Handle to a persistent [`Contact`](crate::physics::Contact)
    pub struct ContactHandle;
    /// Handle to a [`Joint`](crate::physics::Joint) inside a space
    pub struct JointHandle;
    /// Handle to a [`PhysicsSpace`](crate::physics::PhysicsSpace) owned by an engine
    pub struct SpaceHandle;
}

/// Handle-based map using slot map for stable references
pub type HandleMap<K, T> = SlotMap<K, T>;

/// Monotonic id source owned by a single pool.
///
/// Ids start at 1 so that 0 can be used as "no id" by callers that pack ids.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    last: u32,
}

impl IdAllocator {
    /// Create a fresh allocator
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    /// Hand out the next id
    pub fn next_id(&mut self) -> u32 {
        self.last = self.last.wrapping_add(1).max(1);
        self.last
    }
}

/// Pack two ids into one key that is independent of argument order
pub fn lexicographic_id(id1: u32, id2: u32) -> u64 {
    let (low, high) = if id1 <= id2 { (id1, id2) } else { (id2, id1) };
    (u64::from(low) << 32) | u64::from(high)
}

/// Inverse of [`lexicographic_id`]; the smaller id comes first
pub const fn unpack_lexicographic_id(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed & 0xFFFF_FFFF) as u32)
}

/// Stable 64-bit FNV-1a hash of a resource name
pub fn name_hash(name: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    name.bytes()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(PRIME))
}

/// Slot map with a hard capacity.
///
/// Inserting past the capacity fails instead of growing, which is how the
/// contact pool reports exhaustion.
#[derive(Debug)]
pub struct BoundedPool<K: Key, T> {
    items: SlotMap<K, T>,
    capacity: usize,
}

impl<K: Key, T> BoundedPool<K, T> {
    /// Create a pool that holds at most `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: SlotMap::with_capacity_and_key(capacity.min(4096)),
            capacity,
        }
    }

    /// Insert an item, returning it back if the pool is full
    pub fn insert(&mut self, item: T) -> Result<K, T> {
        if self.items.len() >= self.capacity {
            return Err(item);
        }
        Ok(self.items.insert(item))
    }

    /// Remove an item by handle
    pub fn remove(&mut self, key: K) -> Option<T> {
        self.items.remove(key)
    }

    /// Get an item by handle
    pub fn get(&self, key: K) -> Option<&T> {
        self.items.get(key)
    }

    /// Get a mutable reference to an item by handle
    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.items.get_mut(key)
    }

    /// Whether the handle still refers to a live item
    pub fn contains(&self, key: K) -> bool {
        self.items.contains_key(key)
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of live items
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over live items
    pub fn iter(&self) -> slotmap::basic::Iter<'_, K, T> {
        self.items.iter()
    }

    /// Iterate mutably over live items
    pub fn iter_mut(&mut self) -> slotmap::basic::IterMut<'_, K, T> {
        self.items.iter_mut()
    }

    /// Keys of live items
    pub fn keys(&self) -> slotmap::basic::Keys<'_, K, T> {
        self.items.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexicographic_id_is_order_independent() {
        assert_eq!(lexicographic_id(3, 9), lexicographic_id(9, 3));
        assert_eq!(unpack_lexicographic_id(lexicographic_id(9, 3)), (3, 9));
    }

    #[test]
    fn test_id_allocator_is_per_instance() {
        let mut a = IdAllocator::new();
        let mut b = IdAllocator::new();
        assert_eq!(a.next_id(), 1);
        assert_eq!(a.next_id(), 2);
        assert_eq!(b.next_id(), 1);
    }

    #[test]
    fn test_bounded_pool_rejects_past_capacity() {
        let mut pool: BoundedPool<ContactHandle, u32> = BoundedPool::with_capacity(2);
        let first = pool.insert(1).ok();
        assert!(first.is_some());
        assert!(pool.insert(2).is_ok());
        assert_eq!(pool.insert(3), Err(3));

        if let Some(handle) = first {
            assert_eq!(pool.remove(handle), Some(1));
        }
        assert!(pool.insert(4).is_ok());
        assert_eq!(pool.len(), 2);
    }
}
