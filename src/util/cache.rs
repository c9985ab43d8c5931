//! A time-to-live cache for immutable, content-addressed GPU objects.
//!
//! Values are handed out as `Arc`s, so requesting the same key twice yields the same object. Every call to
//! [`Cache::next_frame`] ages the entries that nobody outside the cache references anymore. Once such an entry has
//! not been requested for its time to live, it is evicted.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::Result;

use crate::core::traits::GpuDevice;

/// An object that can be created from a key and stored in a [`Cache`].
pub trait Resource<D: GpuDevice>: Sized {
    /// Key the object is created from. Equal keys must describe interchangeable objects.
    type Key: Hash + Eq + Clone;

    /// Create the object.
    fn create(device: Arc<D>, key: &Self::Key) -> Result<Self>;
}

#[derive(Debug)]
struct Entry<R> {
    value: Arc<R>,
    ttl: u32,
}

/// See the module level documentation.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Cache<D: GpuDevice, R: Resource<D>> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    max_ttl: u32,
    #[derivative(Debug = "ignore")]
    store: HashMap<R::Key, Entry<R>>,
}

impl<D: GpuDevice, R: Resource<D>> Cache<D, R> {
    /// Create an empty cache whose unused entries live for `max_ttl` frames.
    pub fn new(device: Arc<D>, max_ttl: u32) -> Self {
        Self {
            device,
            max_ttl: max_ttl.max(1),
            store: HashMap::new(),
        }
    }

    /// Get the object for `key`, creating it on first use. Creation errors are propagated and nothing is cached.
    pub fn get_or_create(&mut self, key: &R::Key) -> Result<Arc<R>> {
        if let Some(entry) = self.store.get_mut(key) {
            entry.ttl = self.max_ttl;
            return Ok(entry.value.clone());
        }
        let value = Arc::new(R::create(self.device.clone(), key)?);
        self.store.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                ttl: self.max_ttl,
            },
        );
        Ok(value)
    }

    /// Advance time-to-live values in the cache, deleting values that have not been accessed for a while.
    /// Entries that are still referenced elsewhere are never evicted.
    pub fn next_frame(&mut self) {
        let max_ttl = self.max_ttl;
        self.store.iter_mut().for_each(|(_, entry)| {
            if Arc::strong_count(&entry.value) > 1 {
                entry.ttl = max_ttl;
            } else {
                entry.ttl -= 1;
            }
        });
        self.store.retain(|_, entry| entry.ttl != 0);
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop every cached object.
    pub fn clear(&mut self) {
        self.store.clear();
    }
}
