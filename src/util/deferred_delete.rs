//! Frame-latency based deferred destruction.
//!
//! GPU objects that may still be referenced by in-flight command buffers cannot be destroyed right away.
//! Pushing them onto a [`DeletionQueue`] keeps them alive for a fixed number of frames, after which they are dropped.

#[derive(Debug)]
struct Item<T> {
    value: T,
    // Time to live
    ttl: u32,
}

/// A queue of values that are dropped after a number of calls to [`DeletionQueue::next_frame`].
#[derive(Debug)]
pub struct DeletionQueue<T> {
    max_ttl: u32,
    items: Vec<Item<T>>,
}

impl<T> DeletionQueue<T> {
    /// Create a queue that keeps values alive for `max_ttl` frames. A latency of zero is treated as one.
    pub fn new(max_ttl: u32) -> DeletionQueue<T> {
        DeletionQueue {
            max_ttl: max_ttl.max(1),
            items: vec![],
        }
    }

    /// Pushes a value onto the deletion queue.
    /// Note that this moves out of the parameter so that you can't access an object after
    /// it is pushed.
    pub fn push(&mut self, value: T) {
        self.items.push(Item {
            value,
            ttl: self.max_ttl,
        });
    }

    /// Advance the frame counter by one, decreasing time to live by one on each element.
    /// If time to live of an element reaches zero, it is deleted.
    pub fn next_frame(&mut self) {
        self.items.iter_mut().for_each(|item| item.ttl -= 1);
        self.items.retain(|item| item.ttl != 0);
    }

    /// Drop every value right away, regardless of its time to live.
    pub fn flush(&mut self) {
        self.items.clear();
    }

    /// Number of values waiting to be dropped.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the values still pending deletion.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter().map(|item| &item.value)
    }
}
