//! Exposes the settings used to initialize a [`Context`](crate::Context).

use ash::vk;

/// Default number of frames that can be in flight at the same time. Dynamic and immediate buffers keep one copy
/// of their data per frame in flight.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Settings used to initialize a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSettings {
    /// Debug name of the context, used in log output.
    pub name: String,
    /// Number of images that can be in flight at once. This is normally the swapchain image count.
    pub in_flight: usize,
    /// Number of frames an object pushed to the deferred deletion queue is kept alive for.
    pub deletion_latency: u32,
    /// Number of frames a cached render pass or pipeline layout survives without being requested,
    /// once nothing outside of the cache references it.
    pub cache_ttl: u32,
    /// Flags used for every native command pool.
    pub command_pool_flags: vk::CommandPoolCreateFlags,
}

impl Default for ContextSettings {
    fn default() -> Self {
        ContextSettings {
            name: String::from("framegraph"),
            in_flight: FRAMES_IN_FLIGHT,
            deletion_latency: FRAMES_IN_FLIGHT as u32 + 1,
            cache_ttl: 8,
            // Command buffers are re-recorded every frame and one-shot uploads are short-lived.
            command_pool_flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER | vk::CommandPoolCreateFlags::TRANSIENT,
        }
    }
}

/// The context builder is a convenience struct to easily create [`ContextSettings`].
///
/// For information about each of the fields, see [`ContextSettings`]
/// # Example
/// ```
/// # use framegraph::*;
/// let settings = ContextBuilder::new()
///     .name("my renderer")
///     .in_flight(3)
///     .build();
/// assert_eq!(settings.deletion_latency, 4);
/// ```
#[derive(Debug, Default)]
pub struct ContextBuilder {
    inner: ContextSettings,
    explicit_latency: bool,
}

impl ContextBuilder {
    /// Create a new context builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the debug name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.inner.name = name.into();
        self
    }

    /// Sets the number of images in flight. Values below one are clamped to one.
    /// Unless set explicitly, the deletion latency follows this value.
    pub fn in_flight(mut self, count: usize) -> Self {
        self.inner.in_flight = count.max(1);
        if !self.explicit_latency {
            self.inner.deletion_latency = self.inner.in_flight as u32 + 1;
        }
        self
    }

    /// Sets the number of frames deferred deletions are delayed by.
    pub fn deletion_latency(mut self, frames: u32) -> Self {
        self.inner.deletion_latency = frames.max(1);
        self.explicit_latency = true;
        self
    }

    /// Sets the time to live of unused cache entries, in frames.
    pub fn cache_ttl(mut self, frames: u32) -> Self {
        self.inner.cache_ttl = frames.max(1);
        self
    }

    /// Sets the flags used to create command pools.
    pub fn command_pool_flags(mut self, flags: vk::CommandPoolCreateFlags) -> Self {
        self.inner.command_pool_flags = flags;
        self
    }

    /// Build the resulting settings.
    pub fn build(self) -> ContextSettings {
        self.inner
    }
}
