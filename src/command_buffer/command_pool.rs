use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use anyhow::Result;
use ash::vk;

use crate::core::traits::GpuDevice;
use crate::{Device, Error};

/// Command pools may only be used from one thread at a time. This keeps one native pool per thread for a single
/// queue family. Pools are created the first time a thread allocates from the family, and live until the
/// `CommandPool` itself is dropped.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CommandPool<D: GpuDevice = Device> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    family: u32,
    flags: vk::CommandPoolCreateFlags,
    pools: Mutex<HashMap<ThreadId, vk::CommandPool>>,
}

impl<D: GpuDevice> CommandPool<D> {
    /// Create an empty command pool set for a queue family. No native pools are created yet.
    pub fn new(device: Arc<D>, family: u32, flags: vk::CommandPoolCreateFlags) -> Self {
        CommandPool {
            device,
            family,
            flags,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// The queue family this pool allocates for.
    pub fn family(&self) -> u32 {
        self.family
    }

    /// Allocate a primary command buffer from the pool owned by the calling thread.
    pub fn allocate(&self) -> Result<vk::CommandBuffer> {
        let thread = thread::current().id();
        // The lock is held during allocation, since native pools must be externally synchronized.
        let mut pools = self.pools.lock().map_err(|_| Error::PoisonError)?;
        let pool = match pools.get(&thread) {
            Some(pool) => *pool,
            None => {
                let pool = self.device.create_command_pool(self.family, self.flags)?;
                debug!("Created command pool for thread {thread:?} on queue family {}", self.family);
                pools.insert(thread, pool);
                pool
            }
        };
        self.device.allocate_command_buffer(pool)
    }

    /// Free a command buffer into the pool of the thread that allocated it, which need not be the calling thread.
    pub fn free(&self, cmd: vk::CommandBuffer, thread: ThreadId) -> Result<()> {
        let pools = self.pools.lock().map_err(|_| Error::PoisonError)?;
        let pool = pools
            .get(&thread)
            .ok_or(Error::Uncategorized("Command buffer freed on a thread that never allocated from this pool."))?;
        // SAFETY: We hold the lock, so the pool is externally synchronized. The command buffer was allocated from
        // this pool since allocations are keyed by thread.
        unsafe {
            self.device.free_command_buffer(*pool, cmd);
        }
        Ok(())
    }

    /// The native pool owned by a thread, if it allocated from this pool before.
    pub fn native_pool(&self, thread: ThreadId) -> Option<vk::CommandPool> {
        self.pools.lock().ok()?.get(&thread).copied()
    }

    /// Number of native pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.lock().map(|pools| pools.len()).unwrap_or_default()
    }
}

impl<D: GpuDevice> Drop for CommandPool<D> {
    fn drop(&mut self) {
        let pools = match self.pools.get_mut() {
            Ok(pools) => pools,
            Err(_) => return,
        };
        for (_, pool) in pools.drain() {
            // SAFETY: All command buffers keep their family (and thus this pool) alive, so none can still exist.
            unsafe { self.device.destroy_command_pool(pool) };
        }
    }
}
