//! Queue family discovery and assignment of queue families to the roles the renderer needs.
//!
//! Vulkan has no notion of a "graphics queue" or a "transfer queue". Instead it exposes queue families with a set
//! of capabilities. [`Queues`] picks one family for every [`QueueRole`], trying to spread the roles over different
//! hardware queues when possible. Roles may end up sharing a family; roles without any suitable family are left
//! unassigned and fall back to the graphic family through [`Queues::get_or_graphic`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use anyhow::Result;
use ash::vk;

use crate::command_buffer::command_pool::CommandPool;
use crate::core::traits::{GpuDevice, SubmitDesc};
use crate::{Device, Error, Fence};

/// The different jobs a queue family can be assigned to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum QueueRole {
    /// Main rendering queue.
    Graphic,
    /// Queue used to present swapchain images.
    Present,
    /// Queue used for uploads. Prefers a family without graphics or compute support.
    Transfer,
    /// Compute work that is synchronized with rendering. Usually shares the graphic family.
    Compute,
    /// Compute work that runs asynchronously. Never shares a family with the graphic, present or compute roles.
    AsyncCompute,
}

impl QueueRole {
    /// Every role, in resolution report order.
    pub const ALL: [QueueRole; 5] = [
        QueueRole::Graphic,
        QueueRole::Present,
        QueueRole::Transfer,
        QueueRole::Compute,
        QueueRole::AsyncCompute,
    ];
}

/// A single entry in the ordered preference list given to [`find_best_suited_queue_family`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Preference {
    /// Scores when the family supports all of these flags.
    Prefer(vk::QueueFlags),
    /// Scores when the family supports none of these flags.
    Avoid(vk::QueueFlags),
}

impl Preference {
    fn satisfied_by(&self, flags: vk::QueueFlags) -> bool {
        match self {
            Preference::Prefer(wanted) => flags.contains(*wanted),
            Preference::Avoid(unwanted) => !flags.intersects(*unwanted),
        }
    }
}

/// Properties of a queue family as reported by the physical device.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// The queue family index.
    pub index: u32,
    /// Capabilities reported by the driver.
    pub flags: vk::QueueFlags,
    /// Whether this family can present to the target surface.
    pub present: bool,
}

#[derive(Derivative)]
#[derivative(Debug)]
struct BoundQueue<D: GpuDevice> {
    #[derivative(Debug = "ignore")]
    device: Arc<D>,
    queue: Mutex<vk::Queue>,
    pool: CommandPool<D>,
}

/// A queue family on the device. The capabilities are fixed, the present support may be updated when the surface
/// changes. The native queue and the command pool serving this family are bound by [`QueueFamily::init_queue`]
/// once a logical device exists.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct QueueFamily<D: GpuDevice = Device> {
    index: u32,
    flags: vk::QueueFlags,
    present: AtomicBool,
    #[derivative(Debug = "ignore")]
    bound: OnceLock<BoundQueue<D>>,
}

impl<D: GpuDevice> QueueFamily<D> {
    /// Create an unbound queue family.
    pub fn new(info: QueueFamilyInfo) -> Self {
        QueueFamily {
            index: info.index,
            flags: info.flags,
            present: AtomicBool::new(info.present),
            bound: OnceLock::new(),
        }
    }

    /// The queue family index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Supported operations. Graphics and compute families always support transfer operations,
    /// so the transfer bit is added for them even if the driver does not report it.
    pub fn flags(&self) -> vk::QueueFlags {
        if self.flags.intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE) {
            self.flags | vk::QueueFlags::TRANSFER
        } else {
            self.flags
        }
    }

    /// Whether this family can present to the surface.
    pub fn supports_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    pub(crate) fn set_present(&self, supported: bool) {
        self.present.store(supported, Ordering::Release);
    }

    /// Bind the native queue of this family and create its command pool. Does nothing if already bound.
    pub fn init_queue(&self, device: Arc<D>, pool_flags: vk::CommandPoolCreateFlags) -> Result<()> {
        if self.bound.get().is_some() {
            return Ok(());
        }
        let queue = device.get_queue(self.index, 0);
        let pool = CommandPool::new(device.clone(), self.index, pool_flags);
        // Losing a race against another thread is fine, both would bind the same queue.
        let _ = self.bound.set(BoundQueue {
            device,
            queue: Mutex::new(queue),
            pool,
        });
        Ok(())
    }

    /// Whether [`QueueFamily::init_queue`] was called.
    pub fn is_initialized(&self) -> bool {
        self.bound.get().is_some()
    }

    fn bound(&self) -> Result<&BoundQueue<D>> {
        Ok(self.bound.get().ok_or(Error::QueueNotInitialized(self.index))?)
    }

    /// The command pool owned by this family.
    pub fn command_pool(&self) -> Result<&CommandPool<D>> {
        Ok(&self.bound()?.pool)
    }

    /// The device this family was bound on.
    pub fn device(&self) -> Result<&Arc<D>> {
        Ok(&self.bound()?.device)
    }

    /// Lock the native queue. Queue access must be externally synchronized, so every submission goes through this lock.
    pub fn queue(&self) -> Result<MutexGuard<vk::Queue>> {
        Ok(self.bound()?.queue.lock().map_err(|_| Error::PoisonError)?)
    }

    /// Submit work to this family's queue, signaling `fence` once it completes.
    pub fn submit(&self, submit: &SubmitDesc, fence: Option<&Fence<D>>) -> Result<()> {
        let fence = match fence {
            None => vk::Fence::null(),
            // SAFETY: The fence outlives this call.
            Some(fence) => unsafe { fence.handle() },
        };
        let bound = self.bound()?;
        let queue = bound.queue.lock().map_err(|_| Error::PoisonError)?;
        bound.device.queue_submit(*queue, submit, fence)
    }
}

/// Pick the family from `available` that best matches the request.
///
/// Families missing any of `required` (or present support, if `require_present` is set) are rejected.
/// The remaining families are scored with the ordered preference list: each satisfied entry adds a weight that
/// is larger than the combined weight of all entries after it. The highest score wins. On ties, the family
/// encountered first is returned.
pub fn find_best_suited_queue_family<D: GpuDevice>(
    available: &[Arc<QueueFamily<D>>],
    required: vk::QueueFlags,
    require_present: bool,
    preferences: &[Preference],
) -> Option<Arc<QueueFamily<D>>> {
    let count = preferences.len() as u32;
    let mut best: Option<(u64, &Arc<QueueFamily<D>>)> = None;
    for family in available {
        let flags = family.flags();
        if !flags.contains(required) || (require_present && !family.supports_present()) {
            continue;
        }
        let score = preferences
            .iter()
            .enumerate()
            .filter(|(_, preference)| preference.satisfied_by(flags))
            .map(|(i, _)| 1u64 << (count - 1 - i as u32))
            .sum::<u64>();
        match best {
            Some((best_score, _)) if best_score >= score => {}
            _ => best = Some((score, family)),
        }
    }
    best.map(|(_, family)| family.clone())
}

fn without<D: GpuDevice>(families: &[Arc<QueueFamily<D>>], excluded: &[&Option<Arc<QueueFamily<D>>>]) -> Vec<Arc<QueueFamily<D>>> {
    families
        .iter()
        .filter(|family| {
            !excluded
                .iter()
                .any(|excluded| excluded.as_ref().map_or(false, |excluded| Arc::ptr_eq(excluded, family)))
        })
        .cloned()
        .collect()
}

/// All queue families of a device, together with the role assignment.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Queues<D: GpuDevice = Device> {
    families: Vec<Arc<QueueFamily<D>>>,
    preferred: RwLock<HashMap<QueueRole, Arc<QueueFamily<D>>>>,
}

impl<D: GpuDevice> Queues<D> {
    /// Create the family list and resolve roles.
    pub fn new(families: impl IntoIterator<Item = QueueFamilyInfo>) -> Self {
        let families = families
            .into_iter()
            .map(|info| Arc::new(QueueFamily::new(info)))
            .collect::<Vec<_>>();
        let preferred = Self::resolve(&families);
        Queues {
            families,
            preferred: RwLock::new(preferred),
        }
    }

    /// Enumerate the queue families of a physical device. `present_support` is queried for every family index.
    pub fn from_physical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        present_support: impl Fn(u32) -> bool,
    ) -> Self {
        // SAFETY: physical_device is a valid handle obtained from `instance`.
        let properties = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        Self::new(
            properties
                .iter()
                .enumerate()
                .filter(|(_, properties)| properties.queue_count > 0)
                .map(|(index, properties)| QueueFamilyInfo {
                    index: index as u32,
                    flags: properties.queue_flags,
                    present: present_support(index as u32),
                }),
        )
    }

    fn resolve(families: &[Arc<QueueFamily<D>>]) -> HashMap<QueueRole, Arc<QueueFamily<D>>> {
        use Preference::*;

        let compute = find_best_suited_queue_family(families, vk::QueueFlags::COMPUTE, false, &[Prefer(vk::QueueFlags::GRAPHICS)]);
        let mut transfer = find_best_suited_queue_family(
            families,
            vk::QueueFlags::TRANSFER,
            false,
            &[Avoid(vk::QueueFlags::GRAPHICS), Avoid(vk::QueueFlags::COMPUTE)],
        );
        let graphic = find_best_suited_queue_family(
            families,
            vk::QueueFlags::GRAPHICS,
            false,
            &[Prefer(vk::QueueFlags::COMPUTE), Prefer(vk::QueueFlags::TRANSFER)],
        );
        let present = find_best_suited_queue_family(&without(families, &[&graphic, &compute]), vk::QueueFlags::empty(), true, &[])
            .or_else(|| find_best_suited_queue_family(families, vk::QueueFlags::empty(), true, &[Prefer(vk::QueueFlags::GRAPHICS)]));

        let pool = without(families, &[&graphic, &present, &compute]);
        let async_compute = find_best_suited_queue_family(
            &pool,
            vk::QueueFlags::COMPUTE,
            false,
            &[Avoid(vk::QueueFlags::GRAPHICS), Avoid(vk::QueueFlags::TRANSFER)],
        );
        let pool = without(&pool, &[&async_compute]);
        if let Some(dedicated) = find_best_suited_queue_family(
            &pool,
            vk::QueueFlags::TRANSFER,
            false,
            &[Avoid(vk::QueueFlags::GRAPHICS), Avoid(vk::QueueFlags::COMPUTE)],
        ) {
            transfer = Some(dedicated);
        }

        let mut preferred = HashMap::new();
        for (role, family) in [
            (QueueRole::Graphic, graphic),
            (QueueRole::Present, present),
            (QueueRole::Transfer, transfer),
            (QueueRole::Compute, compute),
            (QueueRole::AsyncCompute, async_compute),
        ] {
            match family {
                Some(family) => {
                    info!("Queue role {role:?} assigned to family {}", family.index());
                    preferred.insert(role, family);
                }
                None => warn!("No queue family available for role {role:?}"),
            }
        }
        preferred
    }

    /// All queue families of the device.
    pub fn families(&self) -> &[Arc<QueueFamily<D>>] {
        self.families.as_slice()
    }

    /// Get the family with the given index.
    pub fn family(&self, index: u32) -> Option<&Arc<QueueFamily<D>>> {
        self.families.iter().find(|family| family.index() == index)
    }

    /// Get the family assigned to a role, if any.
    pub fn get(&self, role: QueueRole) -> Option<Arc<QueueFamily<D>>> {
        self.preferred.read().ok()?.get(&role).cloned()
    }

    /// Get the family assigned to a role, falling back to the graphic family.
    pub fn get_or_graphic(&self, role: QueueRole) -> Result<Arc<QueueFamily<D>>> {
        self.get(role)
            .or_else(|| self.get(QueueRole::Graphic))
            .ok_or_else(|| Error::NoCapableQueue(role).into())
    }

    /// Update the present support of a family and recompute the role assignment.
    pub fn set_present_support(&self, index: u32, supported: bool) -> Result<()> {
        let family = self
            .family(index)
            .ok_or(Error::Uncategorized("Unknown queue family index."))?;
        if family.supports_present() == supported {
            return Ok(());
        }
        family.set_present(supported);
        let preferred = Self::resolve(&self.families);
        *self.preferred.write().map_err(|_| Error::PoisonError)? = preferred;
        Ok(())
    }

    /// The unique family indices assigned to at least one role, in ascending order.
    /// These are the families a logical device must request queues for.
    pub fn used_families(&self) -> Vec<u32> {
        let mut used = QueueRole::ALL
            .iter()
            .filter_map(|role| self.get(*role))
            .map(|family| family.index())
            .collect::<Vec<_>>();
        used.sort_unstable();
        used.dedup();
        used
    }

    /// Bind native queues and command pools for every family assigned to a role.
    pub fn init_queues(&self, device: &Arc<D>, pool_flags: vk::CommandPoolCreateFlags) -> Result<()> {
        for index in self.used_families() {
            if let Some(family) = self.family(index) {
                family.init_queue(device.clone(), pool_flags)?;
            }
        }
        Ok(())
    }
}
