//! Physical device selection and logical device creation.

use ash::vk;

use crate::backend::traits::{BackendError, BackendResult};

use super::instance::REQUIRED_API_VERSION;

/// Surface a selected queue family must be able to present to
pub struct PresentTarget<'a> {
    pub loader: &'a ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
}

pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub queue_family: u32,
    pub name: String,
}

/// Pick the best device with a graphics queue, preferring discrete GPUs.
pub fn select_physical_device(
    instance: &ash::Instance,
    present: Option<&PresentTarget<'_>>,
) -> BackendResult<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to enumerate physical devices: {:?}", e))
    })?;
    if devices.is_empty() {
        return Err(BackendError::InitializationFailed(
            "No Vulkan-capable GPU found".to_string(),
        ));
    }

    let mut best: Option<(u32, SelectedDevice)> = None;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        if properties.api_version < REQUIRED_API_VERSION {
            log::info!("Skipping GPU {} (Vulkan 1.3 not supported)", name);
            continue;
        }
        let Some(queue_family) = find_queue_family(instance, device, present) else {
            log::info!("Skipping GPU {} (no suitable queue family)", name);
            continue;
        };

        let mut score = match properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 0,
        };
        score += properties.limits.max_image_dimension2_d / 1024;
        log::info!(
            "Found GPU: {} (type: {:?}, score: {})",
            name,
            properties.device_type,
            score
        );

        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((
                score,
                SelectedDevice {
                    physical_device: device,
                    queue_family,
                    name,
                },
            ));
        }
    }

    best.map(|(_, selected)| selected)
        .ok_or_else(|| BackendError::InitializationFailed("No suitable GPU found".to_string()))
}

fn find_queue_family(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    present: Option<&PresentTarget<'_>>,
) -> Option<u32> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    families.iter().enumerate().find_map(|(index, family)| {
        let index = index as u32;
        if !family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            return None;
        }
        let presentable = match present {
            Some(target) => unsafe {
                target
                    .loader
                    .get_physical_device_surface_support(device, index, target.surface)
            }
            .unwrap_or(false),
            None => true,
        };
        presentable.then_some(index)
    })
}

/// Logical device with one graphics queue and dynamic rendering enabled.
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    presenting: bool,
) -> BackendResult<ash::Device> {
    let queue_priorities = [1.0f32];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(selected.queue_family)
        .queue_priorities(&queue_priorities)];

    let device_extensions = if presenting {
        vec![ash::khr::swapchain::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let features = vk::PhysicalDeviceFeatures::default();
    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&device_extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan_13_features);

    unsafe { instance.create_device(selected.physical_device, &create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create logical device: {:?}", e))
    })
}
