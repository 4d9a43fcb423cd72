//! Vulkan instance creation.

use std::ffi::{c_char, CStr, CString};

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use crate::backend::traits::{BackendError, BackendResult};
use crate::config::RendererConfig;

use super::debug;

/// Dynamic rendering and synchronization are core in 1.3.
pub const REQUIRED_API_VERSION: u32 = vk::make_api_version(0, 1, 3, 0);

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

pub struct DebugMessenger {
    pub utils: ash::ext::debug_utils::Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

/// Create an instance with the surface extensions `display` needs, if any.
pub fn create_instance(
    entry: &ash::Entry,
    config: &RendererConfig,
    display: Option<RawDisplayHandle>,
) -> BackendResult<(ash::Instance, Option<DebugMessenger>)> {
    let validation = config.validation && check_validation_layer_support(entry);
    if config.validation && !validation {
        log::warn!("Validation layers requested but not available");
    }

    let app_name = CString::new(config.app_name.as_str())
        .map_err(|e| BackendError::InitializationFailed(format!("Invalid application name: {}", e)))?;
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(c"Stimulus Renderer")
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(REQUIRED_API_VERSION);

    let mut extensions: Vec<*const c_char> = match display {
        Some(display) => ash_window::enumerate_required_extensions(display)
            .map_err(|e| {
                BackendError::InitializationFailed(format!(
                    "Failed to query surface extensions: {:?}",
                    e
                ))
            })?
            .to_vec(),
        None => Vec::new(),
    };
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }

    #[allow(unused_mut)]
    let mut create_flags = vk::InstanceCreateFlags::empty();
    #[cfg(target_os = "macos")]
    {
        extensions.push(ash::khr::portability_enumeration::NAME.as_ptr());
        create_flags |= vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    }

    let layer_names: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo::default()
        .flags(create_flags)
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);

    let instance = unsafe { entry.create_instance(&create_info, None) }.map_err(|e| {
        BackendError::InitializationFailed(format!("Failed to create Vulkan instance: {:?}", e))
    })?;

    let messenger = if validation {
        let utils = ash::ext::debug_utils::Instance::new(entry, &instance);
        match debug::create_debug_messenger(&utils) {
            Ok(messenger) => Some(DebugMessenger { utils, messenger }),
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        }
    } else {
        None
    };

    log::info!(
        "Created Vulkan instance (validation: {}, surface: {})",
        validation,
        display.is_some()
    );
    Ok((instance, messenger))
}

fn check_validation_layer_support(entry: &ash::Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers.iter().any(|layer| {
        layer
            .layer_name_as_c_str()
            .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
    })
}
