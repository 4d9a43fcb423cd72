//! Window surface and swapchain on top of [`VulkanDevice`].

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::backend::traits::{BackendError, BackendResult, ImageHandle, SemaphoreHandle, Swapchain};
use crate::backend::types::{Extent2d, TextureFormat};
use crate::config::{PresentMode, RendererConfig};

use super::conversion::{convert_present_mode, map_vk_error, texture_format_from_vk};
use super::VulkanDevice;

/// Presentation surface of a window, destroyed on drop
pub struct VulkanSurface {
    device: Arc<VulkanDevice>,
    surface: vk::SurfaceKHR,
}

impl VulkanSurface {
    pub(super) fn new(device: Arc<VulkanDevice>, surface: vk::SurfaceKHR) -> Self {
        Self { device, surface }
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }
}

impl Drop for VulkanSurface {
    fn drop(&mut self) {
        unsafe {
            self.device
                .surface_loader()
                .destroy_surface(self.surface, None)
        };
    }
}

struct SwapchainState {
    swapchain: vk::SwapchainKHR,
    images: Vec<ImageHandle>,
    extent: Extent2d,
    format: TextureFormat,
    requested_extent: Extent2d,
}

/// Swapchain whose images are registered as device images
pub struct VulkanSwapchain {
    device: Arc<VulkanDevice>,
    present_mode: PresentMode,
    image_count: u32,
    state: Mutex<SwapchainState>,
    // Dropped after the swapchain itself
    surface: VulkanSurface,
}

impl VulkanSwapchain {
    pub fn new(surface: VulkanSurface, config: &RendererConfig) -> BackendResult<Self> {
        let requested_extent = Extent2d::new(config.width, config.height);
        let swapchain = Self {
            device: surface.device.clone(),
            present_mode: config.present_mode,
            image_count: config.image_count,
            state: Mutex::new(SwapchainState {
                swapchain: vk::SwapchainKHR::null(),
                images: Vec::new(),
                extent: requested_extent,
                format: TextureFormat::Bgra8UnormSrgb,
                requested_extent,
            }),
            surface,
        };
        swapchain.rebuild()?;
        Ok(swapchain)
    }

    /// Size used on the next recreate when the surface does not dictate one.
    pub fn set_requested_extent(&self, extent: Extent2d) {
        self.state.lock().requested_extent = extent;
    }

    fn rebuild(&self) -> BackendResult<()> {
        let loader = self.device.swapchain_loader()?;
        let surface_loader = self.device.surface_loader();
        let physical_device = self.device.physical_device();
        let surface = self.surface.surface;
        let mut state = self.state.lock();

        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(|e| map_vk_error(e, BackendError::SwapchainCreationFailed))?;
        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface) }
                .map_err(|e| map_vk_error(e, BackendError::SwapchainCreationFailed))?;
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(|e| map_vk_error(e, BackendError::SwapchainCreationFailed))?;

        let surface_format = formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| {
                formats
                    .iter()
                    .find(|f| texture_format_from_vk(f.format).is_some())
            })
            .copied()
            .ok_or_else(|| {
                BackendError::SwapchainCreationFailed("No supported surface format".to_string())
            })?;
        let format = texture_format_from_vk(surface_format.format).ok_or_else(|| {
            BackendError::SwapchainCreationFailed(format!(
                "Unsupported surface format {:?}",
                surface_format.format
            ))
        })?;

        let wanted_mode = convert_present_mode(self.present_mode);
        let present_mode = if present_modes.contains(&wanted_mode) {
            wanted_mode
        } else {
            log::warn!("Present mode {:?} unavailable, using FIFO", self.present_mode);
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: state.requested_extent.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: state.requested_extent.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            // Minimized window, try again on a later frame
            return Err(BackendError::OutOfDateSwapchain);
        }

        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let min_image_count = self.image_count.clamp(capabilities.min_image_count, max_images);
        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_DST)
        {
            usage |= vk::ImageUsageFlags::TRANSFER_DST;
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(state.swapchain);
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::SwapchainCreationFailed))?;

        for image in state.images.drain(..) {
            self.device.release_external_image(image);
        }
        if state.swapchain != vk::SwapchainKHR::null() {
            unsafe { loader.destroy_swapchain(state.swapchain, None) };
        }
        state.swapchain = swapchain;

        let extent = Extent2d::new(extent.width, extent.height);
        let raw_images = unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(|e| map_vk_error(e, BackendError::SwapchainCreationFailed))?;
        for raw in raw_images {
            let image = self.device.register_external_image(raw, format, extent)?;
            state.images.push(image);
        }
        state.extent = extent;
        state.format = format;

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            state.images.len(),
            format,
            present_mode
        );
        Ok(())
    }
}

impl Swapchain for VulkanSwapchain {
    fn image_count(&self) -> u32 {
        self.state.lock().images.len() as u32
    }

    fn extent(&self) -> Extent2d {
        self.state.lock().extent
    }

    fn format(&self) -> TextureFormat {
        self.state.lock().format
    }

    fn images(&self) -> Vec<ImageHandle> {
        self.state.lock().images.clone()
    }

    fn next_image_index(&self, signal: SemaphoreHandle) -> BackendResult<u32> {
        let semaphores = self.device.raw_semaphores(&[signal])?;
        let loader = self.device.swapchain_loader()?;
        let state = self.state.lock();
        let (index, suboptimal) = unsafe {
            loader.acquire_next_image(state.swapchain, u64::MAX, semaphores[0], vk::Fence::null())
        }
        .map_err(|e| map_vk_error(e, BackendError::AcquireImageFailed))?;
        if suboptimal {
            log::debug!("Acquired image {} from a suboptimal swapchain", index);
        }
        Ok(index)
    }

    fn present(&self, image_index: u32, wait_semaphores: &[SemaphoreHandle]) -> BackendResult<()> {
        let waits = self.device.raw_semaphores(wait_semaphores)?;
        let state = self.state.lock();
        let swapchains = [state.swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);
        let suboptimal = self.device.queue_present(&present_info)?;
        if suboptimal {
            log::debug!("Presented image {} to a suboptimal swapchain", image_index);
        }
        Ok(())
    }

    fn supports_presenting(&self) -> bool {
        true
    }

    fn recreate(&self) -> BackendResult<()> {
        crate::backend::GraphicsDevice::wait_idle(&*self.device)?;
        self.rebuild()
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        let _ = crate::backend::GraphicsDevice::wait_idle(&*self.device);
        let state = self.state.get_mut();
        for image in state.images.drain(..) {
            self.device.release_external_image(image);
        }
        if state.swapchain != vk::SwapchainKHR::null() {
            if let Ok(loader) = self.device.swapchain_loader() {
                unsafe { loader.destroy_swapchain(state.swapchain, None) };
            }
        }
    }
}
