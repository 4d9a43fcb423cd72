//! Vulkan backend implementation using ash
//!
//! [`VulkanDevice`] implements [`GraphicsDevice`] on a Vulkan 1.3 device with dynamic
//! rendering. Objects live in handle tables keyed by the `u64` inside the backend handles.
//! Buffers are persistently mapped through gpu-allocator.

mod command;
pub mod conversion;
mod debug;
mod device;
mod instance;
pub mod swapchain;

pub use swapchain::{VulkanSurface, VulkanSwapchain};

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};

use crate::backend::command::Command;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::config::RendererConfig;

use self::command::Encoder;
use self::conversion::*;

const DESCRIPTORS_PER_TYPE: u32 = 1000;
const MAX_DESCRIPTOR_SETS: u32 = 1000;

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
}

struct VkImage {
    image: vk::Image,
    view: vk::ImageView,
    /// `None` for images owned by a swapchain.
    allocation: Option<Allocation>,
    extent: Extent3d,
    layers: u32,
    format: TextureFormat,
}

struct VkSet {
    set: vk::DescriptorSet,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

fn lookup<'a, T>(table: &'a HashMap<u64, T>, kind: &'static str, id: u64) -> BackendResult<&'a T> {
    table.get(&id).ok_or(BackendError::InvalidHandle { kind, id })
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    buffers: HashMap<u64, VkBuffer>,
    images: HashMap<u64, VkImage>,
    samplers: HashMap<u64, vk::Sampler>,
    set_layouts: HashMap<u64, vk::DescriptorSetLayout>,
    sets: HashMap<u64, VkSet>,
    pipelines: HashMap<u64, VkPipeline>,
    command_buffers: HashMap<u64, vk::CommandBuffer>,
    semaphores: HashMap<u64, vk::Semaphore>,
    fences: HashMap<u64, vk::Fence>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn image(&self, handle: ImageHandle) -> BackendResult<&VkImage> {
        lookup(&self.images, "image", handle.0)
    }

    fn buffer(&self, handle: BufferHandle) -> BackendResult<vk::Buffer> {
        lookup(&self.buffers, "buffer", handle.0).map(|entry| entry.buffer)
    }

    fn pipeline(&self, handle: PipelineHandle) -> BackendResult<&VkPipeline> {
        lookup(&self.pipelines, "pipeline", handle.0)
    }

    fn set(&self, handle: DescriptorSetHandle) -> BackendResult<&VkSet> {
        lookup(&self.sets, "descriptor set", handle.0)
    }

    fn semaphores(&self, handles: &[SemaphoreHandle]) -> BackendResult<Vec<vk::Semaphore>> {
        handles
            .iter()
            .map(|handle| lookup(&self.semaphores, "semaphore", handle.0).copied())
            .collect()
    }

    fn fence(&self, handle: FenceHandle) -> BackendResult<vk::Fence> {
        lookup(&self.fences, "fence", handle.0).copied()
    }
}

/// Vulkan device with one graphics queue
pub struct VulkanDevice {
    name: String,
    _entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<instance::DebugMessenger>,
    surface_loader: ash::khr::surface::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    queue: Mutex<vk::Queue>,
    allocator: Mutex<Option<Allocator>>,
    command_pool: Mutex<vk::CommandPool>,
    descriptor_pool: Mutex<vk::DescriptorPool>,
    tables: Mutex<Tables>,
}

impl VulkanDevice {
    /// Device for offscreen rendering, without swapchain support.
    pub fn headless(config: &RendererConfig) -> BackendResult<Arc<Self>> {
        let (device, _) = Self::create(config, None)?;
        Ok(Arc::new(device))
    }

    /// Device able to present to `window`, together with the window's surface.
    pub fn with_window<W>(config: &RendererConfig, window: &W) -> BackendResult<(Arc<Self>, VulkanSurface)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();
        let handle = window
            .window_handle()
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?
            .as_raw();

        let (device, surface) = Self::create(config, Some((display, handle)))?;
        let surface = surface.ok_or_else(|| {
            BackendError::SurfaceCreationFailed("no surface created for window".into())
        })?;
        let device = Arc::new(device);
        Ok((device.clone(), VulkanSurface::new(device, surface)))
    }

    fn create(
        config: &RendererConfig,
        window: Option<(RawDisplayHandle, RawWindowHandle)>,
    ) -> BackendResult<(Self, Option<vk::SurfaceKHR>)> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        let (instance, debug) =
            instance::create_instance(&entry, config, window.map(|(display, _)| display))?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let surface = match window {
            Some((display, handle)) => Some(
                unsafe { ash_window::create_surface(&entry, &instance, display, handle, None) }
                    .map_err(|e| BackendError::SurfaceCreationFailed(format!("{:?}", e)))?,
            ),
            None => None,
        };
        let present_target = surface.map(|surface| device::PresentTarget {
            loader: &surface_loader,
            surface,
        });
        let selected = device::select_physical_device(&instance, present_target.as_ref())?;
        let logical = device::create_logical_device(&instance, &selected, surface.is_some())?;
        let queue = unsafe { logical.get_device_queue(selected.queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: logical.clone(),
            physical_device: selected.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            BackendError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
        })?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(selected.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { logical.create_command_pool(&pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: DESCRIPTORS_PER_TYPE,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(MAX_DESCRIPTOR_SETS)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { logical.create_descriptor_pool(&descriptor_pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let swapchain_loader = surface.map(|_| ash::khr::swapchain::Device::new(&instance, &logical));

        log::info!(
            "Vulkan device ready: {} (queue family {})",
            selected.name,
            selected.queue_family
        );

        let device = Self {
            name: selected.name,
            _entry: entry,
            instance,
            debug,
            surface_loader,
            physical_device: selected.physical_device,
            device: logical,
            swapchain_loader,
            queue: Mutex::new(queue),
            allocator: Mutex::new(Some(allocator)),
            command_pool: Mutex::new(command_pool),
            descriptor_pool: Mutex::new(descriptor_pool),
            tables: Mutex::new(Tables::default()),
        };
        Ok((device, surface))
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub(crate) fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    pub(crate) fn swapchain_loader(&self) -> BackendResult<&ash::khr::swapchain::Device> {
        self.swapchain_loader.as_ref().ok_or_else(|| {
            BackendError::SwapchainCreationFailed("device was created without a surface".into())
        })
    }

    pub(crate) fn raw_semaphores(&self, handles: &[SemaphoreHandle]) -> BackendResult<Vec<vk::Semaphore>> {
        self.tables.lock().semaphores(handles)
    }

    pub(crate) fn queue_present(&self, info: &vk::PresentInfoKHR<'_>) -> BackendResult<bool> {
        let loader = self.swapchain_loader()?;
        let queue = self.queue.lock();
        unsafe { loader.queue_present(*queue, info) }
            .map_err(|e| map_vk_error(e, BackendError::PresentFailed))
    }

    /// Track an image owned by a swapchain and move it into `PresentSrc` layout.
    pub(crate) fn register_external_image(
        &self,
        image: vk::Image,
        format: TextureFormat,
        extent: Extent2d,
    ) -> BackendResult<ImageHandle> {
        let view = self.create_view(image, vk::ImageViewType::TYPE_2D, convert_texture_format(format), 1)?;
        self.one_time_submit(|cmd| {
            command::transition(
                &self.device,
                cmd,
                image,
                1,
                ImageLayout::Undefined,
                ImageLayout::PresentSrc,
            )
        })?;

        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.images.insert(
            id,
            VkImage {
                image,
                view,
                allocation: None,
                extent: extent.into(),
                layers: 1,
                format,
            },
        );
        Ok(ImageHandle(id))
    }

    pub(crate) fn release_external_image(&self, handle: ImageHandle) {
        if let Some(image) = self.tables.lock().images.remove(&handle.0) {
            unsafe { self.device.destroy_image_view(image.view, None) };
        }
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
        error: fn(String) -> BackendError,
    ) -> BackendResult<Allocation> {
        let mut allocator = self.allocator.lock();
        let allocator = allocator
            .as_mut()
            .ok_or_else(|| error("allocator not available".into()))?;
        allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| match e {
                gpu_allocator::AllocationError::OutOfMemory => BackendError::OutOfMemory,
                other => error(other.to_string()),
            })
    }

    fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(err) = allocator.free(allocation) {
                log::warn!("Failed to free GPU allocation: {}", err);
            }
        }
    }

    fn create_raw_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> BackendResult<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::BufferCreationFailed))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(
            name,
            requirements,
            MemoryLocation::CpuToGpu,
            true,
            BackendError::BufferCreationFailed,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        if let Err(e) =
            unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free(allocation);
            return Err(map_vk_error(e, BackendError::BufferCreationFailed));
        }
        Ok((buffer, allocation))
    }

    fn create_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: vk::Format,
        layers: u32,
    ) -> BackendResult<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: layers,
            });
        unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::ImageCreationFailed))
    }

    /// Record with `record`, submit and wait for the queue.
    fn one_time_submit(&self, record: impl FnOnce(vk::CommandBuffer)) -> BackendResult<()> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error(e, BackendError::RecordingFailed))?[0];

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
                .map_err(|e| map_vk_error(e, BackendError::RecordingFailed))?;
            record(cmd);
            unsafe { self.device.end_command_buffer(cmd) }
                .map_err(|e| map_vk_error(e, BackendError::RecordingFailed))?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            let queue = self.queue.lock();
            unsafe {
                self.device
                    .queue_submit(*queue, &[submit_info], vk::Fence::null())
                    .map_err(|e| map_vk_error(e, BackendError::SubmitFailed))?;
                self.device
                    .queue_wait_idle(*queue)
                    .map_err(|e| map_vk_error(e, BackendError::SyncFailed))
            }
        })();

        unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
        result
    }
}

impl GraphicsDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("VulkanDevice: creating buffer {:?} (size: {})", desc.label, desc.size);
        let (buffer, allocation) = self.create_raw_buffer(
            desc.label.as_deref().unwrap_or("buffer"),
            desc.size,
            convert_buffer_usage(desc.usage),
        )?;
        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.buffers.insert(id, VkBuffer { buffer, allocation });
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut tables = self.tables.lock();
        let entry = tables
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        let mapped = entry
            .allocation
            .mapped_slice_mut()
            .ok_or_else(|| BackendError::Validation("buffer is not host mapped".into()))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(BackendError::Validation(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> BackendResult<()> {
        let tables = self.tables.lock();
        let entry = lookup(&tables.buffers, "buffer", buffer.0)?;
        let mapped = entry
            .allocation
            .mapped_slice()
            .ok_or_else(|| BackendError::Validation("buffer is not host mapped".into()))?;
        let start = offset as usize;
        let end = start + out.len();
        if end > mapped.len() {
            return Err(BackendError::Validation(format!(
                "read of {} bytes at {} overflows buffer of {} bytes",
                out.len(),
                offset,
                mapped.len()
            )));
        }
        out.copy_from_slice(&mapped[start..end]);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let removed = self.tables.lock().buffers.remove(&buffer.0);
        if let Some(entry) = removed {
            unsafe { self.device.destroy_buffer(entry.buffer, None) };
            self.free(entry.allocation);
        }
    }

    fn create_image(&self, desc: &ImageDescriptor) -> BackendResult<ImageHandle> {
        log::trace!(
            "VulkanDevice: creating image {:?} ({}x{}x{}, {} layers)",
            desc.label,
            desc.extent.width,
            desc.extent.height,
            desc.extent.depth,
            desc.layers
        );
        if desc.extent.texel_count() == 0 || desc.layers == 0 {
            return Err(BackendError::ImageCreationFailed(format!(
                "zero sized image {:?}",
                desc.label
            )));
        }

        let format = convert_texture_format(desc.format);
        let (image_type, view_type) = image_types(desc.extent, desc.layers);
        let image_info = vk::ImageCreateInfo::default()
            .image_type(image_type)
            .format(format)
            .extent(convert_extent(desc.extent))
            .mip_levels(1)
            .array_layers(desc.layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::ImageCreationFailed))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = match self.allocate(
            desc.label.as_deref().unwrap_or("image"),
            requirements,
            MemoryLocation::GpuOnly,
            false,
            BackendError::ImageCreationFailed,
        ) {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(err);
            }
        };

        let view = unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
            .map_err(|e| map_vk_error(e, BackendError::ImageCreationFailed))
            .and_then(|_| self.create_view(image, view_type, format, desc.layers));
        let view = match view {
            Ok(view) => view,
            Err(err) => {
                unsafe { self.device.destroy_image(image, None) };
                self.free(allocation);
                return Err(err);
            }
        };

        let mut entry = VkImage {
            image,
            view,
            allocation: Some(allocation),
            extent: desc.extent,
            layers: desc.layers,
            format: desc.format,
        };
        if desc.initial_layout != ImageLayout::Undefined {
            let layers = desc.layers;
            let initial = desc.initial_layout;
            if let Err(err) = self.one_time_submit(|cmd| {
                command::transition(&self.device, cmd, image, layers, ImageLayout::Undefined, initial)
            }) {
                unsafe {
                    self.device.destroy_image_view(view, None);
                    self.device.destroy_image(image, None);
                }
                if let Some(allocation) = entry.allocation.take() {
                    self.free(allocation);
                }
                return Err(err);
            }
        }

        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.images.insert(id, entry);
        Ok(ImageHandle(id))
    }

    fn upload_image(&self, image: ImageHandle, data: &[u8]) -> BackendResult<()> {
        let (raw_image, extent, layers, format) = {
            let tables = self.tables.lock();
            let entry = tables.image(image)?;
            (entry.image, entry.extent, entry.layers, entry.format)
        };
        let expected = extent.texel_count() * layers as u64 * format.bytes_per_pixel() as u64;
        if data.len() as u64 != expected {
            return Err(BackendError::Validation(format!(
                "image upload of {} bytes, expected {}",
                data.len(),
                expected
            )));
        }

        let (staging, mut allocation) =
            self.create_raw_buffer("image staging", expected, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let result = match allocation.mapped_slice_mut() {
            Some(mapped) => {
                mapped[..data.len()].copy_from_slice(data);
                let region = vk::BufferImageCopy::default()
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: layers,
                    })
                    .image_extent(convert_extent(extent));
                self.one_time_submit(|cmd| unsafe {
                    command::transition(
                        &self.device,
                        cmd,
                        raw_image,
                        layers,
                        ImageLayout::Undefined,
                        ImageLayout::TransferDst,
                    );
                    self.device.cmd_copy_buffer_to_image(
                        cmd,
                        staging,
                        raw_image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                    command::transition(
                        &self.device,
                        cmd,
                        raw_image,
                        layers,
                        ImageLayout::TransferDst,
                        ImageLayout::ShaderReadOnly,
                    );
                })
            }
            None => Err(BackendError::Validation("staging buffer is not host mapped".into())),
        };

        unsafe { self.device.destroy_buffer(staging, None) };
        self.free(allocation);
        result
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut tables = self.tables.lock();
        let Some(entry) = tables.images.get(&image.0) else {
            return;
        };
        if entry.allocation.is_none() {
            log::debug!("Ignoring destroy of swapchain image {}", image.0);
            return;
        }
        let Some(entry) = tables.images.remove(&image.0) else {
            return;
        };
        drop(tables);
        unsafe {
            self.device.destroy_image_view(entry.view, None);
            self.device.destroy_image(entry.image, None);
        }
        if let Some(allocation) = entry.allocation {
            self.free(allocation);
        }
    }

    fn create_sampler(&self, filter: Filter) -> BackendResult<SamplerHandle> {
        let filter = convert_filter(filter);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(filter)
            .min_filter(filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::ImageCreationFailed))?;
        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        if let Some(sampler) = self.tables.lock().samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .filter_map(|binding| {
                convert_descriptor_kind(binding.kind).map(|ty| {
                    vk::DescriptorSetLayoutBinding::default()
                        .binding(binding.binding)
                        .descriptor_type(ty)
                        .descriptor_count(binding.count.max(1))
                        .stage_flags(convert_shader_stage_flags(binding.stages))
                })
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::DescriptorCreationFailed))?;
        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.set_layouts.insert(id, layout);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        if let Some(layout) = self.tables.lock().set_layouts.remove(&layout.0) {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
    }

    fn allocate_descriptor_set(
        &self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let layouts = [*lookup(&self.tables.lock().set_layouts, "descriptor set layout", layout.0)?];
        let pool = self.descriptor_pool.lock();
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| map_vk_error(e, BackendError::DescriptorCreationFailed))?[0];
        drop(pool);

        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.sets.insert(id, VkSet { set });
        Ok(DescriptorSetHandle(id))
    }

    fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> BackendResult<()> {
        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorType, vk::DescriptorImageInfo),
        }

        let tables = self.tables.lock();
        let target = tables.set(set)?.set;
        let infos = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::UniformBuffer { binding, buffer, size } => {
                    let buffer = lookup(&tables.buffers, "buffer", buffer.0)?;
                    Ok((
                        binding,
                        Info::Buffer(vk::DescriptorBufferInfo {
                            buffer: buffer.buffer,
                            offset: 0,
                            range: size,
                        }),
                    ))
                }
                DescriptorWrite::CombinedImageSampler {
                    binding,
                    image,
                    sampler,
                } => {
                    let image = tables.image(image)?;
                    let sampler = *lookup(&tables.samplers, "sampler", sampler.0)?;
                    Ok((
                        binding,
                        Info::Image(
                            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                            vk::DescriptorImageInfo {
                                sampler,
                                image_view: image.view,
                                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            },
                        ),
                    ))
                }
                DescriptorWrite::SampledImage { binding, image } => {
                    let image = tables.image(image)?;
                    Ok((
                        binding,
                        Info::Image(
                            vk::DescriptorType::SAMPLED_IMAGE,
                            vk::DescriptorImageInfo {
                                sampler: vk::Sampler::null(),
                                image_view: image.view,
                                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            },
                        ),
                    ))
                }
                DescriptorWrite::Sampler { binding, sampler } => {
                    let sampler = *lookup(&tables.samplers, "sampler", sampler.0)?;
                    Ok((
                        binding,
                        Info::Image(
                            vk::DescriptorType::SAMPLER,
                            vk::DescriptorImageInfo {
                                sampler,
                                image_view: vk::ImageView::null(),
                                image_layout: vk::ImageLayout::UNDEFINED,
                            },
                        ),
                    ))
                }
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let vk_writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(binding, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(target)
                    .dst_binding(*binding)
                    .dst_array_element(0);
                match info {
                    Info::Buffer(info) => write
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(info)),
                    Info::Image(ty, info) => write
                        .descriptor_type(*ty)
                        .image_info(std::slice::from_ref(info)),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
        Ok(())
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) {
        let removed = self.tables.lock().sets.remove(&set.0);
        if let Some(entry) = removed {
            let pool = self.descriptor_pool.lock();
            if let Err(e) = unsafe { self.device.free_descriptor_sets(*pool, &[entry.set]) } {
                log::warn!("Failed to free descriptor set: {:?}", e);
            }
        }
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        log::trace!("VulkanDevice: creating pipeline {:?}", desc.label);
        let set_layouts = [*lookup(
            &self.tables.lock().set_layouts,
            "descriptor set layout",
            desc.descriptor_set_layout.0,
        )?];
        let entry_names = desc
            .shaders
            .iter()
            .map(|shader| {
                CString::new(shader.entry_point.as_str()).map_err(|e| {
                    BackendError::PipelineCreationFailed(format!("Invalid entry point name: {}", e))
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let mut modules = Vec::with_capacity(desc.shaders.len());
        for shader in &desc.shaders {
            let module_info = vk::ShaderModuleCreateInfo::default().code(&shader.spirv);
            match unsafe { self.device.create_shader_module(&module_info, None) } {
                Ok(module) => modules.push(module),
                Err(e) => {
                    for module in modules {
                        unsafe { self.device.destroy_shader_module(module, None) };
                    }
                    return Err(map_vk_error(e, BackendError::PipelineCreationFailed));
                }
            }
        }

        let result = self.build_pipeline(desc, &set_layouts, &modules, &entry_names);
        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
        let (pipeline, layout) = result?;

        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.pipelines.insert(id, VkPipeline { pipeline, layout });
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        if let Some(entry) = self.tables.lock().pipelines.remove(&pipeline.0) {
            unsafe {
                self.device.destroy_pipeline(entry.pipeline, None);
                self.device.destroy_pipeline_layout(entry.layout, None);
            }
        }
    }

    fn create_command_buffer(&self) -> BackendResult<CommandBufferHandle> {
        let pool = self.command_pool.lock();
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| map_vk_error(e, BackendError::RecordingFailed))?[0];
        drop(pool);

        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.command_buffers.insert(id, command_buffer);
        Ok(CommandBufferHandle(id))
    }

    fn record_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        commands: &[Command],
    ) -> BackendResult<()> {
        let _pool = self.command_pool.lock();
        let tables = self.tables.lock();
        let cmd = *lookup(&tables.command_buffers, "command buffer", command_buffer.0)?;

        unsafe {
            self.device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_vk_error(e, BackendError::RecordingFailed))?;
            self.device
                .begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default())
                .map_err(|e| map_vk_error(e, BackendError::RecordingFailed))?;
        }
        let encoded = Encoder {
            device: &self.device,
            tables: &tables,
            cmd,
        }
        .encode(commands);
        let ended = unsafe { self.device.end_command_buffer(cmd) }
            .map_err(|e| map_vk_error(e, BackendError::RecordingFailed));
        encoded.and(ended)
    }

    fn free_command_buffer(&self, command_buffer: CommandBufferHandle) {
        let removed = self.tables.lock().command_buffers.remove(&command_buffer.0);
        if let Some(cmd) = removed {
            let pool = self.command_pool.lock();
            unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
        }
    }

    fn create_semaphore(&self) -> BackendResult<SemaphoreHandle> {
        let semaphore = unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .map_err(|e| map_vk_error(e, BackendError::SyncFailed))?;
        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.semaphores.insert(id, semaphore);
        Ok(SemaphoreHandle(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        if let Some(semaphore) = self.tables.lock().semaphores.remove(&semaphore.0) {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }

    fn create_fence(&self, signaled: bool) -> BackendResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence = unsafe {
            self.device
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)
        }
        .map_err(|e| map_vk_error(e, BackendError::SyncFailed))?;
        let mut tables = self.tables.lock();
        let id = tables.allocate_id();
        tables.fences.insert(id, fence);
        Ok(FenceHandle(id))
    }

    fn wait_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let fence = self.tables.lock().fence(fence)?;
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed))
    }

    fn reset_fence(&self, fence: FenceHandle) -> BackendResult<()> {
        let fence = self.tables.lock().fence(fence)?;
        unsafe { self.device.reset_fences(&[fence]) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed))
    }

    fn is_fence_signaled(&self, fence: FenceHandle) -> BackendResult<bool> {
        let fence = self.tables.lock().fence(fence)?;
        unsafe { self.device.get_fence_status(fence) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(fence) = self.tables.lock().fences.remove(&fence.0) {
            unsafe { self.device.destroy_fence(fence, None) };
        }
    }

    fn submit(&self, submission: &Submission<'_>) -> BackendResult<()> {
        let (command_buffers, waits, signals, fence) = {
            let tables = self.tables.lock();
            let command_buffers = submission
                .command_buffers
                .iter()
                .map(|cb| lookup(&tables.command_buffers, "command buffer", cb.0).copied())
                .collect::<BackendResult<Vec<_>>>()?;
            let fence = match submission.fence {
                Some(fence) => tables.fence(fence)?,
                None => vk::Fence::null(),
            };
            (
                command_buffers,
                tables.semaphores(submission.wait_semaphores)?,
                tables.semaphores(submission.signal_semaphores)?,
                fence,
            )
        };
        let wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; waits.len()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signals);

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &[submit_info], fence) }
            .map_err(|e| map_vk_error(e, BackendError::SubmitFailed))
    }

    fn wait_queue_idle(&self) -> BackendResult<()> {
        let queue = self.queue.lock();
        unsafe { self.device.queue_wait_idle(*queue) }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed))
    }

    fn wait_idle(&self) -> BackendResult<()> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| map_vk_error(e, BackendError::SyncFailed))
    }
}

impl VulkanDevice {
    fn build_pipeline(
        &self,
        desc: &GraphicsPipelineDescriptor,
        set_layouts: &[vk::DescriptorSetLayout],
        modules: &[vk::ShaderModule],
        entry_names: &[CString],
    ) -> BackendResult<(vk::Pipeline, vk::PipelineLayout)> {
        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = unsafe { self.device.create_pipeline_layout(&layout_info, None) }
            .map_err(|e| map_vk_error(e, BackendError::PipelineCreationFailed))?;

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .shaders
            .iter()
            .zip(modules)
            .zip(entry_names)
            .map(|((shader, module), name)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(convert_shader_stage(shader.stage))
                    .module(*module)
                    .name(name)
            })
            .collect();
        let tessellated = desc.shaders.iter().any(|shader| {
            matches!(
                shader.stage,
                ShaderStage::TessellationControl | ShaderStage::TessellationEvaluation
            )
        });

        let (vertex_bindings, vertex_attributes) = convert_vertex_layouts(&desc.vertex_buffers);
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);
        let topology = if tessellated {
            vk::PrimitiveTopology::PATCH_LIST
        } else {
            convert_topology(desc.topology)
        };
        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology)
            .primitive_restart_enable(false);
        let tessellation_state =
            vk::PipelineTessellationStateCreateInfo::default().patch_control_points(3);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_formats
            .iter()
            .map(|_| {
                let state = vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA);
                if desc.alpha_blending {
                    state
                        .blend_enable(true)
                        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                        .color_blend_op(vk::BlendOp::ADD)
                        .src_alpha_blend_factor(vk::BlendFactor::ONE)
                        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                        .alpha_blend_op(vk::BlendOp::ADD)
                } else {
                    state.blend_enable(false)
                }
            })
            .collect();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> = desc
            .color_formats
            .iter()
            .map(|format| convert_texture_format(*format))
            .collect();
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);
        if tessellated {
            pipeline_info = pipeline_info.tessellation_state(&tessellation_state);
        }

        match unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        } {
            Ok(pipelines) => Ok((pipelines[0], layout)),
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                Err(map_vk_error(e, BackendError::PipelineCreationFailed))
            }
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            let mut tables = std::mem::take(&mut *self.tables.lock());

            {
                let mut allocator = self.allocator.lock();
                for (_, buffer) in tables.buffers.drain() {
                    self.device.destroy_buffer(buffer.buffer, None);
                    if let Some(allocator) = allocator.as_mut() {
                        let _ = allocator.free(buffer.allocation);
                    }
                }
                for (_, image) in tables.images.drain() {
                    self.device.destroy_image_view(image.view, None);
                    if let Some(allocation) = image.allocation {
                        self.device.destroy_image(image.image, None);
                        if let Some(allocator) = allocator.as_mut() {
                            let _ = allocator.free(allocation);
                        }
                    }
                }
                // The allocator has to go before the device
                allocator.take();
            }

            for (_, sampler) in tables.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, pipeline) in tables.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, layout) in tables.set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            for (_, semaphore) in tables.semaphores.drain() {
                self.device.destroy_semaphore(semaphore, None);
            }
            for (_, fence) in tables.fences.drain() {
                self.device.destroy_fence(fence, None);
            }

            // Sets and command buffers go with their pools
            self.device
                .destroy_descriptor_pool(*self.descriptor_pool.lock(), None);
            self.device.destroy_command_pool(*self.command_pool.lock(), None);

            self.device.destroy_device(None);
            if let Some(debug) = self.debug.take() {
                debug.utils.destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
