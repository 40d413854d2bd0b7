//! Instance, adapter and logical device setup.

use std::ffi::{c_char, c_void, CStr};
use std::mem::ManuallyDrop;

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};

use crate::gpu::{Adapter, GPUError, Result, WindowHandle};

/// Names of debugging layers that should be enabled when validation is requested.
const DEBUG_LAYER_NAMES: [&CStr; 1] = [unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") }];

const API_VERSION: u32 = vk::API_VERSION_1_3;

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };
    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Debug
    } else {
        log::Level::Trace
    };
    log::log!(target: "prism::vulkan", level, "[{:?}] {}", message_type, message);
    vk::FALSE
}

/// Everything that lives as long as the device itself.
pub struct Core {
    /// Keeps the loader library mapped for as long as the instance lives.
    _entry: Entry,
    pub(super) instance: ash::Instance,
    pub(super) pdevice: vk::PhysicalDevice,
    pub(super) device: ash::Device,
    /// Dropped by [`Core::destroy`] ahead of the device.
    pub(super) allocator: ManuallyDrop<vk_mem::Allocator>,
    pub(super) queue: vk::Queue,
    pub(super) queue_family: u32,
    pub(super) push_descriptor: khr::PushDescriptor,
    pub(super) surface_loader: khr::Surface,
    pub(super) depth_format: vk::Format,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

fn instance_extensions(window: Option<&WindowHandle>, validation: bool) -> Result<Vec<*const c_char>> {
    let mut extensions = Vec::new();
    if let Some(window) = window {
        extensions.extend_from_slice(ash_window::enumerate_required_extensions(window.display)?);
    }
    if validation {
        extensions.push(DebugUtils::name().as_ptr());
    }
    Ok(extensions)
}

fn create_instance(entry: &Entry, extensions: &[*const c_char], validation: bool) -> Result<ash::Instance> {
    let app_info = vk::ApplicationInfo::builder()
        .application_name(unsafe { CStr::from_bytes_with_nul_unchecked(b"prism\0") })
        .engine_name(unsafe { CStr::from_bytes_with_nul_unchecked(b"prism\0") })
        .api_version(API_VERSION);

    let mut layers = Vec::new();
    if validation {
        let available = entry.enumerate_instance_layer_properties()?;
        for name in DEBUG_LAYER_NAMES {
            if available
                .iter()
                .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) } == name)
            {
                layers.push(name.as_ptr());
            } else {
                log::warn!("validation requested but {:?} is not installed", name);
            }
        }
    }

    let info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(extensions)
        .enabled_layer_names(&layers);
    Ok(unsafe { entry.create_instance(&info, None)? })
}

fn has_extension(instance: &ash::Instance, pdevice: vk::PhysicalDevice, name: &CStr) -> bool {
    unsafe { instance.enumerate_device_extension_properties(pdevice) }
        .map(|exts| {
            exts.iter()
                .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
        })
        .unwrap_or(false)
}

struct Candidate {
    pdevice: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_family: u32,
}

/// Usable adapters, best match for `adapter` first.
fn candidates(
    instance: &ash::Instance,
    adapter: Adapter,
    surface: Option<(&khr::Surface, vk::SurfaceKHR)>,
) -> Result<Vec<Candidate>> {
    let mut found = Vec::new();
    for pdevice in unsafe { instance.enumerate_physical_devices()? } {
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
        if properties.api_version < API_VERSION {
            log::debug!("skipping adapter {}: Vulkan 1.3 not supported", name);
            continue;
        }
        if !has_extension(instance, pdevice, khr::PushDescriptor::name()) {
            log::debug!("skipping adapter {}: no push descriptors", name);
            continue;
        }
        if surface.is_some() && !has_extension(instance, pdevice, khr::Swapchain::name()) {
            continue;
        }
        let families = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let queue_family = families.iter().enumerate().find_map(|(index, family)| {
            let index = index as u32;
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = surface.map_or(true, |(loader, surface)| unsafe {
                loader
                    .get_physical_device_surface_support(pdevice, index, surface)
                    .unwrap_or(false)
            });
            (graphics && present).then_some(index)
        });
        if let Some(queue_family) = queue_family {
            found.push(Candidate {
                pdevice,
                properties,
                queue_family,
            });
        }
    }

    let rank = |kind: vk::PhysicalDeviceType| {
        let preferred = match adapter {
            Adapter::HighPerformance => [vk::PhysicalDeviceType::DISCRETE_GPU, vk::PhysicalDeviceType::INTEGRATED_GPU],
            Adapter::LowPower => [vk::PhysicalDeviceType::INTEGRATED_GPU, vk::PhysicalDeviceType::DISCRETE_GPU],
        };
        preferred.iter().position(|p| *p == kind).unwrap_or(preferred.len())
    };
    found.sort_by_key(|c| rank(c.properties.device_type));
    Ok(found)
}

/// Whether a Vulkan 1.3 adapter with the features this backend needs exists.
pub fn adapter_present() -> bool {
    let Ok(entry) = (unsafe { Entry::load() }) else {
        return false;
    };
    let Ok(instance) = create_instance(&entry, &[], false) else {
        return false;
    };
    let usable = candidates(&instance, Adapter::default(), None)
        .map(|c| !c.is_empty())
        .unwrap_or(false);
    unsafe { instance.destroy_instance(None) };
    usable
}

fn pick_depth_format(instance: &ash::Instance, pdevice: vk::PhysicalDevice) -> Result<vk::Format> {
    [vk::Format::D24_UNORM_S8_UINT, vk::Format::D32_SFLOAT_S8_UINT]
        .into_iter()
        .find(|format| {
            let props = unsafe { instance.get_physical_device_format_properties(pdevice, *format) };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(GPUError::NoSuitableDevice)
}

impl Core {
    /// Creates the device, and the window surface when `window` is given.
    pub(super) fn new(
        window: Option<&WindowHandle>,
        adapter: Adapter,
        validation: bool,
    ) -> Result<(Self, Option<vk::SurfaceKHR>)> {
        let entry = unsafe { Entry::load()? };
        let extensions = instance_extensions(window, validation)?;
        let instance = create_instance(&entry, &extensions, validation)?;

        let debug = if validation {
            let utils = DebugUtils::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let messenger = unsafe { utils.create_debug_utils_messenger(&info, None)? };
            Some((utils, messenger))
        } else {
            None
        };

        let surface_loader = khr::Surface::new(&entry, &instance);
        let surface = match window {
            Some(window) => Some(unsafe { ash_window::create_surface(&entry, &instance, window.display, window.window, None)? }),
            None => None,
        };

        let candidate = candidates(&instance, adapter, surface.map(|s| (&surface_loader, s)))?
            .into_iter()
            .next()
            .ok_or(GPUError::NoSuitableDevice)?;
        let name = unsafe { CStr::from_ptr(candidate.properties.device_name.as_ptr()) }.to_string_lossy();
        log::info!("using Vulkan adapter {} ({:?})", name, candidate.properties.device_type);

        let priorities = [1.0];
        let queue_info = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(candidate.queue_family)
            .queue_priorities(&priorities)
            .build()];
        let mut device_extensions = vec![khr::PushDescriptor::name().as_ptr()];
        if surface.is_some() {
            device_extensions.push(khr::Swapchain::name().as_ptr());
        }
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder()
            .dynamic_rendering(true)
            .synchronization2(true);
        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_info)
            .enabled_extension_names(&device_extensions)
            .push_next(&mut features13);
        let device = unsafe { instance.create_device(candidate.pdevice, &info, None)? };
        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };
        let allocator = vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(&instance, &device, candidate.pdevice))?;
        let push_descriptor = khr::PushDescriptor::new(&instance, &device);
        let depth_format = pick_depth_format(&instance, candidate.pdevice)?;

        Ok((
            Self {
                _entry: entry,
                instance,
                pdevice: candidate.pdevice,
                device,
                allocator: ManuallyDrop::new(allocator),
                queue,
                queue_family: candidate.queue_family,
                push_descriptor,
                surface_loader,
                depth_format,
                debug,
            },
            surface,
        ))
    }

    pub(super) fn set_name<T: vk::Handle>(&self, object: T, name: &str) {
        let Some((utils, _)) = &self.debug else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(T::TYPE)
            .object_handle(object.as_raw())
            .object_name(&name);
        unsafe {
            let _ = utils.set_debug_utils_object_name(self.device.handle(), &info);
        }
    }

    /// Destroys the device and instance. Every child object must be gone.
    pub(super) fn destroy(&mut self) {
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            if let Some((utils, messenger)) = self.debug.take() {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
