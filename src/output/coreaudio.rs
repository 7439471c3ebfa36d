//! Native output switching through CoreAudio object properties

use super::{OutputDevice, OutputSwitcher};
use crate::error::OutputError;

pub struct CoreAudioSwitcher;

impl CoreAudioSwitcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CoreAudioSwitcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "macos")]
mod ffi {
    use std::os::raw::c_void;

    use core_foundation::base::TCFType;
    use core_foundation::string::{CFString, CFStringRef};

    #[repr(C)]
    #[derive(Debug, Clone, Copy)]
    pub struct AudioObjectPropertyAddress {
        pub selector: u32,
        pub scope: u32,
        pub element: u32,
    }

    pub type AudioObjectID = u32;
    type OSStatus = i32;

    const AUDIO_HARDWARE_PROPERTY_DEVICES: u32 = 0x64657623; // 'dev#'
    const AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE: u32 = 0x644F7574; // 'dOut'
    const AUDIO_DEVICE_PROPERTY_STREAMS: u32 = 0x73746D23; // 'stm#'
    const AUDIO_OBJECT_PROPERTY_NAME: u32 = 0x6C6E616D; // 'lnam'
    const AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL: u32 = 0x676C6F62; // 'glob'
    const AUDIO_OBJECT_PROPERTY_SCOPE_OUTPUT: u32 = 0x6F757470; // 'outp'
    const AUDIO_OBJECT_PROPERTY_ELEMENT_MAIN: u32 = 0;
    const AUDIO_OBJECT_SYSTEM_OBJECT: AudioObjectID = 1;

    #[link(name = "CoreAudio", kind = "framework")]
    extern "C" {
        fn AudioObjectGetPropertyDataSize(
            object_id: AudioObjectID,
            address: *const AudioObjectPropertyAddress,
            qualifier_data_size: u32,
            qualifier_data: *const c_void,
            data_size: *mut u32,
        ) -> OSStatus;

        fn AudioObjectGetPropertyData(
            object_id: AudioObjectID,
            address: *const AudioObjectPropertyAddress,
            qualifier_data_size: u32,
            qualifier_data: *const c_void,
            data_size: *mut u32,
            data: *mut c_void,
        ) -> OSStatus;

        fn AudioObjectSetPropertyData(
            object_id: AudioObjectID,
            address: *const AudioObjectPropertyAddress,
            qualifier_data_size: u32,
            qualifier_data: *const c_void,
            data_size: u32,
            data: *const c_void,
        ) -> OSStatus;
    }

    fn address(selector: u32, scope: u32) -> AudioObjectPropertyAddress {
        AudioObjectPropertyAddress {
            selector,
            scope,
            element: AUDIO_OBJECT_PROPERTY_ELEMENT_MAIN,
        }
    }

    fn data_size(object: AudioObjectID, address: &AudioObjectPropertyAddress) -> Result<u32, i32> {
        let mut size = 0u32;
        let status = unsafe {
            AudioObjectGetPropertyDataSize(object, address, 0, std::ptr::null(), &mut size)
        };
        if status != 0 {
            return Err(status);
        }
        Ok(size)
    }

    pub fn all_devices() -> Result<Vec<AudioObjectID>, i32> {
        let address = address(AUDIO_HARDWARE_PROPERTY_DEVICES, AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL);
        let mut size = data_size(AUDIO_OBJECT_SYSTEM_OBJECT, &address)?;
        let count = size as usize / std::mem::size_of::<AudioObjectID>();
        let mut devices: Vec<AudioObjectID> = vec![0; count];

        let status = unsafe {
            AudioObjectGetPropertyData(
                AUDIO_OBJECT_SYSTEM_OBJECT,
                &address,
                0,
                std::ptr::null(),
                &mut size,
                devices.as_mut_ptr() as *mut c_void,
            )
        };
        if status != 0 {
            return Err(status);
        }

        devices.truncate(size as usize / std::mem::size_of::<AudioObjectID>());
        Ok(devices)
    }

    pub fn has_output_streams(device: AudioObjectID) -> bool {
        let address = address(AUDIO_DEVICE_PROPERTY_STREAMS, AUDIO_OBJECT_PROPERTY_SCOPE_OUTPUT);
        data_size(device, &address).map_or(false, |size| size > 0)
    }

    pub fn device_name(device: AudioObjectID) -> Result<String, i32> {
        let address = address(AUDIO_OBJECT_PROPERTY_NAME, AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL);
        let mut name: CFStringRef = std::ptr::null();
        let mut size = std::mem::size_of::<CFStringRef>() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                device,
                &address,
                0,
                std::ptr::null(),
                &mut size,
                &mut name as *mut _ as *mut c_void,
            )
        };
        if status != 0 || name.is_null() {
            return Err(status);
        }

        // The property hands over a retained string
        let name = unsafe { CFString::wrap_under_create_rule(name) };
        Ok(name.to_string())
    }

    pub fn default_output() -> Result<AudioObjectID, i32> {
        let address = address(
            AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE,
            AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL,
        );
        let mut device: AudioObjectID = 0;
        let mut size = std::mem::size_of::<AudioObjectID>() as u32;

        let status = unsafe {
            AudioObjectGetPropertyData(
                AUDIO_OBJECT_SYSTEM_OBJECT,
                &address,
                0,
                std::ptr::null(),
                &mut size,
                &mut device as *mut _ as *mut c_void,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(device)
    }

    pub fn set_default_output(device: AudioObjectID) -> Result<(), i32> {
        let address = address(
            AUDIO_HARDWARE_PROPERTY_DEFAULT_OUTPUT_DEVICE,
            AUDIO_OBJECT_PROPERTY_SCOPE_GLOBAL,
        );
        let status = unsafe {
            AudioObjectSetPropertyData(
                AUDIO_OBJECT_SYSTEM_OBJECT,
                &address,
                0,
                std::ptr::null(),
                std::mem::size_of::<AudioObjectID>() as u32,
                &device as *const _ as *const c_void,
            )
        };
        if status != 0 {
            return Err(status);
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn output_devices() -> Result<Vec<(ffi::AudioObjectID, OutputDevice)>, OutputError> {
    let query = |what: &str, status: i32| {
        OutputError::Query(format!("{} failed: OSStatus {} (0x{:08X})", what, status, status as u32))
    };

    let current = ffi::default_output().map_err(|s| query("default output", s))?;
    let devices = ffi::all_devices().map_err(|s| query("device list", s))?;

    Ok(devices
        .into_iter()
        .filter(|&id| ffi::has_output_streams(id))
        .filter_map(|id| {
            let name = ffi::device_name(id).ok()?;
            Some((
                id,
                OutputDevice {
                    name,
                    selected: id == current,
                },
            ))
        })
        .collect())
}

#[cfg(target_os = "macos")]
#[async_trait::async_trait]
impl OutputSwitcher for CoreAudioSwitcher {
    async fn list_output_devices(&self) -> Result<Vec<OutputDevice>, OutputError> {
        let devices = tokio::task::spawn_blocking(output_devices)
            .await
            .map_err(|e| OutputError::Query(format!("device query task failed: {}", e)))??;
        Ok(devices.into_iter().map(|(_, device)| device).collect())
    }

    async fn set_output_device(&self, name: &str) -> Result<bool, OutputError> {
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, OutputError> {
            let Some((id, _)) = output_devices()?
                .into_iter()
                .find(|(_, device)| device.name == name)
            else {
                return Ok(false);
            };

            ffi::set_default_output(id).map_err(|s| {
                OutputError::Query(format!("setting default output failed: OSStatus {}", s))
            })?;
            tracing::info!("Default output switched to {}", name);
            Ok(true)
        })
        .await
        .map_err(|e| OutputError::Query(format!("device switch task failed: {}", e)))?
    }

    async fn probe(&self) -> bool {
        tokio::task::spawn_blocking(|| ffi::default_output().is_ok())
            .await
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "coreaudio"
    }
}

#[cfg(not(target_os = "macos"))]
#[async_trait::async_trait]
impl OutputSwitcher for CoreAudioSwitcher {
    async fn list_output_devices(&self) -> Result<Vec<OutputDevice>, OutputError> {
        Err(OutputError::Unavailable("CoreAudio requires macOS".to_string()))
    }

    async fn set_output_device(&self, _name: &str) -> Result<bool, OutputError> {
        Err(OutputError::Unavailable("CoreAudio requires macOS".to_string()))
    }

    async fn probe(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "coreaudio"
    }
}
