//! wgpu device ownership and error capture.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::util::{Error, Result};

/// Device, queue and the device-lost flag shared with the wgpu callback.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    adapter: Option<wgpu::Adapter>,
    adapter_info: Option<wgpu::AdapterInfo>,
    lost: Arc<Mutex<Option<String>>>,
}

impl GpuContext {
    /// Create a device without a surface, blocking on adapter/device requests.
    pub fn new_headless() -> Result<Self> {
        pollster::block_on(Self::request_headless())
    }

    async fn request_headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..wgpu::InstanceDescriptor::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::NoAdapter(e.to_string()))?;

        let info = adapter.get_info();
        info!("Using adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("satvsm device"),
                required_features: wgpu::Features::empty(),
                // Large shadow maps need the adapter's real texture/dispatch limits
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|e| Error::RequestDevice(e.to_string()))?;

        Ok(Self::wrap(device, queue, Some(adapter)))
    }

    /// Adopt a device created elsewhere, keeping its adapter for capability queries.
    pub fn from_adapter(adapter: wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self::wrap(device, queue, Some(adapter))
    }

    /// Adopt a device created elsewhere (e.g. by a host renderer).
    ///
    /// Without the adapter, format checks fall back to the WebGPU guaranteed
    /// set, which downlevel backends do not always honour.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self::wrap(device, queue, None)
    }

    fn wrap(device: wgpu::Device, queue: wgpu::Queue, adapter: Option<wgpu::Adapter>) -> Self {
        let adapter_info = adapter.as_ref().map(|a| a.get_info());
        let lost = Arc::new(Mutex::new(None));
        let flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            warn!("GPU device lost ({reason:?}): {message}");
            *flag.lock() = Some(format!("{reason:?}: {message}"));
        });
        Self {
            device,
            queue,
            adapter,
            adapter_info,
            lost,
        }
    }

    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.adapter_info.as_ref()
    }

    pub fn limits(&self) -> wgpu::Limits {
        self.device.limits()
    }

    /// Usages `format` supports on this adapter.
    pub fn format_usages(&self, format: wgpu::TextureFormat) -> wgpu::TextureUsages {
        match &self.adapter {
            Some(adapter) => adapter.get_texture_format_features(format).allowed_usages,
            None => format.guaranteed_format_features(self.device.features()).allowed_usages,
        }
    }

    /// Err with [`Error::Unsupported`] unless `format` allows every usage in `usages`.
    pub fn require_format(&self, format: wgpu::TextureFormat, usages: wgpu::TextureUsages) -> Result<()> {
        let missing = usages.difference(self.format_usages(format));
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Unsupported(format!("{format:?} textures without {missing:?}")))
        }
    }

    /// Err with [`Error::Unsupported`] when the adapter cannot run compute shaders.
    pub fn require_compute(&self) -> Result<()> {
        let Some(adapter) = &self.adapter else {
            return Ok(());
        };
        let flags = adapter.get_downlevel_capabilities().flags;
        if flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            Ok(())
        } else {
            Err(Error::Unsupported("compute shaders".into()))
        }
    }

    /// Err once the device-lost callback has fired.
    pub fn check_device(&self) -> Result<()> {
        match self.lost.lock().as_ref() {
            Some(reason) => Err(Error::DeviceLost(reason.clone())),
            None => Ok(()),
        }
    }

    /// Run `f` inside out-of-memory and validation error scopes.
    ///
    /// Any error raised while `f` creates resources, encodes or submits work is
    /// returned as [`Error::Gpu`] instead of reaching the uncaptured handler.
    pub fn scoped<T>(&self, label: &str, f: impl FnOnce(&wgpu::Device, &wgpu::Queue) -> T) -> Result<T> {
        self.check_device()?;

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(&self.device, &self.queue);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        if let Some(err) = oom.or(validation) {
            debug!("{label} failed: {err}");
            return Err(Error::Gpu(format!("{label}: {err}")));
        }
        self.check_device()?;
        Ok(out)
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| Error::Gpu(format!("poll: {e}")))
    }
}
