//! Overlay/texture bridge
//! Submits rendered frames to the runtime compositor from the render thread. Submissions are
//! handed to a dedicated worker thread so a slow compositor never stalls the caller beyond the
//! configured timeout, and never touches the input thread at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::overlay_config::OverlayConfig;
use crate::core::backend::InputBackend;
use crate::error::{OverlayError, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphicsApi {
    OpenGl,
    Vulkan,
    Direct3D11,
    Metal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Linear,
    Gamma,
}

/// A client-owned texture to present. `native` is the API-specific object (GL name, VkImage,
/// ID3D11Texture2D pointer or MTLTexture pointer) passed through to the compositor untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphicsTextureHandle {
    pub native: u64,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub color_space: ColorSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureExpectation {
    pub format: TextureFormat,
    pub color_space: ColorSpace,
}

/// Texture format the compositor expects for each graphics API.
pub fn expected_texture(api: GraphicsApi) -> TextureExpectation {
    match api {
        GraphicsApi::OpenGl => TextureExpectation {
            format: TextureFormat::Rgba8Unorm,
            color_space: ColorSpace::Linear,
        },
        GraphicsApi::Vulkan | GraphicsApi::Direct3D11 => TextureExpectation {
            format: TextureFormat::Rgba8UnormSrgb,
            color_space: ColorSpace::Gamma,
        },
        GraphicsApi::Metal => TextureExpectation {
            format: TextureFormat::Bgra8UnormSrgb,
            color_space: ColorSpace::Gamma,
        },
    }
}

/// Graphics APIs this platform can submit with: OpenGL and Vulkan plus the platform-native one.
pub fn platform_graphics_apis() -> &'static [GraphicsApi] {
    if cfg!(target_os = "windows") {
        &[GraphicsApi::Direct3D11, GraphicsApi::OpenGl, GraphicsApi::Vulkan]
    } else if cfg!(target_os = "macos") {
        &[GraphicsApi::Metal]
    } else {
        &[GraphicsApi::OpenGl, GraphicsApi::Vulkan]
    }
}

pub fn check_texture(texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), OverlayError> {
    let expected = expected_texture(api);
    if texture.format != expected.format || texture.color_space != expected.color_space {
        return Err(OverlayError::FormatMismatch {
            api,
            expected_format: expected.format,
            expected_color_space: expected.color_space,
            found_format: texture.format,
            found_color_space: texture.color_space,
        });
    }
    Ok(())
}

enum OverlayCommand {
    Submit {
        texture: GraphicsTextureHandle,
        api: GraphicsApi,
        reply: std_mpsc::SyncSender<Result<(), RuntimeError>>,
    },
}

#[derive(Debug, Default)]
struct OverlayCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
}

/// Frame counters since the bridge was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OverlayStats {
    pub submitted: u64,
    pub dropped: u64,
}

/// Handle the render thread uses to submit frames to the compositor worker.
pub struct OverlayBridge {
    tx: Option<mpsc::Sender<OverlayCommand>>,
    worker: Option<thread::JoinHandle<()>>,
    supported: Vec<GraphicsApi>,
    submit_timeout: Duration,
    counters: Arc<OverlayCounters>,
}

impl OverlayBridge {
    /// Starts the bridge with the APIs both this platform and the backend support.
    pub fn new(backend: Arc<dyn InputBackend>, config: &OverlayConfig) -> Self {
        let backend_apis = backend.supported_graphics_apis();
        let supported: Vec<GraphicsApi> = platform_graphics_apis()
            .iter()
            .copied()
            .filter(|api| backend_apis.contains(api))
            .collect();
        Self::with_supported_apis(backend, supported, config)
    }

    pub fn with_supported_apis(
        backend: Arc<dyn InputBackend>,
        supported: Vec<GraphicsApi>,
        config: &OverlayConfig,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<OverlayCommand>(config.queue_depth.max(1));
        let counters = Arc::new(OverlayCounters::default());
        let worker_counters = counters.clone();

        let worker = thread::spawn(move || {
            info!("Overlay submission thread started.");
            while let Some(command) = rx.blocking_recv() {
                match command {
                    OverlayCommand::Submit { texture, api, reply } => {
                        let result = backend.submit_compositor_frame(&texture, api);
                        if result.is_ok() {
                            worker_counters.submitted.fetch_add(1, Ordering::Relaxed);
                        }
                        // The submitter may have timed out and gone away.
                        let _ = reply.send(result);
                    }
                }
            }
            info!("Overlay submission thread stopped.");
        });

        info!("Overlay bridge supports {:?}", supported);
        Self {
            tx: Some(tx),
            worker: Some(worker),
            supported,
            submit_timeout: Duration::from_millis(config.submit_timeout_ms),
            counters,
        }
    }

    pub fn supported_apis(&self) -> &[GraphicsApi] {
        &self.supported
    }

    pub fn stats(&self) -> OverlayStats {
        OverlayStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Submits one frame. Waits at most the configured timeout for the compositor to accept it.
    pub fn submit_frame(&self, texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), OverlayError> {
        let result = self.try_submit(texture, api);
        if let Err(e) = &result {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            match e {
                OverlayError::FormatMismatch { .. } | OverlayError::UnsupportedApi(_) => {
                    warn!("Overlay frame rejected: {}", e)
                }
                _ => debug!("Overlay frame dropped: {}", e),
            }
        }
        result
    }

    fn try_submit(&self, texture: &GraphicsTextureHandle, api: GraphicsApi) -> Result<(), OverlayError> {
        if !self.supported.contains(&api) {
            return Err(OverlayError::UnsupportedApi(api));
        }
        check_texture(texture, api)?;

        let tx = self.tx.as_ref().ok_or(OverlayError::Closed)?;
        let (reply_tx, reply_rx) = std_mpsc::sync_channel(1);
        tx.try_send(OverlayCommand::Submit {
            texture: texture.clone(),
            api,
            reply: reply_tx,
        })
        .map_err(|e| match e {
            // Compositor is still busy with earlier frames.
            mpsc::error::TrySendError::Full(_) => OverlayError::SubmissionTimeout(self.submit_timeout),
            mpsc::error::TrySendError::Closed(_) => OverlayError::Closed,
        })?;

        match reply_rx.recv_timeout(self.submit_timeout) {
            Ok(result) => result.map_err(OverlayError::from),
            Err(std_mpsc::RecvTimeoutError::Timeout) => Err(OverlayError::SubmissionTimeout(self.submit_timeout)),
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(OverlayError::Closed),
        }
    }

    /// Stops the worker after it finishes any frame in flight.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Overlay submission thread panicked");
            }
        }
    }
}

impl Drop for OverlayBridge {
    fn drop(&mut self) {
        // Closing the channel is enough for the worker to exit; don't block on it here.
        self.tx.take();
    }
}
