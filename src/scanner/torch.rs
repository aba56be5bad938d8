//! Flashlight control through a sysfs LED class device.
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::DeviceError;

/// LED at `/sys/class/leds/<name>`. Written `max_brightness` to light it and
/// `0` to switch it off. A lit torch is switched off when dropped.
#[derive(Debug)]
pub struct Torch {
    brightness: PathBuf,
    on_value: String,
    lit: bool,
}

impl Torch {
    /// Probe the LED directory. Fails with `TorchUnsupported` when it has no
    /// `brightness` attribute.
    pub async fn open(led_dir: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let dir = led_dir.as_ref();
        let brightness = dir.join("brightness");
        if !tokio::fs::try_exists(&brightness).await.unwrap_or(false) {
            return Err(DeviceError::TorchUnsupported);
        }
        let on_value = match tokio::fs::read_to_string(dir.join("max_brightness")).await {
            Ok(max) if !max.trim().is_empty() => max.trim().to_string(),
            _ => "1".to_string(),
        };
        Ok(Self {
            brightness,
            on_value,
            lit: false,
        })
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }

    pub async fn set(&mut self, on: bool) -> Result<(), DeviceError> {
        let value = if on { self.on_value.as_str() } else { "0" };
        tokio::fs::write(&self.brightness, value)
            .await
            .map_err(|err| DeviceError::TorchToggleFailed(err.to_string()))?;
        self.lit = on;
        debug!(on, "torch toggled");
        Ok(())
    }
}

impl Drop for Torch {
    fn drop(&mut self) {
        if self.lit {
            if let Err(err) = std::fs::write(&self.brightness, "0") {
                warn!(%err, "failed to switch torch off");
            }
        }
    }
}
