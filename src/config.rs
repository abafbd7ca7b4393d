//! Pipeline configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the values the firmware was tuned for)
//! 2. `config/pipeline.toml` (or a path given on the command line)
//! 3. Environment variables prefixed with `RUST_VISION_`, using `__` to
//!    separate sections from keys
//!
//! # Example
//! ```no_run
//! use rust_vision::config::VisionConfig;
//!
//! // RUST_VISION_CAMERA__FPS=15 overrides camera.fps
//! let config = VisionConfig::load()?;
//! config.validate()?;
//! println!("capturing at {} fps", config.camera.fps);
//! # Ok::<(), rust_vision::config::ConfigError>(())
//! ```

use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use vision_hal::ARGB_BPP;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "RUST_VISION_";

/// Largest frame the video encoder accepts.
pub const MAX_DISPLAY_WIDTH: u32 = 1280;
/// Largest frame the video encoder accepts.
pub const MAX_DISPLAY_HEIGHT: u32 = 720;
/// Upper bound on the display latency, in frames.
pub const MAX_CAPTURE_DELAY: usize = 8;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A source could not be read or did not match the schema.
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// Values parsed but are not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Camera and capture ring
    #[serde(default)]
    pub camera: CameraConfig,
    /// Neural-network input frame
    #[serde(default)]
    pub nn: NnConfig,
    /// Overlay, encode and stream
    #[serde(default)]
    pub display: DisplayConfig,
    /// Pipeline threads
    #[serde(default)]
    pub tasks: TasksConfig,
    /// Simulated board used by the command-line runner
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Sensor frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Frames the displayed image lags behind the newest capture
    #[serde(default = "default_capture_delay")]
    pub capture_delay: usize,
    /// Main (display) pipe width in pixels
    #[serde(default = "default_display_width")]
    pub display_width: u32,
    /// Main (display) pipe height in pixels
    #[serde(default = "default_display_height")]
    pub display_height: u32,
    /// Bytes per display pixel
    #[serde(default = "default_capture_bpp")]
    pub capture_bpp: u32,
}

/// Network input frame produced by the ancillary pipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NnConfig {
    /// Input width in pixels
    #[serde(default = "default_nn_side")]
    pub width: u32,
    /// Input height in pixels
    #[serde(default = "default_nn_side")]
    pub height: u32,
    /// Bytes per input pixel
    #[serde(default = "default_nn_bpp")]
    pub bpp: u32,
}

/// Display service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Encoder output buffer size in bytes
    #[serde(default = "default_encoder_buffer_size")]
    pub encoder_buffer_size: usize,
    /// Whether the timing overlay is shown before the button is first pressed
    #[serde(default)]
    pub debug_overlay: bool,
}

/// Pipeline thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Stack size of each pipeline thread, in bytes
    #[serde(default = "default_stack_size")]
    pub stack_size: usize,
}

/// Simulated hardware parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Time one inference takes on the simulated accelerator
    #[serde(default = "default_inference_ms")]
    pub inference_ms: u64,
    /// Time the simulated USB host takes to release a frame
    #[serde(default = "default_uvc_release_ms")]
    pub uvc_release_ms: u64,
    /// Reported CPU load of the simulated scheduler
    #[serde(default = "default_cpu_load_percent")]
    pub cpu_load_percent: f32,
    /// Whether a USB host opens the stream at startup
    #[serde(default = "default_stream_active")]
    pub stream_active: bool,
    /// Seed for the synthetic detections; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

// Default value functions
fn default_name() -> String {
    "rust-vision".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fps() -> u32 {
    30
}

fn default_capture_delay() -> usize {
    1
}

fn default_display_width() -> u32 {
    MAX_DISPLAY_WIDTH
}

fn default_display_height() -> u32 {
    MAX_DISPLAY_HEIGHT
}

fn default_capture_bpp() -> u32 {
    ARGB_BPP as u32
}

fn default_nn_side() -> u32 {
    224
}

fn default_nn_bpp() -> u32 {
    3
}

fn default_encoder_buffer_size() -> usize {
    255 * 1024
}

fn default_stack_size() -> usize {
    256 * 1024
}

fn default_inference_ms() -> u64 {
    20
}

fn default_uvc_release_ms() -> u64 {
    5
}

fn default_cpu_load_percent() -> f32 {
    35.0
}

fn default_stream_active() -> bool {
    true
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            capture_delay: default_capture_delay(),
            display_width: default_display_width(),
            display_height: default_display_height(),
            capture_bpp: default_capture_bpp(),
        }
    }
}

impl CameraConfig {
    /// Number of display buffers in the capture ring.
    #[must_use]
    pub fn ring_len(&self) -> usize {
        self.capture_delay + 2
    }

    /// Bytes per display frame.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.display_width as usize * self.display_height as usize * self.capture_bpp as usize
    }
}

impl Default for NnConfig {
    fn default() -> Self {
        Self {
            width: default_nn_side(),
            height: default_nn_side(),
            bpp: default_nn_bpp(),
        }
    }
}

impl NnConfig {
    /// Bytes per network input frame.
    #[must_use]
    pub fn input_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bpp as usize
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            encoder_buffer_size: default_encoder_buffer_size(),
            debug_overlay: false,
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            stack_size: default_stack_size(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            inference_ms: default_inference_ms(),
            uvc_release_ms: default_uvc_release_ms(),
            cpu_load_percent: default_cpu_load_percent(),
            stream_active: default_stream_active(),
            seed: None,
        }
    }
}

impl VisionConfig {
    /// Load configuration from `config/pipeline.toml` and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let cam = &self.camera;
        if cam.fps == 0 {
            return Err(invalid("camera.fps must be greater than 0"));
        }
        if cam.display_width == 0 || cam.display_height == 0 {
            return Err(invalid(format!(
                "display size {}x{} must be non-zero",
                cam.display_width, cam.display_height
            )));
        }
        if cam.display_width > MAX_DISPLAY_WIDTH || cam.display_height > MAX_DISPLAY_HEIGHT {
            return Err(invalid(format!(
                "display size {}x{} exceeds the encoder maximum of {MAX_DISPLAY_WIDTH}x{MAX_DISPLAY_HEIGHT}",
                cam.display_width, cam.display_height
            )));
        }
        if cam.capture_delay > MAX_CAPTURE_DELAY {
            return Err(invalid(format!(
                "camera.capture_delay {} exceeds {MAX_CAPTURE_DELAY}",
                cam.capture_delay
            )));
        }
        if cam.capture_bpp as usize != ARGB_BPP {
            return Err(invalid(format!(
                "camera.capture_bpp {} unsupported, the overlay draws ARGB8888 ({ARGB_BPP} bytes)",
                cam.capture_bpp
            )));
        }

        if self.nn.input_len() == 0 {
            return Err(invalid(format!(
                "nn input {}x{}x{} must be non-zero",
                self.nn.width, self.nn.height, self.nn.bpp
            )));
        }
        if self.display.encoder_buffer_size == 0 {
            return Err(invalid("display.encoder_buffer_size must be non-zero"));
        }
        if self.tasks.stack_size == 0 {
            return Err(invalid("tasks.stack_size must be non-zero"));
        }
        if !(0.0..=100.0).contains(&self.simulation.cpu_load_percent) {
            return Err(invalid(format!(
                "simulation.cpu_load_percent {} outside 0-100",
                self.simulation.cpu_load_percent
            )));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_firmware_tuning() {
        let config = VisionConfig::default();
        assert_eq!(config.camera.fps, 30);
        assert_eq!(config.camera.capture_delay, 1);
        assert_eq!(config.camera.ring_len(), 3);
        assert_eq!(config.camera.frame_len(), 1280 * 720 * 4);
        assert_eq!(config.nn.input_len(), 224 * 224 * 3);
        assert_eq!(config.display.encoder_buffer_size, 255 * 1024);
        assert!(!config.display.debug_overlay);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = VisionConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, VisionConfig::default());
    }

    #[test]
    #[serial]
    fn file_overrides_only_what_it_names() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [camera]
            fps = 15
            display_width = 640
            display_height = 480
            "#,
        );

        let config = VisionConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(config.camera.fps, 15);
        assert_eq!(config.camera.display_width, 640);
        assert_eq!(config.camera.capture_delay, 1);
        assert_eq!(config.nn, NnConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn environment_overrides_file() {
        let file = write_config("[camera]\nfps = 15\n");
        std::env::set_var("RUST_VISION_CAMERA__FPS", "60");
        std::env::set_var("RUST_VISION_DISPLAY__DEBUG_OVERLAY", "true");

        let result = VisionConfig::load_from(file.path());

        std::env::remove_var("RUST_VISION_CAMERA__FPS");
        std::env::remove_var("RUST_VISION_DISPLAY__DEBUG_OVERLAY");

        let config = result.unwrap();
        assert_eq!(config.camera.fps, 60);
        assert!(config.display.debug_overlay);
    }

    #[test]
    #[serial]
    fn malformed_values_fail_to_load() {
        let file = write_config("[camera]\nfps = \"fast\"\n");
        let err = VisionConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = VisionConfig::default();
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("verbose"));

        config.application.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unusable_camera_settings() {
        let mut config = VisionConfig::default();
        config.camera.fps = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.camera.display_height = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.camera.display_width = 1920;
        config.camera.display_height = 1080;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.camera.capture_delay = MAX_CAPTURE_DELAY + 1;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.camera.capture_bpp = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_buffers_and_bad_load() {
        let mut config = VisionConfig::default();
        config.nn.bpp = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.display.encoder_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.tasks.stack_size = 0;
        assert!(config.validate().is_err());

        let mut config = VisionConfig::default();
        config.simulation.cpu_load_percent = 120.0;
        assert!(config.validate().is_err());
    }
}
