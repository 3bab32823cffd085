//! Renderer configuration.
//!
//! [`RendererConfig`] collects every knob the renderer exposes. It is a plain
//! struct with sensible defaults and builder-style setters; the binary maps
//! its command line onto it.
//!
//! # Example
//!
//! ```
//! use minirender_renderer::config::{RendererConfig, TransformDelivery, UploadStrategy};
//!
//! let config = RendererConfig::default()
//!     .with_upload_strategy(UploadStrategy::HostVisible)
//!     .with_transform_delivery(TransformDelivery::DynamicUniform { max_objects: 16 })
//!     .with_depth(false);
//!
//! assert!(!config.enable_validation);
//! assert!(!config.depth);
//! ```

pub use minirender_rhi::pipeline::{FrontFace, TransformDelivery};

/// Environment variable that turns validation on when set to `1` or `true`.
pub const VALIDATION_ENV: &str = "MINIRENDER_VALIDATION";

/// Default clear color of the color attachment.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.6, 0.65, 0.4, 1.0];

/// How mesh data reaches GPU memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UploadStrategy {
    /// Copy through a host-visible staging buffer into device-local memory.
    #[default]
    Staged,
    /// Write straight into host-visible, host-coherent vertex and index buffers.
    HostVisible,
}

impl UploadStrategy {
    pub fn name(self) -> &'static str {
        match self {
            UploadStrategy::Staged => "staged",
            UploadStrategy::HostVisible => "host-visible",
        }
    }
}

/// Renderer configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable the Khronos validation layer and the debug messenger.
    pub enable_validation: bool,
    pub upload_strategy: UploadStrategy,
    pub front_face: FrontFace,
    pub transform_delivery: TransformDelivery,
    /// Render with a depth attachment and depth testing.
    pub depth: bool,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "minirender".to_string(),
            enable_validation: false,
            upload_strategy: UploadStrategy::default(),
            front_face: FrontFace::default(),
            transform_delivery: TransformDelivery::default(),
            depth: true,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

impl RendererConfig {
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    pub fn with_upload_strategy(mut self, strategy: UploadStrategy) -> Self {
        self.upload_strategy = strategy;
        self
    }

    pub fn with_front_face(mut self, front_face: FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    pub fn with_transform_delivery(mut self, delivery: TransformDelivery) -> Self {
        self.transform_delivery = delivery;
        self
    }

    pub fn with_depth(mut self, depth: bool) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    /// Turns validation on if [`VALIDATION_ENV`] asks for it.
    ///
    /// An unset or unrecognised value leaves the current setting alone.
    pub fn with_env_overrides(self) -> Self {
        let requested = std::env::var(VALIDATION_ENV).ok();
        self.apply_validation_env(requested.as_deref())
    }

    fn apply_validation_env(mut self, value: Option<&str>) -> Self {
        if value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
            self.enable_validation = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.app_name, "minirender");
        assert!(!config.enable_validation);
        assert_eq!(config.upload_strategy, UploadStrategy::Staged);
        assert_eq!(config.front_face, FrontFace::CounterClockwise);
        assert_eq!(config.transform_delivery, TransformDelivery::PushConstants);
        assert!(config.depth);
        assert_eq!(config.clear_color, [0.6, 0.65, 0.4, 1.0]);
    }

    #[test]
    fn test_builder_setters() {
        let config = RendererConfig::default()
            .with_app_name("demo")
            .with_validation(true)
            .with_front_face(FrontFace::Clockwise)
            .with_clear_color([0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.app_name, "demo");
        assert!(config.enable_validation);
        assert_eq!(config.front_face, FrontFace::Clockwise);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_validation_env_values() {
        let base = RendererConfig::default();
        assert!(base.clone().apply_validation_env(Some("1")).enable_validation);
        assert!(base.clone().apply_validation_env(Some("TRUE")).enable_validation);
        assert!(!base.clone().apply_validation_env(Some("0")).enable_validation);
        assert!(!base.clone().apply_validation_env(None).enable_validation);

        // The variable only ever turns validation on
        let enabled = base.with_validation(true);
        assert!(enabled.apply_validation_env(Some("0")).enable_validation);
    }

    #[test]
    fn test_upload_strategy_name() {
        assert_eq!(UploadStrategy::Staged.name(), "staged");
        assert_eq!(UploadStrategy::HostVisible.name(), "host-visible");
    }
}
