//! Shader module management.
//!
//! This module validates SPIR-V bytecode and wraps shader module creation.
//! The engine core never touches the filesystem; callers load the bytecode
//! and hand over bytes.
//!
//! # Overview
//!
//! - [`ShaderStage`] defines the type of shader (vertex or fragment)
//! - [`spirv_words`] checks and converts a SPIR-V blob into code words
//! - [`Shader`] pairs a shader module with its stage
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::shader::{Shader, ShaderStage};
//!
//! # fn example(device: &dyn GpuDevice, spirv_bytes: &[u8]) -> Result<(), minirender_rhi::RhiError> {
//! let vertex_shader = Shader::from_spirv_bytes(device, spirv_bytes, ShaderStage::Vertex)?;
//! // ... create the pipeline with vertex_shader.handle() ...
//! vertex_shader.destroy(device);
//! # Ok(())
//! # }
//! ```

use std::ffi::CStr;
use std::io::Cursor;

use ash::vk;
use tracing::{debug, warn};

use crate::backend::GpuDevice;
use crate::error::{RhiError, RhiResult};

/// Entry point every shader module is expected to export.
pub const ENTRY_POINT: &CStr = c"main";

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Converts SPIR-V bytes into little-endian code words.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`] if the length is not a multiple of 4 or
/// the blob does not start with the SPIR-V magic number.
pub fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    // Validate SPIR-V alignment
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| RhiError::ShaderError(format!("Failed to read SPIR-V: {}", e)))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&word) => Err(RhiError::ShaderError(format!(
            "Invalid SPIR-V magic number {:#010x}",
            word
        ))),
        None => Err(RhiError::ShaderError("Empty SPIR-V module".to_string())),
    }
}

/// Shader module wrapper.
///
/// Destroy it with [`Shader::destroy`] once the pipelines using it exist;
/// pipelines do not keep modules alive.
pub struct Shader {
    module: vk::ShaderModule,
    stage: ShaderStage,
    destroyed: bool,
}

impl Shader {
    /// Creates a shader module from SPIR-V bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The bytes are not a SPIR-V module ([`spirv_words`])
    /// - Shader module creation fails
    pub fn from_spirv_bytes(
        device: &dyn GpuDevice,
        bytes: &[u8],
        stage: ShaderStage,
    ) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;
        let module = device.create_shader_module(&code)?;

        debug!(
            "Created {} shader module ({} words) with entry point '{}'",
            stage,
            code.len(),
            ENTRY_POINT.to_string_lossy()
        );

        Ok(Self {
            module,
            stage,
            destroyed: false,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn destroy(mut self, device: &dyn GpuDevice) {
        device.destroy_shader_module(self.module);
        self.destroyed = true;
        debug!("Destroyed {} shader module", self.stage);
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("{} shader module dropped without destroy", self.stage);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, ObjectKind};

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Vertex), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }

    #[test]
    fn test_spirv_words_accepts_module() {
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = spirv_words(&bytes).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_spirv_words_rejects_misaligned() {
        let mut bytes = module_bytes(&[SPIRV_MAGIC, 0]);
        bytes.push(0);
        assert!(matches!(
            spirv_words(&bytes),
            Err(RhiError::ShaderError(_))
        ));
    }

    #[test]
    fn test_spirv_words_rejects_bad_magic() {
        let bytes = module_bytes(&[0xdead_beef, 0]);
        assert!(matches!(
            spirv_words(&bytes),
            Err(RhiError::ShaderError(_))
        ));
        assert!(spirv_words(&[]).is_err());
    }

    #[test]
    fn test_shader_create_and_destroy() {
        let device = HeadlessDevice::new_default();
        let bytes = module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);

        let shader = Shader::from_spirv_bytes(&*device, &bytes, ShaderStage::Fragment).unwrap();
        assert_eq!(shader.stage(), ShaderStage::Fragment);
        assert_eq!(device.live_objects_of(ObjectKind::ShaderModule), 1);

        shader.destroy(&*device);
        assert_eq!(device.live_objects(), 0);
    }
}
