//! SPIR-V loading.
//!
//! Shaders are compiled offline with `glslc` from the GLSL sources in
//! `shaders/`. The push-constant and dynamic-uniform transform paths use
//! different vertex shaders; both share the fragment shader.

use std::path::Path;

use minirender_core::{Error, Result};
use minirender_renderer::config::TransformDelivery;
use tracing::debug;

pub const VERTEX_SHADER: &str = "shader.vert.spv";
pub const DYNAMIC_VERTEX_SHADER: &str = "shader.dynamic.vert.spv";
pub const FRAGMENT_SHADER: &str = "shader.frag.spv";

/// Compiled vertex and fragment bytecode.
#[derive(Debug)]
pub struct ShaderBinaries {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

/// Reads a SPIR-V binary.
pub fn load_spirv(path: &Path) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(|source| Error::ShaderRead {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
    Ok(bytes)
}

/// Loads the shader pair matching the transform delivery from `dir`.
pub fn load_shaders(dir: &Path, delivery: TransformDelivery) -> Result<ShaderBinaries> {
    let vertex = if delivery.is_dynamic_uniform() {
        DYNAMIC_VERTEX_SHADER
    } else {
        VERTEX_SHADER
    };
    Ok(ShaderBinaries {
        vertex: load_spirv(&dir.join(vertex))?,
        fragment: load_spirv(&dir.join(FRAGMENT_SHADER))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("minirender-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_spirv_reads_bytes() {
        let dir = scratch_dir("load");
        let path = dir.join("shader.vert.spv");
        std::fs::write(&path, [3u8, 2, 35, 7]).unwrap();

        assert_eq!(load_spirv(&path).unwrap(), vec![3, 2, 35, 7]);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let dir = scratch_dir("missing");
        let err = load_shaders(&dir, TransformDelivery::PushConstants).unwrap_err();
        assert!(matches!(err, Error::ShaderRead { ref path, .. } if path.ends_with(VERTEX_SHADER)));
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_dynamic_delivery_picks_its_vertex_shader() {
        let dir = scratch_dir("dynamic");
        std::fs::write(dir.join(DYNAMIC_VERTEX_SHADER), [1u8]).unwrap();
        std::fs::write(dir.join(FRAGMENT_SHADER), [2u8]).unwrap();

        let shaders =
            load_shaders(&dir, TransformDelivery::DynamicUniform { max_objects: 4 }).unwrap();
        assert_eq!(shaders.vertex, vec![1]);
        assert_eq!(shaders.fragment, vec![2]);
        std::fs::remove_dir_all(dir).unwrap();
    }
}
