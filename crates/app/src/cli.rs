//! Command line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use minirender_renderer::RendererConfig;
use minirender_renderer::config::{FrontFace, TransformDelivery, UploadStrategy};
use minirender_rhi::vk;

#[derive(Parser, Debug)]
#[command(name = "minirender", version, about = "Draws two spinning quads with Vulkan")]
pub struct Args {
    /// Enable the Vulkan validation layer (also MINIRENDER_VALIDATION=1)
    #[arg(long)]
    pub validation: bool,

    /// How mesh data reaches GPU memory
    #[arg(long, value_enum, default_value_t = UploadArg::Staged)]
    pub upload: UploadArg,

    /// How per-object model matrices reach the vertex shader
    #[arg(long, value_enum, default_value_t = TransformsArg::PushConstants)]
    pub transforms: TransformsArg,

    /// Objects the dynamic uniform buffer can hold
    #[arg(long, default_value_t = 16)]
    pub max_objects: u32,

    /// Winding of front-facing triangles on screen
    #[arg(long, value_enum, default_value_t = FrontFaceArg::CounterClockwise)]
    pub front_face: FrontFaceArg,

    /// Render without a depth attachment
    #[arg(long)]
    pub no_depth: bool,

    /// Draw this many frames on the headless backend and exit
    #[arg(long, value_name = "FRAMES")]
    pub headless: Option<u64>,

    #[arg(long, default_value_t = 800)]
    pub width: u32,

    #[arg(long, default_value_t = 600)]
    pub height: u32,

    /// Directory holding the compiled SPIR-V shaders
    #[arg(long, default_value = "shaders")]
    pub shader_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum UploadArg {
    Staged,
    HostVisible,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransformsArg {
    PushConstants,
    DynamicUniform,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FrontFaceArg {
    CounterClockwise,
    Clockwise,
}

impl Args {
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn renderer_config(&self) -> RendererConfig {
        let upload = match self.upload {
            UploadArg::Staged => UploadStrategy::Staged,
            UploadArg::HostVisible => UploadStrategy::HostVisible,
        };
        let transforms = match self.transforms {
            TransformsArg::PushConstants => TransformDelivery::PushConstants,
            TransformsArg::DynamicUniform => TransformDelivery::DynamicUniform {
                max_objects: self.max_objects,
            },
        };
        let front_face = match self.front_face {
            FrontFaceArg::CounterClockwise => FrontFace::CounterClockwise,
            FrontFaceArg::Clockwise => FrontFace::Clockwise,
        };

        RendererConfig::default()
            .with_validation(self.validation)
            .with_upload_strategy(upload)
            .with_transform_delivery(transforms)
            .with_front_face(front_face)
            .with_depth(!self.no_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_renderer_defaults() {
        let args = Args::try_parse_from(["minirender"]).unwrap();
        assert_eq!(args.renderer_config(), RendererConfig::default());
        assert_eq!(args.headless, None);
        assert_eq!(args.shader_dir, PathBuf::from("shaders"));
        assert_eq!(
            args.extent(),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn test_all_flags() {
        let args = Args::try_parse_from([
            "minirender",
            "--validation",
            "--upload",
            "host-visible",
            "--transforms",
            "dynamic-uniform",
            "--max-objects",
            "8",
            "--front-face",
            "clockwise",
            "--no-depth",
            "--headless",
            "3",
            "--width",
            "320",
            "--height",
            "240",
        ])
        .unwrap();
        let config = args.renderer_config();

        assert!(config.enable_validation);
        assert_eq!(config.upload_strategy, UploadStrategy::HostVisible);
        assert_eq!(
            config.transform_delivery,
            TransformDelivery::DynamicUniform { max_objects: 8 }
        );
        assert_eq!(config.front_face, FrontFace::Clockwise);
        assert!(!config.depth);
        assert_eq!(args.headless, Some(3));
        assert_eq!(args.extent().width, 320);
    }

    #[test]
    fn test_rejects_unknown_upload() {
        assert!(Args::try_parse_from(["minirender", "--upload", "magic"]).is_err());
    }
}
