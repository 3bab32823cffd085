//! Render pass and framebuffer creation.
//!
//! The renderer uses a single render pass with one graphics subpass:
//! - Attachment 0: the swapchain color image, cleared and stored, ending in
//!   `PRESENT_SRC_KHR`
//! - Attachment 1 (optional): a depth image, cleared and discarded
//!
//! [`RenderPassConfig::desc`] builds the backend-neutral description so the
//! attachment and dependency setup can be checked without creating anything.
//!
//! # Example
//!
//! ```no_run
//! use minirender_rhi::backend::GpuDevice;
//! use minirender_rhi::render_pass::{RenderPassConfig, create_framebuffers, create_render_pass};
//! use minirender_rhi::vk;
//!
//! # fn example(device: &dyn GpuDevice, views: &[vk::ImageView], depth_view: vk::ImageView)
//! #     -> Result<(), minirender_rhi::RhiError> {
//! let config = RenderPassConfig {
//!     color_format: vk::Format::B8G8R8A8_UNORM,
//!     depth_format: Some(vk::Format::D32_SFLOAT),
//! };
//! let render_pass = create_render_pass(device, &config)?;
//! let extent = vk::Extent2D { width: 800, height: 600 };
//! let framebuffers = create_framebuffers(device, render_pass, views, Some(depth_view), extent)?;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::backend::{FramebufferDesc, GpuDevice, RenderPassDesc};
use crate::error::RhiResult;

/// Formats of the render pass attachments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderPassConfig {
    /// Swapchain image format.
    pub color_format: vk::Format,
    /// Depth attachment format; `None` renders without depth.
    pub depth_format: Option<vk::Format>,
}

impl RenderPassConfig {
    /// Returns true if the pass has a depth attachment.
    #[inline]
    pub fn has_depth(&self) -> bool {
        self.depth_format.is_some()
    }

    /// Builds the single-subpass description.
    pub fn desc(&self) -> RenderPassDesc {
        let mut attachments = vec![vk::AttachmentDescription {
            format: self.color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        }];
        let color_attachment = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };

        let depth_attachment = self.depth_format.map(|format| {
            attachments.push(vk::AttachmentDescription {
                format,
                samples: vk::SampleCountFlags::TYPE_1,
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::DONT_CARE,
                stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
                stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                ..Default::default()
            });
            vk::AttachmentReference {
                attachment: 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        // The single depth image is shared by every frame slot, so the
        // previous frame's depth writes must finish before this frame clears it
        let (src_depth_stages, dst_depth_stages, depth_access) = if self.has_depth() {
            (
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
        } else {
            (
                vk::PipelineStageFlags::empty(),
                vk::PipelineStageFlags::empty(),
                vk::AccessFlags::empty(),
            )
        };
        let color_access =
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;

        let dependencies = vec![
            // Presentation engine reads finish before the subpass writes
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE | src_depth_stages,
                dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | dst_depth_stages,
                src_access_mask: vk::AccessFlags::MEMORY_READ | depth_access,
                dst_access_mask: color_access | depth_access,
                ..Default::default()
            },
            // Subpass writes finish before presentation reads
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage_mask: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                src_access_mask: color_access,
                dst_access_mask: vk::AccessFlags::MEMORY_READ,
                ..Default::default()
            },
        ];

        RenderPassDesc {
            attachments,
            color_attachment,
            depth_attachment,
            dependencies,
        }
    }
}

/// Creates the render pass described by `config`.
pub fn create_render_pass(
    device: &dyn GpuDevice,
    config: &RenderPassConfig,
) -> RhiResult<vk::RenderPass> {
    let render_pass = device.create_render_pass(&config.desc())?;
    debug!(
        "Created render pass: color {:?}, depth {:?}",
        config.color_format, config.depth_format
    );
    Ok(render_pass)
}

/// Creates one framebuffer per swapchain view.
///
/// Each framebuffer lists the color view, then `depth_view` when given.
/// On failure the framebuffers created so far are destroyed.
pub fn create_framebuffers(
    device: &dyn GpuDevice,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    depth_view: Option<vk::ImageView>,
    extent: vk::Extent2D,
) -> RhiResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(views.len());

    for &view in views {
        let attachments: Vec<vk::ImageView> = std::iter::once(view).chain(depth_view).collect();
        match device.create_framebuffer(&FramebufferDesc {
            render_pass,
            attachments: &attachments,
            extent,
        }) {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                destroy_framebuffers(device, framebuffers);
                return Err(e);
            }
        }
    }

    debug!(
        "Created {} framebuffers ({}x{})",
        framebuffers.len(),
        extent.width,
        extent.height
    );
    Ok(framebuffers)
}

pub fn destroy_framebuffers(device: &dyn GpuDevice, framebuffers: Vec<vk::Framebuffer>) {
    for framebuffer in framebuffers {
        device.destroy_framebuffer(framebuffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageDesc;
    use crate::headless::{HeadlessAdapter, HeadlessDevice, ObjectKind};
    use crate::image::{GpuImage, create_view};
    use crate::memory::{MemoryLocation, memory_properties_from_flags};

    fn config(depth_format: Option<vk::Format>) -> RenderPassConfig {
        RenderPassConfig {
            color_format: vk::Format::B8G8R8A8_UNORM,
            depth_format,
        }
    }

    #[test]
    fn test_color_attachment() {
        let desc = config(None).desc();
        assert_eq!(desc.attachments.len(), 1);

        let color = desc.attachments[0];
        assert_eq!(color.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(color.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(color.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(color.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(color.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(color.stencil_store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(color.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(color.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            desc.color_attachment.layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert!(desc.depth_attachment.is_none());
    }

    #[test]
    fn test_depth_attachment() {
        let desc = config(Some(vk::Format::D32_SFLOAT)).desc();
        assert_eq!(desc.attachments.len(), 2);

        let depth = desc.attachments[1];
        assert_eq!(depth.format, vk::Format::D32_SFLOAT);
        assert_eq!(depth.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(depth.store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(depth.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(
            depth.final_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );

        let reference = desc.depth_attachment.unwrap();
        assert_eq!(reference.attachment, 1);
        assert_eq!(
            reference.layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
    }

    #[test]
    fn test_dependencies_without_depth() {
        let desc = config(None).desc();
        assert_eq!(desc.dependencies.len(), 2);

        let incoming = desc.dependencies[0];
        assert_eq!(incoming.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(incoming.dst_subpass, 0);
        assert_eq!(incoming.src_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(incoming.src_access_mask, vk::AccessFlags::MEMORY_READ);
        assert_eq!(
            incoming.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            incoming.dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );

        let outgoing = desc.dependencies[1];
        assert_eq!(outgoing.src_subpass, 0);
        assert_eq!(outgoing.dst_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(
            outgoing.src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            outgoing.src_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(outgoing.dst_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(outgoing.dst_access_mask, vk::AccessFlags::MEMORY_READ);
    }

    #[test]
    fn test_dependencies_with_depth() {
        let desc = config(Some(vk::Format::D32_SFLOAT)).desc();
        let incoming = desc.dependencies[0];
        assert!(
            incoming
                .dst_stage_mask
                .contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
        assert!(
            incoming
                .dst_access_mask
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );

        // Earlier depth writes are made available before the clear
        assert_eq!(
            incoming.src_stage_mask,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            incoming.src_access_mask,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn test_framebuffers_per_view() {
        let device = HeadlessDevice::new_default();
        let props = memory_properties_from_flags(&HeadlessAdapter::default().memory_types);
        let extent = vk::Extent2D {
            width: 16,
            height: 16,
        };
        let image_desc = |format, usage| ImageDesc {
            extent,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
        };

        let color_images: Vec<GpuImage> = (0..3)
            .map(|_| {
                GpuImage::allocate(
                    &*device,
                    &props,
                    &image_desc(
                        vk::Format::B8G8R8A8_UNORM,
                        vk::ImageUsageFlags::COLOR_ATTACHMENT,
                    ),
                    MemoryLocation::DeviceLocal,
                )
                .unwrap()
            })
            .collect();
        let views: Vec<vk::ImageView> = color_images
            .iter()
            .map(|image| {
                create_view(
                    &*device,
                    image.handle(),
                    image.format(),
                    vk::ImageAspectFlags::COLOR,
                )
                .unwrap()
            })
            .collect();
        let depth = GpuImage::allocate(
            &*device,
            &props,
            &image_desc(
                vk::Format::D32_SFLOAT,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ),
            MemoryLocation::DeviceLocal,
        )
        .unwrap();
        let depth_view = create_view(
            &*device,
            depth.handle(),
            depth.format(),
            vk::ImageAspectFlags::DEPTH,
        )
        .unwrap();

        let render_pass =
            create_render_pass(&*device, &config(Some(vk::Format::D32_SFLOAT))).unwrap();
        assert_eq!(
            device.render_pass_info(render_pass).unwrap().attachments.len(),
            2
        );

        // Missing depth view does not match the pass; nothing is left behind
        assert!(create_framebuffers(&*device, render_pass, &views, None, extent).is_err());
        assert_eq!(device.live_objects_of(ObjectKind::Framebuffer), 0);

        let framebuffers =
            create_framebuffers(&*device, render_pass, &views, Some(depth_view), extent).unwrap();
        assert_eq!(framebuffers.len(), 3);
        assert_eq!(device.live_objects_of(ObjectKind::Framebuffer), 3);

        destroy_framebuffers(&*device, framebuffers);
        device.destroy_render_pass(render_pass);
        device.destroy_image_view(depth_view);
        depth.release(&*device);
        for view in views {
            device.destroy_image_view(view);
        }
        for image in color_images {
            image.release(&*device);
        }
        assert_eq!(device.live_objects(), 0);
    }
}
