//! Attachments of the main render pass

use crate::backend::{
    AttachmentDescriptor, ClearValue, ImageLayout, LoadOp, StoreOp, TextureFormat, TextureUsage,
};

/// Every image the main render pass reads or writes, in framebuffer order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttachmentId {
    GBufferAlbedo,
    GBufferNormal,
    GBufferMaterial,
    Depth,
    /// Lit scene in linear HDR
    Hdr,
    /// Tone-mapped
    Ldr,
    Graded,
    Pixelated,
    /// UI layer, premultiplied alpha
    Ui,
    Swapchain,
}

impl AttachmentId {
    pub const ALL: [AttachmentId; 10] = [
        AttachmentId::GBufferAlbedo,
        AttachmentId::GBufferNormal,
        AttachmentId::GBufferMaterial,
        AttachmentId::Depth,
        AttachmentId::Hdr,
        AttachmentId::Ldr,
        AttachmentId::Graded,
        AttachmentId::Pixelated,
        AttachmentId::Ui,
        AttachmentId::Swapchain,
    ];

    /// Position in the render pass attachment list
    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            AttachmentId::GBufferAlbedo => "GBuffer Albedo",
            AttachmentId::GBufferNormal => "GBuffer Normal",
            AttachmentId::GBufferMaterial => "GBuffer Material",
            AttachmentId::Depth => "Depth",
            AttachmentId::Hdr => "HDR Color",
            AttachmentId::Ldr => "LDR Color",
            AttachmentId::Graded => "Graded Color",
            AttachmentId::Pixelated => "Pixelated Color",
            AttachmentId::Ui => "UI Layer",
            AttachmentId::Swapchain => "Swapchain",
        }
    }

    pub fn format(self, swapchain_format: TextureFormat) -> TextureFormat {
        match self {
            AttachmentId::GBufferAlbedo => TextureFormat::Rgba8UnormSrgb,
            AttachmentId::GBufferNormal => TextureFormat::Rgba16Float,
            AttachmentId::GBufferMaterial => TextureFormat::Rgba8Unorm,
            AttachmentId::Depth => TextureFormat::Depth32Float,
            AttachmentId::Hdr => TextureFormat::Rgba16Float,
            AttachmentId::Ldr | AttachmentId::Graded | AttachmentId::Pixelated | AttachmentId::Ui => {
                TextureFormat::Rgba8UnormSrgb
            }
            AttachmentId::Swapchain => swapchain_format,
        }
    }

    pub fn is_depth(self) -> bool {
        self == AttachmentId::Depth
    }

    /// Images the graph allocates itself; the swapchain image comes from the device.
    pub fn is_transient(self) -> bool {
        self != AttachmentId::Swapchain
    }

    pub fn usage(self) -> TextureUsage {
        if self.is_depth() {
            TextureUsage::DEPTH_ATTACHMENT | TextureUsage::INPUT_ATTACHMENT | TextureUsage::SAMPLED
        } else {
            TextureUsage::COLOR_ATTACHMENT | TextureUsage::INPUT_ATTACHMENT | TextureUsage::SAMPLED
        }
    }

    /// Clear value used at the start of the render pass
    pub fn clear_value(self) -> ClearValue {
        match self {
            AttachmentId::Depth => ClearValue::Depth(1.0),
            // Default roughness of 0.5 for pixels no geometry covers
            AttachmentId::GBufferNormal => ClearValue::Color([0.0, 0.0, 0.0, 0.5]),
            _ => ClearValue::Color([0.0, 0.0, 0.0, 0.0]),
        }
    }

    pub fn load_op(self) -> LoadOp {
        match self {
            AttachmentId::GBufferAlbedo
            | AttachmentId::GBufferNormal
            | AttachmentId::GBufferMaterial
            | AttachmentId::Depth
            | AttachmentId::Ui => LoadOp::Clear,
            // Fully overwritten by a fullscreen draw
            AttachmentId::Hdr
            | AttachmentId::Ldr
            | AttachmentId::Graded
            | AttachmentId::Pixelated
            | AttachmentId::Swapchain => LoadOp::DontCare,
        }
    }

    pub fn descriptor(self, swapchain_format: TextureFormat) -> AttachmentDescriptor {
        let (store_op, final_layout) = match self {
            AttachmentId::Swapchain => (StoreOp::Store, ImageLayout::Present),
            AttachmentId::Depth => (StoreOp::DontCare, ImageLayout::DepthReadOnly),
            _ => (StoreOp::DontCare, ImageLayout::ShaderReadOnly),
        };
        AttachmentDescriptor {
            format: self.format(swapchain_format),
            load_op: self.load_op(),
            store_op,
            initial_layout: ImageLayout::Undefined,
            final_layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_follow_declaration_order() {
        for (i, id) in AttachmentId::ALL.iter().enumerate() {
            assert_eq!(id.index() as usize, i);
        }
    }

    #[test]
    fn test_only_swapchain_is_presented() {
        for id in AttachmentId::ALL {
            let desc = id.descriptor(TextureFormat::Bgra8UnormSrgb);
            assert_eq!(desc.final_layout == ImageLayout::Present, id == AttachmentId::Swapchain);
            assert_eq!(desc.store_op == StoreOp::Store, id == AttachmentId::Swapchain);
        }
        assert_eq!(
            AttachmentId::Swapchain.format(TextureFormat::Bgra8Unorm),
            TextureFormat::Bgra8Unorm
        );
    }
}
