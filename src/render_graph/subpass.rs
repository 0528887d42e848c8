//! Subpass layout of the main render pass
//!
//! The order is fixed. Each subpass declares which attachments it reads as
//! inputs and which it writes; dependencies between subpasses are derived from
//! those declarations rather than written by hand.

use std::collections::BTreeMap;

use super::attachment::AttachmentId;
use crate::backend::{
    AccessScope, AttachmentReference, ImageLayout, RenderPassDescriptor, SubpassDependency,
    SubpassDescriptor, TextureFormat,
};
use crate::error::{RenderError, RenderResult};

/// Subpasses of the main render pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubpassId {
    GBuffer,
    DeferredLighting,
    ForwardLighting,
    ToneMapping,
    ColorGrading,
    Pixelation,
    Ui,
    CombineUi,
}

impl SubpassId {
    pub const ALL: [SubpassId; 8] = [
        SubpassId::GBuffer,
        SubpassId::DeferredLighting,
        SubpassId::ForwardLighting,
        SubpassId::ToneMapping,
        SubpassId::ColorGrading,
        SubpassId::Pixelation,
        SubpassId::Ui,
        SubpassId::CombineUi,
    ];

    pub fn index(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            SubpassId::GBuffer => "GBuffer",
            SubpassId::DeferredLighting => "DeferredLighting",
            SubpassId::ForwardLighting => "ForwardLighting",
            SubpassId::ToneMapping => "ToneMapping",
            SubpassId::ColorGrading => "ColorGrading",
            SubpassId::Pixelation => "Pixelation",
            SubpassId::Ui => "UI",
            SubpassId::CombineUi => "CombineUI",
        }
    }
}

/// How a subpass uses the depth attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthUse {
    Write,
    ReadOnly,
}

/// Attachment usage declared by one subpass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubpassDesc {
    pub id: SubpassId,
    /// Attachments read at the fragment's own pixel
    pub inputs: Vec<AttachmentId>,
    pub colors: Vec<AttachmentId>,
    pub depth: Option<DepthUse>,
    /// Reads pixels other than its own, so its input dependencies cannot be
    /// tile-local.
    pub samples_neighbours: bool,
}

impl SubpassDesc {
    fn new(id: SubpassId) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            colors: Vec::new(),
            depth: None,
            samples_neighbours: false,
        }
    }

    fn inputs(mut self, inputs: &[AttachmentId]) -> Self {
        self.inputs = inputs.to_vec();
        self
    }

    fn colors(mut self, colors: &[AttachmentId]) -> Self {
        self.colors = colors.to_vec();
        self
    }

    fn depth(mut self, depth: DepthUse) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Attachments this subpass writes
    pub fn writes(&self) -> impl Iterator<Item = AttachmentId> + '_ {
        let depth = (self.depth == Some(DepthUse::Write)).then_some(AttachmentId::Depth);
        self.colors.iter().copied().chain(depth)
    }

    fn writes_attachment(&self, attachment: AttachmentId) -> bool {
        self.writes().any(|a| a == attachment)
    }

    fn color_count(&self) -> usize {
        self.colors.len()
    }
}

/// The main render pass: every subpass and the attachments they share
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPassLayout {
    subpasses: Vec<SubpassDesc>,
}

impl RenderPassLayout {
    /// GBuffer, DeferredLighting, ForwardLighting, ToneMapping, ColorGrading,
    /// Pixelation, UI, CombineUI.
    pub fn deferred() -> Self {
        use AttachmentId::*;
        let mut pixelation = SubpassDesc::new(SubpassId::Pixelation).inputs(&[Graded]).colors(&[Pixelated]);
        pixelation.samples_neighbours = true;

        Self {
            subpasses: vec![
                SubpassDesc::new(SubpassId::GBuffer)
                    .colors(&[GBufferAlbedo, GBufferNormal, GBufferMaterial])
                    .depth(DepthUse::Write),
                SubpassDesc::new(SubpassId::DeferredLighting)
                    .inputs(&[GBufferAlbedo, GBufferNormal, GBufferMaterial, Depth])
                    .colors(&[Hdr]),
                SubpassDesc::new(SubpassId::ForwardLighting)
                    .colors(&[Hdr])
                    .depth(DepthUse::ReadOnly),
                SubpassDesc::new(SubpassId::ToneMapping).inputs(&[Hdr]).colors(&[Ldr]),
                SubpassDesc::new(SubpassId::ColorGrading).inputs(&[Ldr]).colors(&[Graded]),
                pixelation,
                SubpassDesc::new(SubpassId::Ui).colors(&[Ui]),
                SubpassDesc::new(SubpassId::CombineUi)
                    .inputs(&[Pixelated, Ui])
                    .colors(&[Swapchain]),
            ],
        }
    }

    #[cfg(test)]
    pub(crate) fn from_subpasses(subpasses: Vec<SubpassDesc>) -> Self {
        Self { subpasses }
    }

    pub fn subpasses(&self) -> &[SubpassDesc] {
        &self.subpasses
    }

    pub fn subpass(&self, id: SubpassId) -> Option<&SubpassDesc> {
        self.subpasses.iter().find(|s| s.id == id)
    }

    /// Number of color attachments written by `id`
    pub fn color_count(&self, id: SubpassId) -> usize {
        self.subpass(id).map_or(0, SubpassDesc::color_count)
    }

    /// Check ordering rules: every input is produced by an earlier subpass, no
    /// subpass reads what it writes, and only the last subpass writes the
    /// swapchain image.
    pub fn validate(&self) -> RenderResult<()> {
        if self.subpasses.is_empty() {
            return Err(RenderError::InvalidGraph("render pass has no subpasses".into()));
        }
        for (position, subpass) in self.subpasses.iter().enumerate() {
            if subpass.id.index() as usize != position {
                return Err(RenderError::InvalidGraph(format!(
                    "subpass {} is at position {}, expected {}",
                    subpass.id.name(),
                    position,
                    subpass.id.index()
                )));
            }
            for input in &subpass.inputs {
                if subpass.writes_attachment(*input) {
                    return Err(RenderError::InvalidGraph(format!(
                        "subpass {} both reads and writes {}",
                        subpass.id.name(),
                        input.label()
                    )));
                }
                if self.producer(*input, position).is_none() {
                    return Err(RenderError::InvalidGraph(format!(
                        "subpass {} reads {} before any subpass writes it",
                        subpass.id.name(),
                        input.label()
                    )));
                }
            }
            if subpass.depth == Some(DepthUse::ReadOnly) && self.producer(AttachmentId::Depth, position).is_none() {
                return Err(RenderError::InvalidGraph(format!(
                    "subpass {} tests depth before any subpass writes it",
                    subpass.id.name()
                )));
            }
            let writes_swapchain = subpass.writes_attachment(AttachmentId::Swapchain);
            if writes_swapchain != (position + 1 == self.subpasses.len()) {
                return Err(RenderError::InvalidGraph(format!(
                    "only the final subpass may write the swapchain image, found {}",
                    subpass.id.name()
                )));
            }
        }
        Ok(())
    }

    /// Last subpass before `before` that writes `attachment`
    fn producer(&self, attachment: AttachmentId, before: usize) -> Option<usize> {
        self.subpasses[..before]
            .iter()
            .rposition(|s| s.writes_attachment(attachment))
    }

    /// Dependencies implied by the producer/consumer pairs, merged per pair of
    /// subpasses. Shadow maps and the acquired swapchain image come from
    /// outside the pass.
    pub fn dependencies(&self) -> Vec<SubpassDependency> {
        let mut merged: BTreeMap<(Option<u32>, Option<u32>), SubpassDependency> = BTreeMap::new();
        let mut add = |dependency: SubpassDependency| {
            let key = (dependency.src, dependency.dst);
            merged
                .entry(key)
                .and_modify(|existing| {
                    existing.src_access |= dependency.src_access;
                    existing.dst_access |= dependency.dst_access;
                    existing.by_region &= dependency.by_region;
                })
                .or_insert(dependency);
        };

        for (position, subpass) in self.subpasses.iter().enumerate() {
            let dst = Some(position as u32);
            for input in &subpass.inputs {
                if let Some(producer) = self.producer(*input, position) {
                    add(SubpassDependency {
                        src: Some(producer as u32),
                        dst,
                        src_access: write_access(*input),
                        dst_access: AccessScope::SHADER_READ,
                        by_region: !subpass.samples_neighbours,
                    });
                }
            }
            if subpass.depth == Some(DepthUse::ReadOnly) {
                if let Some(producer) = self.producer(AttachmentId::Depth, position) {
                    add(SubpassDependency {
                        src: Some(producer as u32),
                        dst,
                        src_access: AccessScope::DEPTH_WRITE,
                        dst_access: AccessScope::DEPTH_READ,
                        by_region: true,
                    });
                }
            }
            for color in &subpass.colors {
                if let Some(producer) = self.producer(*color, position) {
                    add(SubpassDependency {
                        src: Some(producer as u32),
                        dst,
                        src_access: AccessScope::COLOR_WRITE,
                        dst_access: AccessScope::COLOR_WRITE | AccessScope::COLOR_READ,
                        by_region: true,
                    });
                }
            }

            let lit = matches!(subpass.id, SubpassId::DeferredLighting | SubpassId::ForwardLighting);
            if lit {
                add(SubpassDependency {
                    src: None,
                    dst,
                    src_access: AccessScope::DEPTH_WRITE,
                    dst_access: AccessScope::SHADER_READ,
                    by_region: false,
                });
            }
            if subpass.writes_attachment(AttachmentId::Swapchain) {
                add(SubpassDependency {
                    src: None,
                    dst,
                    src_access: AccessScope::COLOR_WRITE,
                    dst_access: AccessScope::COLOR_WRITE,
                    by_region: false,
                });
            }
        }
        merged.into_values().collect()
    }

    /// Backend description of the render pass
    pub fn descriptor(&self, swapchain_format: TextureFormat) -> RenderPassDescriptor {
        let subpasses = self
            .subpasses
            .iter()
            .map(|subpass| SubpassDescriptor {
                inputs: subpass
                    .inputs
                    .iter()
                    .map(|a| AttachmentReference {
                        attachment: a.index(),
                        layout: if a.is_depth() {
                            ImageLayout::DepthReadOnly
                        } else {
                            ImageLayout::ShaderReadOnly
                        },
                    })
                    .collect(),
                colors: subpass
                    .colors
                    .iter()
                    .map(|a| AttachmentReference {
                        attachment: a.index(),
                        layout: ImageLayout::ColorAttachment,
                    })
                    .collect(),
                depth: subpass.depth.map(|use_| AttachmentReference {
                    attachment: AttachmentId::Depth.index(),
                    layout: match use_ {
                        DepthUse::Write => ImageLayout::DepthAttachment,
                        DepthUse::ReadOnly => ImageLayout::DepthReadOnly,
                    },
                }),
            })
            .collect();

        RenderPassDescriptor {
            label: "Deferred Main Pass".into(),
            attachments: AttachmentId::ALL.iter().map(|a| a.descriptor(swapchain_format)).collect(),
            subpasses,
            dependencies: self.dependencies(),
        }
    }
}

fn write_access(attachment: AttachmentId) -> AccessScope {
    if attachment.is_depth() {
        AccessScope::DEPTH_WRITE
    } else {
        AccessScope::COLOR_WRITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(deps: &[SubpassDependency], src: Option<SubpassId>, dst: SubpassId) -> Option<SubpassDependency> {
        deps.iter()
            .find(|d| d.src == src.map(SubpassId::index) && d.dst == Some(dst.index()))
            .copied()
    }

    #[test]
    fn test_deferred_layout_is_valid() {
        let layout = RenderPassLayout::deferred();
        layout.validate().unwrap();
        let order: Vec<SubpassId> = layout.subpasses().iter().map(|s| s.id).collect();
        assert_eq!(order, SubpassId::ALL.to_vec());
    }

    #[test]
    fn test_dependencies_follow_producers() {
        let deps = RenderPassLayout::deferred().dependencies();

        let gbuffer = find(&deps, Some(SubpassId::GBuffer), SubpassId::DeferredLighting).unwrap();
        assert!(gbuffer.src_access.contains(AccessScope::COLOR_WRITE | AccessScope::DEPTH_WRITE));
        assert!(gbuffer.by_region);

        // Forward shading tests against the G-buffer depth and blends over the lit image.
        let depth = find(&deps, Some(SubpassId::GBuffer), SubpassId::ForwardLighting).unwrap();
        assert_eq!(depth.dst_access, AccessScope::DEPTH_READ);
        let hdr = find(&deps, Some(SubpassId::DeferredLighting), SubpassId::ForwardLighting).unwrap();
        assert!(hdr.dst_access.contains(AccessScope::COLOR_READ));

        // Tone mapping reads the forward output, not the deferred one.
        assert!(find(&deps, Some(SubpassId::ForwardLighting), SubpassId::ToneMapping).is_some());
        assert!(find(&deps, Some(SubpassId::DeferredLighting), SubpassId::ToneMapping).is_none());

        let pixelation = find(&deps, Some(SubpassId::ColorGrading), SubpassId::Pixelation).unwrap();
        assert!(!pixelation.by_region);

        let combine_scene = find(&deps, Some(SubpassId::Pixelation), SubpassId::CombineUi).unwrap();
        let combine_ui = find(&deps, Some(SubpassId::Ui), SubpassId::CombineUi).unwrap();
        assert!(combine_scene.by_region && combine_ui.by_region);

        assert!(find(&deps, None, SubpassId::DeferredLighting).is_some());
        assert!(find(&deps, None, SubpassId::CombineUi).is_some());
    }

    #[test]
    fn test_read_before_write_is_rejected() {
        let mut subpasses = RenderPassLayout::deferred().subpasses().to_vec();
        // Tone mapping no longer has anything to read.
        subpasses[1].colors.clear();
        subpasses[2].colors.clear();
        let err = RenderPassLayout::from_subpasses(subpasses).validate().unwrap_err();
        assert!(matches!(err, RenderError::InvalidGraph(_)));
    }

    #[test]
    fn test_swapchain_only_written_last() {
        let mut subpasses = RenderPassLayout::deferred().subpasses().to_vec();
        subpasses[6].colors.push(AttachmentId::Swapchain);
        let err = RenderPassLayout::from_subpasses(subpasses).validate().unwrap_err();
        assert!(matches!(err, RenderError::InvalidGraph(_)));
    }

    #[test]
    fn test_out_of_order_subpass_is_rejected() {
        let mut subpasses = RenderPassLayout::deferred().subpasses().to_vec();
        subpasses.swap(3, 4);
        assert!(RenderPassLayout::from_subpasses(subpasses).validate().is_err());
    }

    #[test]
    fn test_descriptor_lists_every_attachment() {
        let desc = RenderPassLayout::deferred().descriptor(TextureFormat::Bgra8UnormSrgb);
        assert_eq!(desc.attachments.len(), AttachmentId::ALL.len());
        assert_eq!(desc.subpasses.len(), SubpassId::ALL.len());
        let lighting = &desc.subpasses[SubpassId::DeferredLighting.index() as usize];
        assert_eq!(lighting.inputs.len(), 4);
        assert_eq!(lighting.inputs[3].layout, ImageLayout::DepthReadOnly);
        let forward = &desc.subpasses[SubpassId::ForwardLighting.index() as usize];
        assert_eq!(forward.depth.map(|d| d.layout), Some(ImageLayout::DepthReadOnly));
    }
}
