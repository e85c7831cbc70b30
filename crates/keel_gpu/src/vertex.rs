//! Vertex layout identity
//!
//! Vertex arenas are keyed by the layout of the data packed into them, so
//! meshes with identical attribute shapes share a backing buffer and draw
//! back-to-back without rebinding. The 64-bit layout hash feeds the pool's
//! compatibility signature.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// One vertex attribute within a layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttr {
    pub location: u32,
    pub format: wgpu::VertexFormat,
    pub offset: u64,
}

/// Stride plus attribute list describing one vertex buffer layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub stride: u64,
    pub attributes: Vec<VertexAttr>,
}

impl VertexLayout {
    pub fn new(stride: u64) -> Self {
        Self { stride, attributes: Vec::new() }
    }

    pub fn with_attr(mut self, location: u32, format: wgpu::VertexFormat, offset: u64) -> Self {
        self.attributes.push(VertexAttr { location, format, offset });
        self
    }

    /// Stable-within-process hash used in arena compatibility signatures.
    pub fn hash64(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_layouts_hash_equal() {
        let a = VertexLayout::new(32)
            .with_attr(0, wgpu::VertexFormat::Float32x3, 0)
            .with_attr(1, wgpu::VertexFormat::Float32x3, 12)
            .with_attr(2, wgpu::VertexFormat::Float32x2, 24);
        let b = VertexLayout::new(32)
            .with_attr(0, wgpu::VertexFormat::Float32x3, 0)
            .with_attr(1, wgpu::VertexFormat::Float32x3, 12)
            .with_attr(2, wgpu::VertexFormat::Float32x2, 24);
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn different_layouts_hash_differently() {
        let a = VertexLayout::new(24).with_attr(0, wgpu::VertexFormat::Float32x3, 0);
        let b = VertexLayout::new(32).with_attr(0, wgpu::VertexFormat::Float32x3, 0);
        let c = VertexLayout::new(24).with_attr(0, wgpu::VertexFormat::Float32x4, 0);
        assert_ne!(a.hash64(), b.hash64());
        assert_ne!(a.hash64(), c.hash64());
    }
}
