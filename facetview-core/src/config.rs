//! Options for loading and triangulation.

/// Options consumed by the STL decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Reject a binary STL shorter than its declared triangle count before
    /// reading any triangle. When off, every complete triangle present is
    /// kept and the shortfall is recorded as a warning.
    pub strict_binary_length: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            strict_binary_length: true,
        }
    }
}

impl LoadOptions {
    /// Accept truncated binary STL files.
    pub fn permissive() -> Self {
        Self {
            strict_binary_length: false,
        }
    }
}

/// Options consumed by the facet triangulator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangulationOptions {
    /// Length of debug normal segments relative to the mesh's largest extent.
    pub normal_length_scale: f32,
    /// Emit one segment per facet along its normal.
    pub facet_normals: bool,
    /// Emit one segment per triangle along its own face normal.
    pub triangle_normals: bool,
    /// Emit the three boundary segments of every triangle.
    pub triangle_edges: bool,
}

impl Default for TriangulationOptions {
    fn default() -> Self {
        Self {
            normal_length_scale: 0.05,
            facet_normals: false,
            triangle_normals: false,
            triangle_edges: false,
        }
    }
}

impl TriangulationOptions {
    /// All debug overlays enabled.
    pub fn debug() -> Self {
        Self {
            facet_normals: true,
            triangle_normals: true,
            triangle_edges: true,
            ..Self::default()
        }
    }

    /// Length of debug normal segments for a mesh of the given extent.
    pub fn normal_length(&self, max_extent: f32) -> f32 {
        (max_extent * self.normal_length_scale).max(0.001)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert!(LoadOptions::default().strict_binary_length);
        assert!(!LoadOptions::permissive().strict_binary_length);

        let options = TriangulationOptions::default();
        assert!(!options.facet_normals && !options.triangle_normals && !options.triangle_edges);
        let debug = TriangulationOptions::debug();
        assert!(debug.facet_normals && debug.triangle_normals && debug.triangle_edges);
        assert_eq!(debug.normal_length_scale, options.normal_length_scale);
    }

    #[test]
    fn test_normal_length_has_floor() {
        let options = TriangulationOptions::default();
        assert_eq!(options.normal_length(0.0), 0.001);
        assert!((options.normal_length(10.0) - 0.5).abs() < 1e-6);
    }
}
