//! Facet triangulation into render-ready buffers.
//!
//! Every facet becomes `n - 2` triangles. Polygons with more than three
//! vertices are projected onto their own plane and ear-clipped; when the
//! ear clipper does not return `n - 2` triangles a fan from the first vertex
//! is used instead. Each emitted triangle is wound to agree with its facet's
//! normal, and its solid vertices carry the facet normal and centroid so a
//! split polygon shades as one flat face.

use nalgebra::{Point3, Vector3};
use tracing::{debug, warn};

use crate::config::TriangulationOptions;
use crate::geometry::{centroid, newell_normal, triangle_normal, Facet, Mesh, FALLBACK_NORMAL};

/// Newell normals shorter than this fall back to the first three vertices.
pub const NEWELL_EPSILON: f32 = 1e-8;

/// Vertex of the non-indexed solid stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolidVertex {
    pub position: Point3<f32>,
    /// Normal of the source facet, shared by all its triangles.
    pub normal: Vector3<f32>,
    /// Centroid of the source facet.
    pub centroid: Point3<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub start: Point3<f32>,
    pub end: Point3<f32>,
}

impl LineSegment {
    pub fn new(start: Point3<f32>, end: Point3<f32>) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f32 {
        (self.end - self.start).norm()
    }
}

/// Line buffers for triangulation debugging. Empty unless enabled in
/// [`TriangulationOptions`].
#[derive(Debug, Clone, Default)]
pub struct DebugOverlays {
    /// One segment per facet, from its centroid along its normal.
    pub facet_normals: Vec<LineSegment>,
    /// One segment per triangle, from its centroid along its own normal.
    pub triangle_normals: Vec<LineSegment>,
    /// Three segments per triangle, diagonals included.
    pub triangle_edges: Vec<LineSegment>,
}

/// Output of [`triangulate`].
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    /// Three entries per triangle.
    pub solid_vertices: Vec<SolidVertex>,
    /// Three indices into [`Mesh::vertices`] per triangle.
    pub triangle_indices: Vec<u32>,
    /// Index pairs into [`Mesh::vertices`] along facet perimeters only.
    pub edge_indices: Vec<u32>,
    /// Source facet of each triangle, in emission order.
    pub triangle_facets: Vec<u32>,
    pub overlays: DebugOverlays,
}

impl Triangulation {
    pub fn triangle_count(&self) -> usize {
        self.triangle_facets.len()
    }

    pub fn index_count(&self) -> usize {
        self.triangle_indices.len()
    }

    /// Triangles as index triples into [`Mesh::vertices`].
    pub fn triangles(&self) -> impl Iterator<Item = [u32; 3]> + '_ {
        self.triangle_indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
    }
}

/// Unit normal of a polygon ring: Newell's method, then the cross product of
/// the first three vertices, then [`FALLBACK_NORMAL`].
pub fn facet_normal(points: &[Point3<f32>]) -> Vector3<f32> {
    let newell = newell_normal(points);
    let length = newell.norm();
    if length >= NEWELL_EPSILON && length.is_finite() {
        return newell / length;
    }
    if points.len() < 3 {
        return FALLBACK_NORMAL;
    }
    triangle_normal(&points[0], &points[1], &points[2])
        .try_normalize(f32::MIN_POSITIVE)
        .filter(|n| n.iter().all(|c| c.is_finite()))
        .unwrap_or(FALLBACK_NORMAL)
}

/// Orthonormal `(tangent, bitangent)` spanning the plane orthogonal to
/// `normal`.
pub fn plane_basis(normal: &Vector3<f32>) -> (Vector3<f32>, Vector3<f32>) {
    let up = if normal.z.abs() > 0.9 {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let tangent = up
        .cross(normal)
        .try_normalize(f32::MIN_POSITIVE)
        .unwrap_or_else(Vector3::x);
    let bitangent = normal.cross(&tangent);
    (tangent, bitangent)
}

/// Split a polygon ring into `n - 2` local index triples.
///
/// The ring is projected onto the plane orthogonal to `normal` around its
/// centroid and ear-clipped. Rings with fewer than three points give no
/// triangles.
pub fn triangulate_polygon(points: &[Point3<f32>], normal: &Vector3<f32>) -> Vec<[usize; 3]> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }
    if n == 3 {
        return vec![[0, 1, 2]];
    }

    let (tangent, bitangent) = plane_basis(normal);
    let center = centroid(points);
    let mut coords = Vec::with_capacity(n * 2);
    for p in points {
        let d = p - center;
        coords.push(f64::from(d.dot(&tangent)));
        coords.push(f64::from(d.dot(&bitangent)));
    }

    match earcutr::earcut(&coords, &[], 2) {
        Ok(indices) if indices.len() == 3 * (n - 2) => indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect(),
        result => {
            debug!(
                vertices = n,
                triangles = result.map(|ix| ix.len() / 3).unwrap_or(0),
                "ear clipping fell short, using fan"
            );
            fan(n)
        }
    }
}

/// Triangle fan anchored at the first vertex.
pub fn fan(n: usize) -> Vec<[usize; 3]> {
    (1..n.saturating_sub(1)).map(|i| [0, i, i + 1]).collect()
}

/// Triangulate every facet of `mesh`.
pub fn triangulate(mesh: &Mesh, options: &TriangulationOptions) -> Triangulation {
    let normal_length = options.normal_length(mesh.max_extent().unwrap_or(0.0));
    let mut out = Triangulation::default();
    let mut skipped = 0usize;

    for (facet_index, facet) in mesh.facets.iter().enumerate() {
        let Some(points) = checked_positions(mesh, facet) else {
            skipped += 1;
            continue;
        };

        if facet.len() >= 2 {
            for (a, b) in facet.edges() {
                out.edge_indices.push(a);
                out.edge_indices.push(b);
            }
        }
        if facet.len() < 3 {
            continue;
        }

        let normal = facet_normal(&points);
        let center = centroid(&points);
        if options.facet_normals {
            out.overlays
                .facet_normals
                .push(LineSegment::new(center, center + normal * normal_length));
        }

        for [a, b, c] in triangulate_polygon(&points, &normal) {
            let (mut b, mut c) = (b, c);
            let mut face = triangle_normal(&points[a], &points[b], &points[c]);
            if face.dot(&normal) < 0.0 {
                std::mem::swap(&mut b, &mut c);
                face = -face;
            }

            out.triangle_indices
                .extend([facet.indices[a], facet.indices[b], facet.indices[c]]);
            out.triangle_facets.push(facet_index as u32);
            for local in [a, b, c] {
                out.solid_vertices.push(SolidVertex {
                    position: points[local],
                    normal,
                    centroid: center,
                });
            }

            if options.triangle_normals {
                let tri_center = centroid(&[points[a], points[b], points[c]]);
                let direction = face.try_normalize(f32::MIN_POSITIVE).unwrap_or(normal);
                out.overlays.triangle_normals.push(LineSegment::new(
                    tri_center,
                    tri_center + direction * normal_length,
                ));
            }
            if options.triangle_edges {
                for (from, to) in [(a, b), (b, c), (c, a)] {
                    out.overlays
                        .triangle_edges
                        .push(LineSegment::new(points[from], points[to]));
                }
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, "facets referencing missing vertices were not triangulated");
    }
    debug!(
        facets = mesh.facets.len(),
        triangles = out.triangle_count(),
        edges = out.edge_indices.len() / 2,
        "triangulated mesh"
    );
    out
}

fn checked_positions(mesh: &Mesh, facet: &Facet) -> Option<Vec<Point3<f32>>> {
    facet
        .indices
        .iter()
        .map(|&i| mesh.vertices.get(i as usize).map(|v| v.position))
        .collect()
}
