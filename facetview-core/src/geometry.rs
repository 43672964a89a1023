//! Geometry primitives shared by the decoders and the triangulator.

use nalgebra::{Point3, Vector3};

/// Normal used when a triangle or facet has no computable orientation.
pub const FALLBACK_NORMAL: Vector3<f32> = Vector3::new(0.0, 0.0, 1.0);

/// A 3D vertex with position and normal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub position: Point3<f32>,
    pub normal: Vector3<f32>,
}

impl Vertex {
    pub fn new(x: f32, y: f32, z: f32, nx: f32, ny: f32, nz: f32) -> Self {
        Self {
            position: Point3::new(x, y, z),
            normal: Vector3::new(nx, ny, nz),
        }
    }

    pub fn at(position: Point3<f32>, normal: Vector3<f32>) -> Self {
        Self { position, normal }
    }
}

/// A source polygon: indices into [`Mesh::vertices`] in winding order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Facet {
    pub indices: Vec<u32>,
}

impl Facet {
    pub fn new(indices: Vec<u32>) -> Self {
        Self { indices }
    }

    pub fn triangle(a: u32, b: u32, c: u32) -> Self {
        Self {
            indices: vec![a, b, c],
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Perimeter edges `(i, i + 1 mod n)` in winding order.
    pub fn edges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let n = self.indices.len();
        (0..n).map(move |i| (self.indices[i], self.indices[(i + 1) % n]))
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Bounds {
    pub fn center(&self) -> Point3<f32> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }

    /// Largest side of the box.
    pub fn max_extent(&self) -> f32 {
        self.extent().max()
    }
}

/// Decoded geometry: vertices, polygonal facets and bounds.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub facets: Vec<Facet>,
    bounds: Option<Bounds>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(vertices: usize, facets: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertices),
            facets: Vec::with_capacity(facets),
            bounds: None,
        }
    }

    /// Append a vertex and return its index.
    pub fn add_vertex(&mut self, vertex: Vertex) -> u32 {
        let index = self.vertices.len() as u32;
        self.vertices.push(vertex);
        index
    }

    pub fn add_facet(&mut self, facet: Facet) {
        self.facets.push(facet);
    }

    /// Recompute the bounding box with a full scan. Leaves the bounds unset
    /// for a mesh without vertices.
    pub fn calculate_bounds(&mut self) {
        let mut positions = self.vertices.iter().map(|v| v.position);
        self.bounds = positions.next().map(|first| {
            positions.fold(
                Bounds {
                    min: first,
                    max: first,
                },
                |b, p| Bounds {
                    min: b.min.inf(&p),
                    max: b.max.sup(&p),
                },
            )
        });
    }

    /// Bounds from the last [`Mesh::calculate_bounds`] call.
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn center(&self) -> Option<Point3<f32>> {
        self.bounds.map(|b| b.center())
    }

    pub fn max_extent(&self) -> Option<f32> {
        self.bounds.map(|b| b.max_extent())
    }

    /// Positions of a facet's vertices, in winding order.
    pub fn facet_positions(&self, facet: &Facet) -> Vec<Point3<f32>> {
        facet
            .indices
            .iter()
            .map(|&i| self.vertices[i as usize].position)
            .collect()
    }

    /// Create a unit-style cube of quad facets for testing
    pub fn cube(size: f32) -> Self {
        let h = size / 2.0;
        let corners = [
            (-h, -h, -h),
            (h, -h, -h),
            (h, h, -h),
            (-h, h, -h),
            (-h, -h, h),
            (h, -h, h),
            (h, h, h),
            (-h, h, h),
        ];
        // Counter-clockwise seen from outside.
        let quads: [([u32; 4], (f32, f32, f32)); 6] = [
            ([4, 5, 6, 7], (0.0, 0.0, 1.0)),
            ([1, 0, 3, 2], (0.0, 0.0, -1.0)),
            ([3, 7, 6, 2], (0.0, 1.0, 0.0)),
            ([0, 1, 5, 4], (0.0, -1.0, 0.0)),
            ([1, 2, 6, 5], (1.0, 0.0, 0.0)),
            ([0, 4, 7, 3], (-1.0, 0.0, 0.0)),
        ];

        let mut mesh = Self::with_capacity(24, 6);
        for (quad, (nx, ny, nz)) in quads {
            let indices = quad
                .iter()
                .map(|&c| {
                    let (x, y, z) = corners[c as usize];
                    mesh.add_vertex(Vertex::new(x, y, z, nx, ny, nz))
                })
                .collect();
            mesh.add_facet(Facet::new(indices));
        }
        mesh.calculate_bounds();
        mesh
    }
}

/// Unnormalized normal of a polygon ring by Newell's method.
///
/// Tolerates non-planar rings of any size; its length is twice the
/// projected area of the ring.
pub fn newell_normal(points: &[Point3<f32>]) -> Vector3<f32> {
    let n = points.len();
    let mut normal = Vector3::zeros();
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        normal.x += (a.y - b.y) * (a.z + b.z);
        normal.y += (a.z - b.z) * (a.x + b.x);
        normal.z += (a.x - b.x) * (a.y + b.y);
    }
    normal
}

/// Unnormalized face normal `(b - a) x (c - a)`.
pub fn triangle_normal(a: &Point3<f32>, b: &Point3<f32>, c: &Point3<f32>) -> Vector3<f32> {
    (b - a).cross(&(c - a))
}

/// Arithmetic mean of the points.
pub fn centroid(points: &[Point3<f32>]) -> Point3<f32> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc: Vector3<f32>, p| acc + p.coords);
    Point3::from(sum / points.len() as f32)
}
