//! FacetView core library: geometry ingestion and facet triangulation.
//!
//! Meshes are loaded from binary or ASCII STL, from an XML vertex/facet
//! document, or from such a document inside a zip archive. Polygonal facets
//! are then split into triangles for rendering.
//!
//! ```no_run
//! use facetview_core::{load_mesh, triangulate, LoadOptions, TriangulationOptions};
//!
//! # fn main() -> Result<(), facetview_core::LoadError> {
//! let loaded = load_mesh("part.stl", LoadOptions::default(), None)?;
//! let render = triangulate(&loaded.mesh, &TriangulationOptions::default());
//! println!("{} triangles", render.triangle_count());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod loader;
pub mod progress;
pub mod sniff;
pub mod stl;
pub mod triangulate;
pub mod xml;

// Re-export commonly used types
pub use config::{LoadOptions, TriangulationOptions};
pub use error::{LoadError, LoadResult};
pub use geometry::{Bounds, Facet, Mesh, Vertex};
pub use loader::{load_mesh, LoadedMesh, SourceKind};
pub use progress::{ProgressControl, ProgressFn};
pub use sniff::is_binary_stl;
pub use stl::load_stl;
pub use triangulate::{triangulate, DebugOverlays, LineSegment, SolidVertex, Triangulation};
pub use xml::{load_xml, load_zip};
