//! XML geometry decoder, optionally unwrapping a zip container.
//!
//! # Schema
//!
//! ```text
//! SimulationEnvironment
//!   Geometry
//!     Vertices nb=".."
//!       Vertex id=".." x=".." y=".." z=".."
//!     Facets nb=".."
//!       Facet
//!         Indices nb=".."
//!           Indice vertex=".."
//! ```
//!
//! Vertex ids are arbitrary integers; facets reference them by id. The
//! document is collected first, then a vertex pass and a facet pass build
//! the [`Mesh`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use nalgebra::{Point3, Vector3};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info, instrument, warn};
use zip::ZipArchive;

use crate::error::{LoadError, LoadResult};
use crate::geometry::{newell_normal, triangle_normal, Facet, Mesh, Vertex, FALLBACK_NORMAL};
use crate::loader::LoadedMesh;
use crate::progress::{Progress, ProgressFn};

/// Newell normals shorter than this fall back to the first-edges cross product.
pub const NEWELL_EPSILON: f32 = 1e-4;

/// Progress is reported every this many vertices or facets.
const PROGRESS_STRIDE: usize = 100;

/// Upper bound on the buffer reserved from a zip entry's declared size.
const MAX_ENTRY_RESERVE: u64 = 1 << 26;

const ROOT: &[u8] = b"SimulationEnvironment";
const GEOMETRY: &[u8] = b"Geometry";
const VERTICES: &[u8] = b"Vertices";
const VERTEX: &[u8] = b"Vertex";
const FACETS: &[u8] = b"Facets";
const FACET: &[u8] = b"Facet";
const INDICES: &[u8] = b"Indices";
const INDICE: &[u8] = b"Indice";

/// Load XML geometry from a `.xml` file or a `.zip` holding one.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_xml(path: impl AsRef<Path>, progress: Option<ProgressFn<'_>>) -> LoadResult<LoadedMesh> {
    let path = path.as_ref();
    if has_extension(path, "zip") {
        return load_zip(path, progress);
    }

    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let mut progress = Progress::new(progress);
    let loaded = read_xml(BufReader::new(file), &mut progress)?;
    info!(
        vertices = loaded.mesh.vertices.len(),
        facets = loaded.mesh.facets.len(),
        "loaded XML geometry"
    );
    Ok(loaded)
}

/// Load XML geometry from the single XML entry of a zip archive.
///
/// Zero XML entries is an error. With several, the first one in archive
/// order is used and the others are reported as warnings.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_zip(path: impl AsRef<Path>, progress: Option<ProgressFn<'_>>) -> LoadResult<LoadedMesh> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| LoadError::archive(format!("cannot open {}: {e}", path.display())))?;

    let mut warnings = Vec::new();
    let mut chosen: Option<(String, Vec<u8>)> = None;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| LoadError::archive(format!("cannot read entry {i}: {e}")))?;
        let name = entry.name().to_string();
        if entry.is_dir() || !has_extension(Path::new(&name), "xml") {
            continue;
        }
        if let Some((first, _)) = &chosen {
            let message = format!("multiple XML entries in archive, ignoring {name} (using {first})");
            warn!("{message}");
            warnings.push(message);
            continue;
        }

        let mut content = Vec::with_capacity(entry.size().min(MAX_ENTRY_RESERVE) as usize);
        entry
            .read_to_end(&mut content)
            .map_err(|e| LoadError::archive(format!("cannot read {name}: {e}")))?;
        debug!(entry = %name, bytes = content.len(), "found XML entry");
        chosen = Some((name, content));
    }

    let Some((name, content)) = chosen else {
        return Err(LoadError::archive(format!(
            "no XML entry in {}",
            path.display()
        )));
    };

    let mut progress = Progress::new(progress);
    let mut loaded = read_xml(&content[..], &mut progress)?;
    warnings.append(&mut loaded.warnings);
    loaded.warnings = warnings;
    info!(
        entry = %name,
        vertices = loaded.mesh.vertices.len(),
        facets = loaded.mesh.facets.len(),
        "loaded XML geometry from archive"
    );
    Ok(loaded)
}

/// Decode XML geometry from any buffered reader.
pub fn decode_xml<R: BufRead>(reader: R, progress: Option<ProgressFn<'_>>) -> LoadResult<LoadedMesh> {
    read_xml(reader, &mut Progress::new(progress))
}

/// Unit normal of a polygon: Newell's method, then the cross product of the
/// first two edges, then [`FALLBACK_NORMAL`].
pub fn xml_facet_normal(points: &[Point3<f32>]) -> Vector3<f32> {
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

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

fn read_xml<R: BufRead>(reader: R, progress: &mut Progress<'_>) -> LoadResult<LoadedMesh> {
    progress.report(0.1, "Parsing XML")?;
    let document = collect_document(reader)?;
    document.check_structure()?;
    progress.report(0.2, "Geometry structure found")?;
    build_mesh(document, progress)
}

#[derive(Debug)]
struct DeclaredVertex {
    id: i64,
    position: Point3<f32>,
    /// An attribute was absent or unparseable and read as 0.
    defaulted: bool,
}

/// Facet as written: ids in order, `None` for an unreadable reference.
#[derive(Debug, Default)]
struct DeclaredFacet {
    ids: Option<Vec<Option<i64>>>,
}

#[derive(Debug, Default)]
struct GeometryDocument {
    has_geometry: bool,
    has_vertices: bool,
    has_facets: bool,
    declared_vertices: Option<usize>,
    declared_facets: Option<usize>,
    vertices: Vec<DeclaredVertex>,
    facets: Vec<DeclaredFacet>,
}

impl GeometryDocument {
    fn check_structure(&self) -> LoadResult<()> {
        if !self.has_geometry {
            return Err(LoadError::format("no SimulationEnvironment/Geometry node"));
        }
        if !self.has_vertices {
            return Err(LoadError::format("no Vertices node in Geometry"));
        }
        if !self.has_facets {
            return Err(LoadError::format("no Facets node in Geometry"));
        }
        Ok(())
    }
}

/// Event-driven collector tracking the open element path.
#[derive(Default)]
struct Collector {
    stack: Vec<Vec<u8>>,
    reading_indices: bool,
    document: GeometryDocument,
}

impl Collector {
    fn parent_is(&self, path: &[&[u8]]) -> bool {
        self.stack.len() == path.len() && self.stack.iter().zip(path).all(|(a, b)| a == b)
    }

    fn open(&mut self, element: &BytesStart<'_>, empty: bool) {
        let name = element.local_name();
        let name = name.as_ref();

        if name == GEOMETRY && self.parent_is(&[ROOT]) {
            self.document.has_geometry = true;
        } else if name == VERTICES && self.parent_is(&[ROOT, GEOMETRY]) {
            self.document.has_vertices = true;
            self.document.declared_vertices = number_attribute(element, "nb").ok().flatten();
        } else if name == VERTEX && self.parent_is(&[ROOT, GEOMETRY, VERTICES]) {
            let vertex = parse_vertex(element);
            self.document.vertices.push(vertex);
        } else if name == FACETS && self.parent_is(&[ROOT, GEOMETRY]) {
            self.document.has_facets = true;
            self.document.declared_facets = number_attribute(element, "nb").ok().flatten();
        } else if name == FACET && self.parent_is(&[ROOT, GEOMETRY, FACETS]) {
            self.document.facets.push(DeclaredFacet::default());
        } else if name == INDICES && self.parent_is(&[ROOT, GEOMETRY, FACETS, FACET]) {
            // Only the first Indices child of a facet counts.
            if let Some(facet) = self.document.facets.last_mut() {
                if facet.ids.is_none() {
                    let capacity = number_attribute::<usize>(element, "nb")
                        .ok()
                        .flatten()
                        .unwrap_or(0);
                    facet.ids = Some(Vec::with_capacity(capacity.min(1 << 16)));
                    self.reading_indices = !empty;
                }
            }
        } else if name == INDICE
            && self.reading_indices
            && self.parent_is(&[ROOT, GEOMETRY, FACETS, FACET, INDICES])
        {
            let id = number_attribute::<i64>(element, "vertex").ok().flatten();
            if let Some(ids) = self
                .document
                .facets
                .last_mut()
                .and_then(|facet| facet.ids.as_mut())
            {
                ids.push(id);
            }
        }

        if !empty {
            self.stack.push(name.to_vec());
        }
    }

    fn close(&mut self) {
        if let Some(name) = self.stack.pop() {
            if name == INDICES {
                self.reading_indices = false;
            }
        }
    }
}

/// Read a `Vertex` element. Absent or unparseable attributes read as 0.
fn parse_vertex(element: &BytesStart<'_>) -> DeclaredVertex {
    let mut defaulted = false;
    let mut read = |key: &str| -> Option<f32> {
        let value = number_attribute(element, key).ok().flatten();
        defaulted |= value.is_none();
        value
    };
    let position = Point3::new(
        read("x").unwrap_or(0.0),
        read("y").unwrap_or(0.0),
        read("z").unwrap_or(0.0),
    );
    let id = number_attribute::<i64>(element, "id").ok().flatten();
    DeclaredVertex {
        id: id.unwrap_or(0),
        position,
        defaulted: defaulted || id.is_none(),
    }
}

/// Parse a numeric attribute. `Ok(None)` when the attribute is absent.
fn number_attribute<T: FromStr>(element: &BytesStart<'_>, key: &str) -> LoadResult<Option<T>> {
    let attribute = element
        .try_get_attribute(key)
        .map_err(|e| LoadError::format(format!("bad attribute {key}: {e}")))?;
    let Some(attribute) = attribute else {
        return Ok(None);
    };
    let value = attribute
        .unescape_value()
        .map_err(|e| LoadError::format(format!("bad attribute {key}: {e}")))?;
    value.trim().parse().map(Some).map_err(|_| {
        LoadError::format(format!("attribute {key}={:?} is not a number", value.as_ref()))
    })
}

fn collect_document<R: BufRead>(reader: R) -> LoadResult<GeometryDocument> {
    let mut reader = Reader::from_reader(reader);
    reader.config_mut().trim_text(true);

    let mut collector = Collector::default();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => collector.open(e, false),
            Ok(Event::Empty(ref e)) => collector.open(e, true),
            Ok(Event::End(_)) => collector.close(),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LoadError::format(format!(
                    "XML parse error at byte {}: {e}",
                    reader.error_position()
                )));
            }
        }
        buf.clear();
    }

    if let Some(open) = collector.stack.last() {
        return Err(LoadError::format(format!(
            "XML ended inside <{}>",
            String::from_utf8_lossy(open)
        )));
    }
    Ok(collector.document)
}

fn build_mesh(document: GeometryDocument, progress: &mut Progress<'_>) -> LoadResult<LoadedMesh> {
    let mut warnings = Vec::new();
    let mut note = |message: String| {
        warn!("{message}");
        warnings.push(message);
    };

    let vertex_total = document.vertices.len();
    let facet_total = document.facets.len();
    if let Some(nb) = document.declared_vertices.filter(|&nb| nb != vertex_total) {
        note(format!("Vertices declares nb={nb} but holds {vertex_total}"));
    }
    if let Some(nb) = document.declared_facets.filter(|&nb| nb != facet_total) {
        note(format!("Facets declares nb={nb} but holds {facet_total}"));
    }
    let defaulted = document.vertices.iter().filter(|v| v.defaulted).count();
    if defaulted > 0 {
        note(format!(
            "{defaulted} vertices with missing or invalid id/x/y/z attributes read as 0"
        ));
    }
    info!(vertices = vertex_total, facets = facet_total, "building XML geometry");

    let mut mesh = Mesh::with_capacity(vertex_total, facet_total);
    let mut index_of: HashMap<i64, u32> = HashMap::with_capacity(vertex_total);

    progress.report(0.3, "Reading vertices")?;
    for (i, declared) in document.vertices.iter().enumerate() {
        let index = mesh.add_vertex(Vertex::at(declared.position, Vector3::zeros()));
        index_of.insert(declared.id, index);
        if (i + 1) % PROGRESS_STRIDE == 0 || i + 1 == vertex_total {
            progress.report_span(0.3, 0.5, i + 1, vertex_total, "Reading vertices")?;
        }
    }

    progress.report(0.5, "Reading facets")?;
    let mut unresolved = 0usize;
    let mut rejected = 0usize;
    let mut without_indices = 0usize;
    for (i, declared) in document.facets.iter().enumerate() {
        if let Some(ids) = &declared.ids {
            let indices: Vec<u32> = ids
                .iter()
                .filter_map(|id| id.and_then(|id| index_of.get(&id).copied()))
                .collect();
            unresolved += ids.len() - indices.len();

            if indices.len() < 3 {
                rejected += 1;
            } else {
                let positions: Vec<Point3<f32>> = indices
                    .iter()
                    .map(|&index| mesh.vertices[index as usize].position)
                    .collect();
                let normal = xml_facet_normal(&positions);
                for &index in &indices {
                    mesh.vertices[index as usize].normal = normal;
                }
                mesh.add_facet(Facet::new(indices));
            }
        } else {
            without_indices += 1;
        }

        if (i + 1) % PROGRESS_STRIDE == 0 || i + 1 == facet_total {
            progress.report_span(0.5, 0.9, i + 1, facet_total, "Reading facets")?;
        }
    }

    if unresolved > 0 {
        note(format!("{unresolved} facet indices reference unknown vertex ids"));
    }
    if rejected > 0 {
        note(format!("{rejected} facets dropped with fewer than 3 resolvable indices"));
    }
    if without_indices > 0 {
        note(format!("{without_indices} facets without Indices skipped"));
    }

    progress.report(0.9, "Computing bounds")?;
    mesh.calculate_bounds();
    progress.report(1.0, "XML geometry loaded")?;
    Ok(LoadedMesh { mesh, warnings })
}
