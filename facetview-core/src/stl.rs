//! STL decoder for binary and ASCII formats
//!
//! Stored facet normals are never trusted: every triangle's normal is
//! recomputed from its own vertices, and every triangle becomes three fresh
//! vertices plus one facet in [`STL_WINDING`] order.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;

use nalgebra::{Point3, Vector3};
use nom::{
    bytes::complete::{take, take_till},
    character::complete::{multispace0, multispace1},
    combinator::eof,
    number::complete::{float, le_f32, le_u16, le_u32},
    sequence::preceded,
    IResult,
};
use tracing::{info, instrument, warn};

use crate::config::LoadOptions;
use crate::error::{LoadError, LoadResult};
use crate::geometry::{triangle_normal, Facet, Mesh, Vertex, FALLBACK_NORMAL};
use crate::loader::LoadedMesh;
use crate::progress::{Progress, ProgressFn};
use crate::sniff::{
    classify_header, expected_binary_size, is_binary_stl, HEADER_SIZE, TRIANGLE_RECORD_SIZE,
};

/// Facet index order relative to the file's vertex order.
///
/// The second and third vertices are swapped so that solid fill faces the
/// renderer's front-face convention. Flipping this inverts every solid face.
pub const STL_WINDING: [u32; 3] = [0, 2, 1];

/// Cross products shorter than this get [`FALLBACK_NORMAL`].
pub const DEGENERATE_NORMAL_EPSILON: f32 = 1e-12;

/// Triangles reserved up front when a binary stream has no known length.
const MAX_TRIANGLE_RESERVE: usize = 1 << 16;

/// Load an STL file, detecting binary or ASCII encoding.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_stl(
    path: impl AsRef<Path>,
    options: LoadOptions,
    progress: Option<ProgressFn<'_>>,
) -> LoadResult<LoadedMesh> {
    let path = path.as_ref();
    let binary = is_binary_stl(path);
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let total_len = file.metadata().map(|m| m.len()).ok();
    let reader = BufReader::new(file);

    let mut progress = Progress::new(progress);
    let loaded = if binary {
        read_binary(reader, total_len, options, &mut progress)?
    } else {
        read_ascii(reader, total_len, &mut progress)?
    };
    info!(
        binary,
        vertices = loaded.mesh.vertices.len(),
        facets = loaded.mesh.facets.len(),
        "loaded STL"
    );
    Ok(loaded)
}

/// Decode an in-memory STL buffer.
pub fn decode_stl_bytes(
    data: &[u8],
    options: LoadOptions,
    progress: Option<ProgressFn<'_>>,
) -> LoadResult<LoadedMesh> {
    let total_len = data.len() as u64;
    let mut progress = Progress::new(progress);
    if classify_header(data, total_len) {
        read_binary(data, Some(total_len), options, &mut progress)
    } else {
        read_ascii(data, Some(total_len), &mut progress)
    }
}

/// Decode a binary STL stream. `total_len` is the full stream length when
/// known; it enables the up-front length check.
pub fn decode_binary<R: Read>(
    reader: R,
    total_len: Option<u64>,
    options: LoadOptions,
    progress: Option<ProgressFn<'_>>,
) -> LoadResult<LoadedMesh> {
    read_binary(reader, total_len, options, &mut Progress::new(progress))
}

/// Decode an ASCII STL stream. Progress follows the bytes consumed when
/// `total_len` is known.
pub fn decode_ascii<R: BufRead>(
    reader: R,
    total_len: Option<u64>,
    progress: Option<ProgressFn<'_>>,
) -> LoadResult<LoadedMesh> {
    read_ascii(reader, total_len, &mut Progress::new(progress))
}

/// Unit normal of a triangle in file order, or [`FALLBACK_NORMAL`] when the
/// triangle has no area.
pub fn stl_triangle_normal(corners: &[Point3<f32>; 3]) -> Vector3<f32> {
    let normal = triangle_normal(&corners[0], &corners[1], &corners[2]);
    let length = normal.norm();
    if length < DEGENERATE_NORMAL_EPSILON || !length.is_finite() {
        FALLBACK_NORMAL
    } else {
        normal / length
    }
}

fn push_triangle(mesh: &mut Mesh, corners: [Point3<f32>; 3]) {
    let normal = stl_triangle_normal(&corners);
    let base = mesh.vertices.len() as u32;
    for position in corners {
        mesh.add_vertex(Vertex::at(position, normal));
    }
    mesh.add_facet(Facet::new(
        STL_WINDING.iter().map(|offset| base + offset).collect(),
    ));
}

fn read_binary<R: Read>(
    mut reader: R,
    total_len: Option<u64>,
    options: LoadOptions,
    progress: &mut Progress<'_>,
) -> LoadResult<LoadedMesh> {
    let mut prefix = [0u8; HEADER_SIZE + 4];
    reader.read_exact(&mut prefix).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => LoadError::format("binary STL is shorter than its header"),
        _ => LoadError::Read(e),
    })?;
    let (_, count) = triangle_count(&prefix[HEADER_SIZE..])
        .map_err(|e| LoadError::format(format!("bad triangle count: {e:?}")))?;

    let mut warnings = Vec::new();
    let mut readable = count;
    if let Some(len) = total_len {
        let expected = expected_binary_size(count);
        if len < expected {
            let complete = len.saturating_sub((HEADER_SIZE + 4) as u64)
                / TRIANGLE_RECORD_SIZE as u64;
            if options.strict_binary_length {
                return Err(LoadError::format(format!(
                    "binary STL declares {count} triangles ({expected} bytes) but is {len} bytes long"
                )));
            }
            let message = format!(
                "binary STL truncated: {complete} of {count} declared triangles present"
            );
            warn!("{message}");
            warnings.push(message);
            readable = u32::try_from(complete).unwrap_or(count).min(count);
        } else if len > expected {
            let message = format!("{} trailing bytes after the last triangle", len - expected);
            warn!("{message}");
            warnings.push(message);
        }
    }

    info!(count, "reading binary STL");
    progress.report(0.0, "Reading binary STL")?;

    // The declared count is untrusted when the stream length is unknown.
    let reserve = if total_len.is_some() {
        readable as usize
    } else {
        (readable as usize).min(MAX_TRIANGLE_RESERVE)
    };
    let mut mesh = Mesh::with_capacity(reserve * 3, reserve);
    let mut record = [0u8; TRIANGLE_RECORD_SIZE];
    for i in 0..readable {
        if let Err(e) = reader.read_exact(&mut record) {
            if e.kind() != ErrorKind::UnexpectedEof {
                return Err(LoadError::Read(e));
            }
            if options.strict_binary_length {
                return Err(LoadError::format(format!(
                    "binary STL ends inside triangle {i} of {count}"
                )));
            }
            let message = format!("binary STL truncated: {i} of {count} declared triangles present");
            warn!("{message}");
            warnings.push(message);
            break;
        }
        let (_, corners) = triangle_record(&record)
            .map_err(|e| LoadError::format(format!("bad triangle record {i}: {e:?}")))?;
        push_triangle(&mut mesh, corners);
        progress.report_span(0.0, 1.0, i as usize + 1, count as usize, "Reading binary STL")?;
    }

    mesh.calculate_bounds();
    progress.report(1.0, "Binary STL loaded")?;
    Ok(LoadedMesh { mesh, warnings })
}

fn triangle_count(input: &[u8]) -> IResult<&[u8], u32> {
    le_u32(input)
}

fn vec3(input: &[u8]) -> IResult<&[u8], Point3<f32>> {
    let (input, x) = le_f32(input)?;
    let (input, y) = le_f32(input)?;
    let (input, z) = le_f32(input)?;
    Ok((input, Point3::new(x, y, z)))
}

/// Normal (skipped), three vertices, attribute count (skipped).
fn triangle_record(input: &[u8]) -> IResult<&[u8], [Point3<f32>; 3]> {
    let (input, _stored_normal) = take(12usize)(input)?;
    let (input, a) = vec3(input)?;
    let (input, b) = vec3(input)?;
    let (input, c) = vec3(input)?;
    let (input, _attributes) = le_u16(input)?;
    Ok((input, [a, b, c]))
}

/// Lines of an ASCII STL that carry meaning; everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
enum AsciiLine {
    Facet,
    Vertex(Point3<f32>),
    EndFacet,
    Other,
}

fn parse_vector3(input: &str) -> IResult<&str, (f32, f32, f32)> {
    let (input, _) = multispace0(input)?;
    let (input, x) = float(input)?;
    let (input, _) = multispace1(input)?;
    let (input, y) = float(input)?;
    let (input, _) = multispace1(input)?;
    let (input, z) = float(input)?;
    Ok((input, (x, y, z)))
}

fn parse_vertex(input: &str) -> IResult<&str, Point3<f32>> {
    let (input, (x, y, z)) = parse_vector3(input)?;
    let (input, _) = preceded(multispace0, eof)(input)?;
    Ok((input, Point3::new(x, y, z)))
}

/// Classify one line. `None` means a `vertex` line whose numbers are bad.
fn classify_line(line: &str) -> Option<AsciiLine> {
    let keyword: IResult<&str, &str> =
        preceded(multispace0, take_till(|c: char| c.is_whitespace()))(line);
    let Ok((rest, keyword)) = keyword else {
        return Some(AsciiLine::Other);
    };
    match keyword {
        // The stored normal is recomputed, so only the keyword matters.
        "facet" => Some(AsciiLine::Facet),
        "vertex" => parse_vertex(rest).ok().map(|(_, p)| AsciiLine::Vertex(p)),
        "endfacet" => Some(AsciiLine::EndFacet),
        _ => Some(AsciiLine::Other),
    }
}

fn read_ascii<R: BufRead>(
    mut reader: R,
    total_len: Option<u64>,
    progress: &mut Progress<'_>,
) -> LoadResult<LoadedMesh> {
    let mut mesh = Mesh::new();
    let mut warnings = Vec::new();
    let mut corners: Vec<Point3<f32>> = Vec::with_capacity(3);
    let mut line = String::new();
    let mut consumed = 0u64;
    let mut line_no = 0usize;

    info!("reading ASCII STL");
    progress.report(0.0, "Reading ASCII STL")?;

    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(|e| match e.kind() {
            ErrorKind::InvalidData => {
                LoadError::format(format!("line {} is not valid UTF-8", line_no + 1))
            }
            _ => LoadError::Read(e),
        })?;
        if read == 0 {
            break;
        }
        consumed += read as u64;
        line_no += 1;

        match classify_line(&line) {
            Some(AsciiLine::Facet) => corners.clear(),
            Some(AsciiLine::Vertex(p)) => corners.push(p),
            Some(AsciiLine::EndFacet) => {
                if corners.len() == 3 {
                    push_triangle(&mut mesh, [corners[0], corners[1], corners[2]]);
                } else {
                    let message = format!(
                        "facet ending on line {line_no} has {} vertices, skipped",
                        corners.len()
                    );
                    warn!("{message}");
                    warnings.push(message);
                }
                corners.clear();
            }
            Some(AsciiLine::Other) => {}
            None => {
                return Err(LoadError::format(format!(
                    "malformed vertex on line {line_no}: {:?}",
                    line.trim()
                )));
            }
        }

        if let Some(total) = total_len {
            progress.report(consumed as f32 / total.max(1) as f32, "Reading ASCII STL")?;
        }
    }

    mesh.calculate_bounds();
    progress.report(1.0, "ASCII STL loaded")?;
    Ok(LoadedMesh { mesh, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressControl;
    use approx::assert_relative_eq;

    fn binary_stl(triangles: &[[[f32; 3]; 3]]) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[..6].copy_from_slice(b"binary");
        data.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        for triangle in triangles {
            // Stored normal is garbage on purpose.
            for value in [9.0f32, 9.0, 9.0] {
                data.extend_from_slice(&value.to_le_bytes());
            }
            for corner in triangle {
                for value in corner {
                    data.extend_from_slice(&value.to_le_bytes());
                }
            }
            data.extend_from_slice(&0u16.to_le_bytes());
        }
        data
    }

    const TRIANGLES: [[[f32; 3]; 3]; 2] = [
        [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        [[0.0, 0.0, 1.0], [0.0, 2.0, 1.0], [2.0, 0.0, 1.0]],
    ];

    const ASCII: &str = "solid test
  facet normal 0 0 -1
    outer loop
      vertex 0 0 0
      vertex 1 0 0
      vertex 0 1 0
    endloop
  endfacet
  facet normal 7 7 7
    outer loop
      vertex 0 0 1
      vertex 0 2 1
      vertex 2 0 1
    endloop
  endfacet
endsolid test
";

    #[test]
    fn test_parse_binary_header() {
        let data = binary_stl(&[]);
        let loaded = decode_stl_bytes(&data, LoadOptions::default(), None).unwrap();
        assert!(loaded.mesh.vertices.is_empty());
        assert!(loaded.mesh.facets.is_empty());
        assert!(loaded.mesh.bounds().is_none());
    }

    #[test]
    fn test_binary_counts_and_reversed_winding() {
        let data = binary_stl(&TRIANGLES);
        let loaded = decode_stl_bytes(&data, LoadOptions::default(), None).unwrap();
        let mesh = loaded.mesh;

        assert_eq!(mesh.vertices.len(), 6);
        assert_eq!(mesh.facets.len(), 2);
        assert_eq!(mesh.facets[0].indices, vec![0, 2, 1]);
        assert_eq!(mesh.facets[1].indices, vec![3, 5, 4]);
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn test_binary_normals_are_recomputed() {
        let data = binary_stl(&TRIANGLES);
        let mesh = decode_stl_bytes(&data, LoadOptions::default(), None)
            .unwrap()
            .mesh;

        for v in &mesh.vertices[0..3] {
            assert_relative_eq!(v.normal, Vector3::new(0.0, 0.0, 1.0));
        }
        for v in &mesh.vertices[3..6] {
            assert_relative_eq!(v.normal, Vector3::new(0.0, 0.0, -1.0));
        }
    }

    #[test]
    fn test_binary_bounds_computed() {
        let data = binary_stl(&TRIANGLES);
        let mesh = decode_stl_bytes(&data, LoadOptions::default(), None)
            .unwrap()
            .mesh;
        let bounds = mesh.bounds().unwrap();
        assert_eq!(bounds.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(bounds.max, Point3::new(2.0, 2.0, 1.0));
    }

    #[test]
    fn test_collinear_triangle_gets_fallback_normal() {
        let data = binary_stl(&[[[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0]]]);
        let mesh = decode_stl_bytes(&data, LoadOptions::default(), None)
            .unwrap()
            .mesh;
        for v in &mesh.vertices {
            assert_eq!(v.normal, FALLBACK_NORMAL);
            assert!(v.position.iter().all(|c| c.is_finite()));
        }
    }

    #[test]
    fn test_truncated_binary_is_rejected_by_default() {
        let mut data = binary_stl(&TRIANGLES);
        data.truncate(data.len() - 10);
        let result = decode_stl_bytes(&data, LoadOptions::default(), None);
        assert!(matches!(result, Err(LoadError::Format(_))));
    }

    #[test]
    fn test_truncated_binary_permissive_keeps_complete_triangles() {
        let mut data = binary_stl(&TRIANGLES);
        data.truncate(data.len() - 10);
        let loaded = decode_stl_bytes(&data, LoadOptions::permissive(), None).unwrap();
        assert_eq!(loaded.mesh.facets.len(), 1);
        assert_eq!(loaded.mesh.vertices.len(), 3);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_truncated_stream_without_length() {
        let mut data = binary_stl(&TRIANGLES);
        data.truncate(data.len() - 10);
        let strict = decode_binary(&data[..], None, LoadOptions::default(), None);
        assert!(matches!(strict, Err(LoadError::Format(_))));
        let loose = decode_binary(&data[..], None, LoadOptions::permissive(), None).unwrap();
        assert_eq!(loose.mesh.facets.len(), 1);
    }

    #[test]
    fn test_huge_declared_count_without_length() {
        let mut data = vec![0u8; HEADER_SIZE];
        data.extend_from_slice(&u32::MAX.to_le_bytes());

        let loose = decode_binary(&data[..], None, LoadOptions::permissive(), None).unwrap();
        assert!(loose.mesh.facets.is_empty());
        assert_eq!(loose.warnings.len(), 1);

        let strict = decode_binary(&data[..], None, LoadOptions::default(), None);
        assert!(matches!(strict, Err(LoadError::Format(_))));
    }

    #[test]
    fn test_declared_length_shorter_than_header() {
        let data = binary_stl(&TRIANGLES[..1]);
        let loose = decode_binary(&data[..], Some(10), LoadOptions::permissive(), None).unwrap();
        assert!(loose.mesh.facets.is_empty());
        assert_eq!(loose.warnings.len(), 1);

        let strict = decode_binary(&data[..], Some(10), LoadOptions::default(), None);
        assert!(matches!(strict, Err(LoadError::Format(_))));
    }

    #[test]
    fn test_trailing_bytes_are_a_warning() {
        let mut data = binary_stl(&TRIANGLES);
        data.extend_from_slice(&[0u8; 7]);
        let loaded = decode_binary(&data[..], Some(data.len() as u64), LoadOptions::default(), None)
            .unwrap();
        assert_eq!(loaded.mesh.facets.len(), 2);
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_header_shorter_than_84_bytes() {
        let result = decode_binary(&[0u8; 40][..], None, LoadOptions::default(), None);
        assert!(matches!(result, Err(LoadError::Format(_))));
    }

    #[test]
    fn test_binary_progress_once_per_percent() {
        let triangles = vec![TRIANGLES[0]; 1000];
        let data = binary_stl(&triangles);
        let mut reports = Vec::new();
        let mut sink = |fraction: f32, _: &str| {
            reports.push(fraction);
            ProgressControl::Continue
        };
        decode_stl_bytes(&data, LoadOptions::default(), Some(&mut sink)).unwrap();

        assert!(reports.len() <= 103);
        assert!(reports.len() >= 100);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.last().copied(), Some(1.0));
    }

    #[test]
    fn test_abort_stops_binary_decode() {
        let triangles = vec![TRIANGLES[0]; 500];
        let data = binary_stl(&triangles);
        let mut sink = |fraction: f32, _: &str| {
            if fraction > 0.25 {
                ProgressControl::Abort
            } else {
                ProgressControl::Continue
            }
        };
        let result = decode_stl_bytes(&data, LoadOptions::default(), Some(&mut sink));
        assert!(matches!(result, Err(LoadError::Cancelled)));
    }

    #[test]
    fn test_parse_ascii_matches_binary() {
        let ascii = decode_stl_bytes(ASCII.as_bytes(), LoadOptions::default(), None)
            .unwrap()
            .mesh;
        let binary = decode_stl_bytes(&binary_stl(&TRIANGLES), LoadOptions::default(), None)
            .unwrap()
            .mesh;

        assert_eq!(ascii.vertices.len(), 6);
        assert_eq!(ascii.facets, binary.facets);
        for (a, b) in ascii.vertices.iter().zip(&binary.vertices) {
            assert_eq!(a.position, b.position);
            assert_relative_eq!(a.normal, b.normal);
        }
    }

    #[test]
    fn test_ascii_stored_normal_is_ignored() {
        let mesh = decode_ascii(ASCII.as_bytes(), None, None).unwrap().mesh;
        assert_relative_eq!(mesh.vertices[0].normal, Vector3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(mesh.vertices[3].normal, Vector3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn test_ascii_scientific_notation_and_tabs() {
        let text = "solid s\nfacet normal 0 0 0\nouter loop\n\tvertex 1e0\t0 0\nvertex -1.5E-1 2 0\nvertex 0 0 3.25e+1  \nendloop\nendfacet\nendsolid s\n";
        let mesh = decode_ascii(text.as_bytes(), None, None).unwrap().mesh;
        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[0].position, Point3::new(1.0, 0.0, 0.0));
        assert_eq!(mesh.vertices[1].position, Point3::new(-0.15, 2.0, 0.0));
        assert_eq!(mesh.vertices[2].position, Point3::new(0.0, 0.0, 32.5));
    }

    #[test]
    fn test_ascii_incomplete_facet_is_skipped() {
        let text = "solid s\nfacet normal 0 0 1\nouter loop\nvertex 0 0 0\nvertex 1 0 0\nendloop\nendfacet\nendsolid s\n";
        let loaded = decode_ascii(text.as_bytes(), None, None).unwrap();
        assert!(loaded.mesh.facets.is_empty());
        assert_eq!(loaded.warnings.len(), 1);
    }

    #[test]
    fn test_ascii_malformed_vertex_is_format_error() {
        let text = "solid s\nfacet normal 0 0 1\nouter loop\nvertex 0 zero 0\n";
        match decode_ascii(text.as_bytes(), None, None) {
            Err(LoadError::Format(message)) => assert!(message.contains("line 4")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_ascii_progress_follows_bytes() {
        let mut reports = Vec::new();
        let mut sink = |fraction: f32, _: &str| {
            reports.push(fraction);
            ProgressControl::Continue
        };
        decode_ascii(ASCII.as_bytes(), Some(ASCII.len() as u64), Some(&mut sink)).unwrap();
        assert!(reports.len() > 2);
        assert!(reports.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(reports.last().copied(), Some(1.0));
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("  facet normal 1 2 3\n"), Some(AsciiLine::Facet));
        assert_eq!(classify_line("facet normal bogus"), Some(AsciiLine::Facet));
        assert_eq!(classify_line("endfacet"), Some(AsciiLine::EndFacet));
        assert_eq!(classify_line("outer loop"), Some(AsciiLine::Other));
        assert_eq!(classify_line(""), Some(AsciiLine::Other));
        assert_eq!(
            classify_line("vertex 1 2 3\r\n"),
            Some(AsciiLine::Vertex(Point3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(classify_line("vertex 1 2"), None);
        assert_eq!(classify_line("vertex 1 2 3 4"), None);
    }
}
