//! Decoder selection by file extension.

use std::path::Path;

use tracing::instrument;

use crate::config::LoadOptions;
use crate::error::{LoadError, LoadResult};
use crate::geometry::Mesh;
use crate::progress::ProgressFn;
use crate::{stl, xml};

/// A decoded mesh plus the conditions recovered while decoding it.
#[derive(Debug, Clone, Default)]
pub struct LoadedMesh {
    pub mesh: Mesh,
    pub warnings: Vec<String>,
}

/// Source formats recognised by [`load_mesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Stl,
    Xml,
    Zip,
}

impl SourceKind {
    /// Detect the format from the file extension, ignoring case.
    pub fn from_path(path: &Path) -> LoadResult<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension.to_ascii_lowercase().as_str() {
            "stl" => Ok(Self::Stl),
            "xml" => Ok(Self::Xml),
            "zip" => Ok(Self::Zip),
            _ => Err(LoadError::UnsupportedExtension(extension.to_string())),
        }
    }
}

/// Load a mesh from an STL, XML or zipped XML file.
///
/// Every decoder calculates the mesh bounds before returning.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn load_mesh(
    path: impl AsRef<Path>,
    options: LoadOptions,
    progress: Option<ProgressFn<'_>>,
) -> LoadResult<LoadedMesh> {
    let path = path.as_ref();
    match SourceKind::from_path(path)? {
        SourceKind::Stl => stl::load_stl(path, options, progress),
        SourceKind::Xml => xml::load_xml(path, progress),
        SourceKind::Zip => xml::load_zip(path, progress),
    }
}
