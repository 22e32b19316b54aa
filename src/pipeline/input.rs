//! Input resolution: turn a user-supplied path into a decoded document.
//!
//! Three layouts are accepted:
//!
//! * a single page blob (`*.rm`), decoded as a one-page document;
//! * an unpacked notebook: a directory holding `<id>.content` (the JSON
//!   manifest listing page ids in display order) and the page blobs at
//!   `<id>/<page-id>.rm`. Pointing at the `.content` file directly works too;
//! * the same tree packed into a `.zip` or `.rmdoc` archive, as exported
//!   from the device.
//!
//! A page blob that is missing or fails to decode becomes an empty page in
//! its slot, so page numbers keep matching what the device shows. Only when
//! every page fails is the document reported as unreadable.

use crate::error::{InkError, StructuralFailure};
use crate::model::{FormatRevision, Page, StrokeDocument};
use crate::pipeline::decode::{self, LegacyDecoder};
use serde::Deserialize;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PAGE_EXT: &str = "rm";
const MANIFEST_EXT: &str = "content";
const ARCHIVE_EXTS: [&str; 2] = ["zip", "rmdoc"];

/// A decoded document plus where it came from.
#[derive(Debug, Clone)]
pub struct Notebook {
    pub document: StrokeDocument,
    /// File or directory the user pointed at.
    pub source: PathBuf,
    /// Base name for derived output files.
    pub stem: String,
    /// 0-indexed pages that were missing or undecodable.
    pub failed_pages: Vec<usize>,
}

// ── Manifest ─────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct ContentFile {
    #[serde(rename = "cPages")]
    c_pages: Option<CPages>,
    /// Older manifests list bare page ids.
    #[serde(default)]
    pages: Vec<String>,
    #[serde(rename = "lastOpenedPage")]
    last_opened_page: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct CPages {
    #[serde(default)]
    pages: Vec<CPage>,
    #[serde(rename = "lastOpened")]
    last_opened: Option<Timestamped>,
}

#[derive(Debug, Deserialize)]
struct CPage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Timestamped {
    value: String,
}

/// Page order and last-opened index, resolved from a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub page_ids: Vec<String>,
    pub last_opened: Option<usize>,
}

impl Manifest {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        let content: ContentFile = serde_json::from_str(json)?;
        Ok(match content.c_pages {
            Some(c) => {
                let page_ids: Vec<String> = c.pages.into_iter().map(|p| p.id).collect();
                let last_opened = c
                    .last_opened
                    .and_then(|lo| page_ids.iter().position(|id| *id == lo.value));
                Self {
                    page_ids,
                    last_opened,
                }
            }
            None => {
                let last_opened = content
                    .last_opened_page
                    .filter(|&i| i < content.pages.len());
                Self {
                    page_ids: content.pages,
                    last_opened,
                }
            }
        })
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

/// Load and decode a notebook or page file.
///
/// Runs inside `spawn_blocking`: reading and decoding every page blob is
/// file I/O plus CPU-bound scanning.
pub async fn load_notebook(
    path: &Path,
    legacy: Option<Arc<dyn LegacyDecoder>>,
) -> Result<Notebook, InkError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || load_notebook_blocking(&path, legacy.as_deref()))
        .await
        .map_err(|e| InkError::Internal(format!("Load task panicked: {}", e)))?
}

/// Blocking implementation of [`load_notebook`].
pub fn load_notebook_blocking(
    path: &Path,
    legacy: Option<&dyn LegacyDecoder>,
) -> Result<Notebook, InkError> {
    if !path.exists() {
        return Err(InkError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    if path.is_dir() {
        let manifest = find_manifest(path)?;
        return load_directory(path, &manifest, legacy);
    }

    match path.extension().and_then(|e| e.to_str()) {
        Some(PAGE_EXT) => load_page_file(path, legacy),
        Some(MANIFEST_EXT) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            load_directory(dir, path, legacy)
        }
        Some(ext) if ARCHIVE_EXTS.contains(&ext) => load_archive(path, legacy),
        _ => Err(InkError::InvalidInput {
            input: path.display().to_string(),
        }),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, InkError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => InkError::FileNotFound {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => InkError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => InkError::UnreadableDocument {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "notebook".to_string())
}

/// The single `*.content` file directly inside `dir`.
fn find_manifest(dir: &Path) -> Result<PathBuf, InkError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => InkError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => InkError::InvalidInput {
            input: dir.display().to_string(),
        },
    })?;

    let mut manifests: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXT))
        .collect();
    manifests.sort();

    match manifests.len() {
        0 => Err(InkError::InvalidInput {
            input: dir.display().to_string(),
        }),
        1 => Ok(manifests.remove(0)),
        n => Err(InkError::ManifestInvalid {
            path: dir.to_path_buf(),
            detail: format!("found {n} .content manifests, point at one of them directly"),
        }),
    }
}

/// Decode one blob, trying the legacy decoder for older revisions.
fn decode_blob(
    bytes: &[u8],
    legacy: Option<&dyn LegacyDecoder>,
) -> Result<(FormatRevision, Page), StructuralFailure> {
    let page = decode::decode_page_with_fallback(bytes, legacy)?;
    Ok((decode::sniff_revision(bytes), page))
}

fn load_page_file(path: &Path, legacy: Option<&dyn LegacyDecoder>) -> Result<Notebook, InkError> {
    let bytes = read_file(path)?;
    let stem = stem_of(path);

    let document = match decode::decode(&bytes) {
        Ok(doc) => doc,
        Err(StructuralFailure::NotThisFormat) if legacy.is_some() => {
            let (revision, page) =
                decode_blob(&bytes, legacy).map_err(|e| InkError::UnreadableDocument {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            StrokeDocument::new(revision, stem.clone(), vec![page], None)
        }
        Err(e) => {
            return Err(InkError::UnreadableDocument {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    info!(
        "Loaded page file {}: {} strokes",
        path.display(),
        document.stroke_count()
    );
    Ok(Notebook {
        document,
        source: path.to_path_buf(),
        stem,
        failed_pages: Vec::new(),
    })
}

fn load_directory(
    dir: &Path,
    manifest_path: &Path,
    legacy: Option<&dyn LegacyDecoder>,
) -> Result<Notebook, InkError> {
    let json = std::fs::read_to_string(manifest_path).map_err(|e| InkError::ManifestInvalid {
        path: manifest_path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let manifest = Manifest::parse(&json).map_err(|e| InkError::ManifestInvalid {
        path: manifest_path.to_path_buf(),
        detail: e.to_string(),
    })?;

    let id = stem_of(manifest_path);
    let page_dir = dir.join(&id);
    assemble(dir, id, &manifest, legacy, |page_id| {
        let blob = page_dir.join(format!("{page_id}.{PAGE_EXT}"));
        std::fs::read(&blob).map_err(|e| format!("{}: {}", blob.display(), e))
    })
}

fn load_archive(path: &Path, legacy: Option<&dyn LegacyDecoder>) -> Result<Notebook, InkError> {
    let unreadable = |reason: String| InkError::UnreadableDocument {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => InkError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => unreadable(e.to_string()),
    })?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|e| unreadable(format!("not a zip archive: {e}")))?;

    let manifest_name = archive
        .file_names()
        .filter(|name| name.ends_with(".content"))
        .min()
        .map(str::to_string)
        .ok_or_else(|| InkError::ManifestInvalid {
            path: path.to_path_buf(),
            detail: "no .content manifest in archive".into(),
        })?;
    let manifest_invalid = |detail: String| InkError::ManifestInvalid {
        path: path.join(&manifest_name),
        detail,
    };
    let json = read_entry(&mut archive, &manifest_name)
        .and_then(|bytes| String::from_utf8(bytes).map_err(|e| e.to_string()))
        .map_err(manifest_invalid)?;
    let manifest = Manifest::parse(&json).map_err(|e| manifest_invalid(e.to_string()))?;

    let id = stem_of(Path::new(&manifest_name));
    let prefix = match manifest_name.rfind('/') {
        Some(slash) => format!("{}{}", &manifest_name[..=slash], id),
        None => id.clone(),
    };
    debug!("Archive {}: manifest {}", path.display(), manifest_name);
    assemble(path, id, &manifest, legacy, |page_id| {
        read_entry(&mut archive, &format!("{prefix}/{page_id}.{PAGE_EXT}"))
    })
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<Vec<u8>, String> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| format!("{name}: {e}"))?;
    // Declared size is untrusted; cap the up-front reservation.
    let mut bytes = Vec::with_capacity(entry.size().min(1 << 20) as usize);
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| format!("{name}: {e}"))?;
    Ok(bytes)
}

/// Decode every page listed in `manifest`, fetching blobs through `read_page`.
fn assemble(
    source: &Path,
    id: String,
    manifest: &Manifest,
    legacy: Option<&dyn LegacyDecoder>,
    mut read_page: impl FnMut(&str) -> Result<Vec<u8>, String>,
) -> Result<Notebook, InkError> {
    debug!(
        "Manifest {}: {} pages, last opened {:?}",
        id,
        manifest.page_ids.len(),
        manifest.last_opened
    );

    let mut pages = Vec::with_capacity(manifest.page_ids.len());
    let mut failed_pages = Vec::new();
    let mut revision = None;

    for (idx, page_id) in manifest.page_ids.iter().enumerate() {
        let decoded = read_page(page_id)
            .and_then(|bytes| decode_blob(&bytes, legacy).map_err(|e| e.to_string()));
        match decoded {
            Ok((rev, page)) => {
                debug!(
                    "Page {} ({}): {} layers, {} strokes",
                    idx + 1,
                    page_id,
                    page.layers.len(),
                    page.stroke_count()
                );
                revision.get_or_insert(rev);
                pages.push(page);
            }
            Err(reason) => {
                warn!(
                    "Page {} ({}) unreadable, rendering blank: {}",
                    idx + 1,
                    page_id,
                    reason
                );
                failed_pages.push(idx);
                pages.push(Page::default());
            }
        }
    }

    if !pages.is_empty() && failed_pages.len() == pages.len() {
        return Err(InkError::UnreadableDocument {
            path: source.to_path_buf(),
            reason: format!("none of the {} pages could be decoded", pages.len()),
        });
    }

    info!(
        "Loaded notebook {}: {} pages ({} unreadable)",
        id,
        pages.len(),
        failed_pages.len()
    );

    Ok(Notebook {
        document: StrokeDocument::new(
            revision.unwrap_or_default(),
            id.clone(),
            pages,
            manifest.last_opened,
        ),
        source: source.to_path_buf(),
        stem: id,
        failed_pages,
    })
}
