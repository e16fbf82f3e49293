//! Upload file handles.
//!
//! An [`UploadFile`] is what a file input holds and what a multipart form
//! carries. Its identity is a generated [`FileId`] attached when the handle
//! is created: clones share it, a reconstructed file gets a new one, and two
//! files with identical bytes are still different files. All caching is keyed
//! by this identity, never by content.

use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

/// Canonical PDF media type.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Reference identity of an [`UploadFile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct FileId(u64);

impl FileId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        FileId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

struct FileData {
    id: FileId,
    name: String,
    media_type: String,
    last_modified: SystemTime,
    bytes: Bytes,
}

/// An immutable, cheaply clonable file handle.
#[derive(Clone)]
pub struct UploadFile {
    inner: Arc<FileData>,
}

impl UploadFile {
    /// Create a file stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self::with_last_modified(name, media_type, bytes, SystemTime::now())
    }

    pub fn with_last_modified(
        name: impl Into<String>,
        media_type: impl Into<String>,
        bytes: impl Into<Bytes>,
        last_modified: SystemTime,
    ) -> Self {
        Self {
            inner: Arc::new(FileData {
                id: FileId::next(),
                name: name.into(),
                media_type: media_type.into(),
                last_modified,
                bytes: bytes.into(),
            }),
        }
    }

    /// Read a file from disk. The media type is inferred from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let last_modified = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .unwrap_or_else(|_| SystemTime::now());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let media_type = media_type_for(&name);
        Ok(Self::with_last_modified(name, media_type, bytes, last_modified))
    }

    pub fn id(&self) -> FileId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn media_type(&self) -> &str {
        &self.inner.media_type
    }

    pub fn last_modified(&self) -> SystemTime {
        self.inner.last_modified
    }

    pub fn bytes(&self) -> &Bytes {
        &self.inner.bytes
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.bytes.len() as u64
    }

    /// PDF by declared media type or by a `.pdf` extension (any case).
    pub fn is_pdf(&self) -> bool {
        self.media_type() == PDF_MEDIA_TYPE || self.name().to_lowercase().ends_with(".pdf")
    }

    /// `true` when both handles refer to the same file object.
    pub fn same_file(&self, other: &UploadFile) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakUploadFile {
        WeakUploadFile(Arc::downgrade(&self.inner))
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("media_type", &self.inner.media_type)
            .field("size", &self.inner.bytes.len())
            .finish()
    }
}

/// A non-owning reference used by caches so they never keep a file alive.
#[derive(Clone)]
pub(crate) struct WeakUploadFile(Weak<FileData>);

impl WeakUploadFile {
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<UploadFile> {
        self.0.upgrade().map(|inner| UploadFile { inner })
    }
}

fn media_type_for(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("pdf") => PDF_MEDIA_TYPE,
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
