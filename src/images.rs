/*!
 * Image Store
 * Uploaded case images, re-encoded to JPEG and kept under generated filenames
 */
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::forms::Upload;

const MAX_FILE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
/// Subdirectory of the store root holding uncommitted files.
const STAGING_DIR: &str = ".staging";

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("Unsupported file type for {0}. Allowed: JPEG, PNG, WebP, GIF.")]
    UnsupportedType(String),

    #[error("Empty file")]
    Empty,

    #[error("File too large. Maximum size is 10MB.")]
    TooLarge,

    #[error("File content does not match an allowed image type.")]
    InvalidContent,

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Invalid filename")]
    InvalidFilename,

    #[error("Image store I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Image processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ImageStoreError {
    /// Whether the failure was caused by what the client uploaded.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ImageStoreError::Io(_) | ImageStoreError::Task(_))
    }
}

/// How an upload is turned into the stored JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub quality: u8,
    pub max_width: Option<u32>,
}

impl EncodeOptions {
    /// Full size, highest quality. Used when a case is created.
    pub const ORIGINAL: Self = Self {
        quality: 100,
        max_width: None,
    };

    /// At most 800px wide. Used for replacement images on update.
    pub const BOUNDED: Self = Self {
        quality: 90,
        max_width: Some(800),
    };
}

fn validate_image_magic_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.len() < 4 {
        return None;
    }
    match bytes {
        // JPEG: FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        // PNG: 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => Some("image/png"),
        // GIF: 47 49 46 38
        [0x47, 0x49, 0x46, 0x38, ..] => Some("image/gif"),
        // WebP: 52 49 46 46 ... 57 45 42 50
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some("image/webp"),
        _ => None,
    }
}

fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains('\0')
}

/// Checks an upload and returns the extension its stored name will carry.
fn validate_upload(upload: &Upload) -> Result<String, ImageStoreError> {
    let ext = upload
        .extension()
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| ImageStoreError::UnsupportedType(upload.file_name.clone()))?;

    if upload.bytes.is_empty() {
        return Err(ImageStoreError::Empty);
    }
    if upload.bytes.len() > MAX_FILE_SIZE {
        return Err(ImageStoreError::TooLarge);
    }
    if validate_image_magic_bytes(&upload.bytes).is_none() {
        return Err(ImageStoreError::InvalidContent);
    }

    Ok(ext)
}

/// Decodes any supported image and writes it back out as JPEG.
pub fn reencode(bytes: &[u8], options: EncodeOptions) -> Result<Vec<u8>, ImageStoreError> {
    let mut img = image::load_from_memory(bytes)?;

    if let Some(max_width) = options.max_width {
        if img.width() > max_width {
            img = img.resize(max_width, img.height(), FilterType::Lanczos3);
        }
    }

    // JPEG has no alpha channel
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, options.quality).encode_image(&rgb)?;
    Ok(out)
}

/// Generates `<uuid>.<ext>` names for stored images.
pub fn generate_filename(ext: &str) -> String {
    format!("{}.{}", Uuid::new_v4(), ext)
}

#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    /// Opens the store, creating its directory when missing.
    ///
    /// Files left in staging by an earlier process were never committed and
    /// are discarded.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        match tokio::fs::remove_dir_all(&staging).await {
            Ok(()) => tracing::info!("Discarded leftover staged images in {}", staging.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        tokio::fs::create_dir_all(&staging).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, filename: &str) -> Result<PathBuf, ImageStoreError> {
        if !is_safe_filename(filename) {
            return Err(ImageStoreError::InvalidFilename);
        }
        Ok(self.root.join(filename))
    }

    fn staging_path(&self, filename: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(filename)
    }

    pub async fn exists(&self, filename: &str) -> bool {
        match self.path_of(filename) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn remove(&self, filename: &str) -> Result<(), ImageStoreError> {
        let path = self.path_of(filename)?;
        tokio::fs::remove_file(&path).await?;
        tracing::info!("Image deleted: {}", filename);
        Ok(())
    }

    /// Removes every listed file, logging failures instead of returning them.
    pub async fn remove_all<I, S>(&self, filenames: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for filename in filenames {
            let filename = filename.as_ref();
            if let Err(e) = self.remove(filename).await {
                tracing::warn!("Failed to delete image {}: {}", filename, e);
            }
        }
    }
}

struct StagedImage {
    filename: String,
    staged_path: PathBuf,
}

/// Images written by one request.
///
/// Files are first written to the staging directory. `finalize` moves them
/// into the store and `commit` keeps them. A batch that is rolled back, or
/// dropped before `commit`, removes every file it wrote.
pub struct ImageBatch<'a> {
    store: &'a ImageStore,
    staged: Vec<StagedImage>,
    finalized: Vec<String>,
}

impl<'a> ImageBatch<'a> {
    pub fn new(store: &'a ImageStore) -> Self {
        Self {
            store,
            staged: Vec::new(),
            finalized: Vec::new(),
        }
    }

    /// Validates, re-encodes and stages an upload. Returns the final filename.
    pub async fn stage(
        &mut self,
        upload: &Upload,
        options: EncodeOptions,
    ) -> Result<String, ImageStoreError> {
        let ext = validate_upload(upload)?;

        let bytes = upload.bytes.clone();
        let encoded = tokio::task::spawn_blocking(move || reencode(&bytes, options)).await??;

        let filename = generate_filename(&ext);
        let staged_path = self.store.staging_path(&filename);
        tokio::fs::write(&staged_path, &encoded).await?;

        tracing::debug!(
            "Image staged: {} ({} bytes from {})",
            filename,
            encoded.len(),
            upload.file_name
        );

        self.staged.push(StagedImage {
            filename: filename.clone(),
            staged_path,
        });
        Ok(filename)
    }

    fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.finalized.is_empty()
    }

    /// Moves every staged file to its final name.
    pub async fn finalize(&mut self) -> Result<(), ImageStoreError> {
        while let Some(image) = self.staged.pop() {
            let final_path = self.store.path_of(&image.filename)?;
            if let Err(e) = tokio::fs::rename(&image.staged_path, &final_path).await {
                self.staged.push(image);
                return Err(e.into());
            }
            tracing::info!("Image saved: {}", image.filename);
            self.finalized.push(image.filename);
        }
        Ok(())
    }

    /// Keeps the finalized files. Call once the rows referencing them are
    /// committed.
    pub fn commit(&mut self) {
        self.finalized.clear();
    }

    /// Deletes every file this batch wrote.
    pub async fn rollback(mut self) {
        for image in std::mem::take(&mut self.staged) {
            if let Err(e) = tokio::fs::remove_file(&image.staged_path).await {
                tracing::warn!("Failed to discard staged image {}: {}", image.filename, e);
            }
        }
        self.store
            .remove_all(std::mem::take(&mut self.finalized))
            .await;
    }
}

impl Drop for ImageBatch<'_> {
    fn drop(&mut self) {
        if self.is_empty() {
            return;
        }

        // Reached when the request future is cancelled mid-write
        tracing::warn!(
            staged = self.staged.len(),
            finalized = self.finalized.len(),
            "Discarding images of an abandoned batch"
        );
        let store = self.store;
        let paths = self
            .staged
            .drain(..)
            .map(|image| image.staged_path)
            .chain(
                self.finalized
                    .drain(..)
                    .filter_map(|filename| store.path_of(&filename).ok()),
            );
        for path in paths {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!("Failed to discard image {}: {}", path.display(), e);
            }
        }
    }
}
