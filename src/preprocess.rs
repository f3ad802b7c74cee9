//! Turns files on disk into analysis payloads.
//!
//! Raster images are decoded, scaled down so their longest side fits
//! `max_dimension`, re-encoded as JPEG and base64-encoded. Videos and SVGs
//! need external tooling to rasterise and are rejected.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use image::{DynamicImage, ImageFormat};
use thiserror::Error;

use crate::analysis::Payload;
use crate::batch::WorkItem;

pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

const RASTER_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const UNSUPPORTED_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv", "svg"];

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unsupported file type: {0}")]
    Unsupported(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether the file looks like something [`load_payload`] can handle.
pub fn is_supported(path: &Path) -> bool {
    extension(path).is_some_and(|e| RASTER_EXTENSIONS.contains(&e.as_str()))
}

/// Encodes one image file as a JPEG payload capped at `max_dimension`.
pub fn load_payload(path: &Path, max_dimension: u32) -> Result<Payload, PreprocessError> {
    if !is_supported(path) {
        return Err(PreprocessError::Unsupported(path.to_path_buf()));
    }

    let bytes = std::fs::read(path).map_err(|source| PreprocessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decoded = image::load_from_memory(&bytes).map_err(|source| PreprocessError::Image {
        path: path.to_path_buf(),
        source,
    })?;

    let encoded = encode_jpeg(&fit_within(decoded, max_dimension)).map_err(|source| {
        PreprocessError::Image {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(Payload::jpeg(
        base64::engine::general_purpose::STANDARD.encode(encoded),
    ))
}

fn fit_within(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    if image.width() <= max_dimension && image.height() <= max_dimension {
        image
    } else {
        image.thumbnail(max_dimension, max_dimension)
    }
}

fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Cursor::new(Vec::new());
    rgb.write_to(&mut buf, ImageFormat::Jpeg)?;
    Ok(buf.into_inner())
}

/// Expands directories one level deep and keeps files in a stable order.
pub fn collect_inputs(paths: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            files.extend(entries);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// Builds work items from input files, logging and skipping the ones that fail.
pub fn build_items(files: &[PathBuf], max_dimension: u32) -> Vec<WorkItem> {
    let mut items = Vec::with_capacity(files.len());
    for file in files {
        if extension(file).is_some_and(|e| UNSUPPORTED_EXTENSIONS.contains(&e.as_str())) {
            tracing::warn!(file = %file.display(), "video and vector inputs are not supported, skipping");
            continue;
        }
        match load_payload(file, max_dimension) {
            Ok(payload) => items.push(WorkItem::new(file.display().to_string(), payload)),
            Err(e) => tracing::warn!(error = %e, "skipping input"),
        }
    }
    items
}
