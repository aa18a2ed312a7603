//! Resize and store uploaded images.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::Utc;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType::Lanczos3;
use image::load_from_memory;
use uuid::Uuid;

use crate::error::{Result, ServerError};

const JPEG_QUALITY: u8 = 90;

/// Output shape of a processed upload.
#[derive(Clone, Copy, Debug)]
pub enum ImageKind {
    /// Tour cover and gallery pictures, 3:2.
    TourImage,
    /// Square profile picture.
    UserPhoto,
}

impl ImageKind {
    const fn dimensions(self) -> (u32, u32) {
        match self {
            ImageKind::TourImage => (2000, 1333),
            ImageKind::UserPhoto => (500, 500),
        }
    }

    /// Subdirectory under the public assets directory.
    const fn directory(self) -> &'static str {
        match self {
            ImageKind::TourImage => "img/tours",
            ImageKind::UserPhoto => "img/users",
        }
    }
}

pub fn tour_cover_filename(tour_id: Uuid) -> String {
    format!("tour-{tour_id}-{}-cover.jpeg", Utc::now().timestamp_millis())
}

pub fn tour_image_filename(tour_id: Uuid, index: usize) -> String {
    format!(
        "tour-{tour_id}-{}-{}.jpeg",
        Utc::now().timestamp_millis(),
        index + 1
    )
}

pub fn user_photo_filename(user_id: Uuid) -> String {
    format!("user-{user_id}-{}.jpeg", Utc::now().timestamp_millis())
}

/// Crop-resize raw upload bytes to the kind's dimensions, as JPEG.
pub fn resize(buffer: &[u8], kind: ImageKind) -> Result<Vec<u8>> {
    let image = load_from_memory(buffer).map_err(|_| {
        ServerError::BadRequest("Please upload only images.".to_owned())
    })?;

    let (width, height) = kind.dimensions();
    let resized = image.resize_to_fill(width, height, Lanczos3);

    let mut output = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY);
    resized
        .write_with_encoder(encoder)
        .map_err(|err| ServerError::Internal {
            details: "image encoding failed".into(),
            source: Some(Box::new(err)),
        })?;

    Ok(output.into_inner())
}

/// Resize on a blocking thread, then persist under the public directory.
/// Returns the stored filename.
pub async fn process_and_save(
    public_dir: &Path,
    kind: ImageKind,
    filename: String,
    buffer: Vec<u8>,
) -> Result<String> {
    let encoded =
        tokio::task::spawn_blocking(move || resize(&buffer, kind))
            .await
            .map_err(|err| ServerError::Internal {
                details: "image task aborted".into(),
                source: Some(Box::new(err)),
            })??;

    let directory: PathBuf = public_dir.join(kind.directory());
    tokio::fs::create_dir_all(&directory).await.map_err(|err| {
        ServerError::Internal {
            details: "cannot create upload directory".into(),
            source: Some(Box::new(err)),
        }
    })?;
    tokio::fs::write(directory.join(&filename), encoded)
        .await
        .map_err(|err| ServerError::Internal {
            details: "cannot store upload".into(),
            source: Some(Box::new(err)),
        })?;

    Ok(filename)
}
