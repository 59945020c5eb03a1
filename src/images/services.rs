use anyhow::Context;
use uuid::Uuid;

use crate::{request::UploadedFile, storage::ImageStore};

/// Stores an uploaded image under a fresh `<uuid>.<ext>` name and returns
/// that name.
pub async fn store_upload(images: &dyn ImageStore, file: &UploadedFile) -> anyhow::Result<String> {
    let ext = ext_from_mime(&file.content_type)
        .with_context(|| format!("unsupported image type {}", file.content_type))?;
    anyhow::ensure!(!file.body.is_empty(), "empty upload");

    let name = format!("{}.{}", Uuid::new_v4(), ext);
    images
        .put(&name, file.body.clone())
        .await
        .with_context(|| format!("store image {name}"))?;
    Ok(name)
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

pub fn mime_from_name(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
