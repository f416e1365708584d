use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Decoded image payload from a `data:image/...;base64,...` URI.
pub struct DecodedImage {
    pub extension: &'static str,
    pub bytes: Vec<u8>,
}

pub fn decode_data_uri(data: &str) -> AppResult<DecodedImage> {
    let rest = data
        .strip_prefix("data:")
        .ok_or_else(|| AppError::validation("image", "Expected a base64 data URI"))?;

    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| AppError::validation("image", "Expected base64-encoded image data"))?;

    let extension = match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => {
            return Err(AppError::validation(
                "image",
                format!("Unsupported image type: {mime}"),
            ));
        }
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| AppError::validation("image", "Invalid base64 image data"))?;

    if bytes.is_empty() {
        return Err(AppError::validation("image", "Empty image"));
    }

    Ok(DecodedImage { extension, bytes })
}

/// Writes a decoded recipe image under `<media_root>/recipes/` and returns
/// the path relative to the media root, as stored on the recipe row.
pub fn save_recipe_image(media_root: &Path, data: &str) -> AppResult<String> {
    let image = decode_data_uri(data)?;

    let relative = format!("recipes/{}.{}", Uuid::new_v4(), image.extension);
    let target = media_root.join(&relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::Internal(e.into()))?;
    }
    fs::write(&target, &image.bytes).map_err(|e| AppError::Internal(e.into()))?;

    Ok(relative)
}

/// Best-effort removal of a stored image, used when a recipe is deleted or
/// its image replaced. A failure is logged and swallowed; an already-absent
/// file is not an error.
pub fn remove_image(media_root: &Path, relative: &str) {
    let target = media_root.join(relative);
    if let Err(err) = fs::remove_file(&target) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %err, path = %target.display(), "image cleanup failed");
        }
    }
}

/// URL under which a stored image path is served.
pub fn image_url(path: &str) -> String {
    format!("/media/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 transparent PNG
    const PNG_B64: &str =
        "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn decodes_png_data_uri() {
        let uri = format!("data:image/png;base64,{PNG_B64}");
        let image = decode_data_uri(&uri).unwrap();
        assert_eq!(image.extension, "png");
        assert_eq!(&image.bytes[1..4], b"PNG");
    }

    #[test]
    fn rejects_plain_base64_without_header() {
        assert!(decode_data_uri(PNG_B64).is_err());
    }

    #[test]
    fn rejects_unknown_mime() {
        let uri = format!("data:application/pdf;base64,{PNG_B64}");
        assert!(decode_data_uri(&uri).is_err());
    }

    #[test]
    fn saves_image_under_recipes_dir() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("data:image/jpeg;base64,{PNG_B64}");
        let path = save_recipe_image(dir.path(), &uri).unwrap();
        assert!(path.starts_with("recipes/"));
        assert!(path.ends_with(".jpg"));
        assert!(dir.path().join(&path).exists());
        assert_eq!(image_url(&path), format!("/media/{path}"));
    }

    #[test]
    fn removes_saved_image() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("data:image/png;base64,{PNG_B64}");
        let path = save_recipe_image(dir.path(), &uri).unwrap();
        assert!(dir.path().join(&path).exists());

        remove_image(dir.path(), &path);
        assert!(!dir.path().join(&path).exists());

        // Removing an already-absent file is a no-op.
        remove_image(dir.path(), &path);
    }
}
