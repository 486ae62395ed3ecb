use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// Largest decoded image accepted.
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Local image store for post and story media.
///
/// Uploads arrive as base64 data URLs and are written to
/// `{dir}/{uuid}.{ext}`. Every upload gets its own file, even for identical
/// bytes, so deleting one owner's image never touches another's. The
/// returned URL is `{url_prefix}/{file name}`, served by the static file
/// layer.
pub struct MediaStore {
    dir: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    pub async fn new(dir: PathBuf, url_prefix: impl Into<String>) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self {
            dir,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    /// Store one `data:image/<type>;base64,<payload>` upload and return its URL.
    pub async fn upload(&self, data_url: &str) -> Result<String, ApiError> {
        let (ext, bytes) = decode_data_url(data_url)?;

        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.dir.join(&file_name);

        fs::write(&path, &bytes)
            .await
            .map_err(|e| ApiError::Upstream(format!("writing {}: {}", path.display(), e)))?;

        Ok(format!("{}/{}", self.url_prefix, file_name))
    }

    /// Upload every image, in order. Stops at the first failure.
    pub async fn upload_all(&self, data_urls: &[String]) -> Result<Vec<String>, ApiError> {
        let mut urls = Vec::with_capacity(data_urls.len());
        for data_url in data_urls {
            urls.push(self.upload(data_url).await?);
        }
        Ok(urls)
    }

    /// Remove stored images by URL. Files already gone are fine; URLs that
    /// this store did not issue are skipped.
    pub async fn delete(&self, urls: &[String]) -> Result<(), ApiError> {
        for url in urls {
            let Some(file_name) = self.file_name_of(url) else {
                warn!("Not deleting foreign media url {}", url);
                continue;
            };

            match fs::remove_file(self.dir.join(file_name)).await {
                Ok(()) => info!("Deleted media {}", file_name),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("Media {} already gone", file_name);
                }
                Err(e) => return Err(ApiError::Upstream(format!("deleting {}: {}", file_name, e))),
            }
        }
        Ok(())
    }

    fn file_name_of<'a>(&self, url: &'a str) -> Option<&'a str> {
        let name = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        valid.then_some(name)
    }
}

fn decode_data_url(data_url: &str) -> Result<(&'static str, Vec<u8>), ApiError> {
    let invalid = || ApiError::Validation("images must be base64 data URLs".into());

    let rest = data_url.strip_prefix("data:").ok_or_else(invalid)?;
    let (mime, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;

    let ext = match mime {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        other => {
            return Err(ApiError::Validation(format!("unsupported image type {}", other)));
        }
    };

    let bytes = B64.decode(payload.trim()).map_err(|_| invalid())?;
    if bytes.is_empty() {
        return Err(invalid());
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ApiError::Validation("image too large".into()));
    }

    Ok((ext, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_data_url(bytes: &[u8]) -> String {
        format!("data:image/png;base64,{}", B64.encode(bytes))
    }

    #[tokio::test]
    async fn identical_uploads_get_separate_files() {
        let dir = std::env::temp_dir().join(format!("murmur-media-{}", Uuid::new_v4()));
        let store = MediaStore::new(dir.clone(), "/media/").await.unwrap();

        let a = store.upload(&png_data_url(b"pixels")).await.unwrap();
        let b = store.upload(&png_data_url(b"pixels")).await.unwrap();
        assert_ne!(a, b);
        assert!(a.starts_with("/media/") && a.ends_with(".png"));

        let a_name = a.trim_start_matches("/media/");
        let b_name = b.trim_start_matches("/media/");
        assert!(store.dir().join(a_name).exists());

        store.delete(&[a.clone()]).await.unwrap();
        assert!(!dir.join(a_name).exists());
        assert!(dir.join(b_name).exists());
        // Already gone
        store.delete(&[a]).await.unwrap();

        // Not ours
        store.delete(&["https://cdn.example.com/x.png".into()]).await.unwrap();
        store.delete(&["/media/../secret".into()]).await.unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rejects_malformed_uploads() {
        assert!(matches!(decode_data_url("hello"), Err(ApiError::Validation(_))));
        assert!(matches!(
            decode_data_url("data:text/html;base64,PGgxPg=="),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,***"),
            Err(ApiError::Validation(_))
        ));
        assert_eq!(decode_data_url(&png_data_url(b"x")).unwrap().0, "png");
    }
}
