//! yt-dlp based media acquisition.
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    pipeline::{
        identifier::RunIdentifier,
        model::{MediaKind, MediaMetadata, MediaReference},
    },
    util::text::{non_empty, preview},
};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mkv", "mov", "m4v"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic"];

#[derive(Debug, Clone)]
pub(crate) struct YtDlpDownloader {
    binary: PathBuf,
    output_dir: PathBuf,
}

/// The subset of yt-dlp's `.info.json` that becomes media metadata.
#[derive(Debug, Default, Deserialize)]
struct InfoJson {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

impl YtDlpDownloader {
    pub(crate) fn new(binary: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Downloads `url` into `{output_dir}/{id}.{ext}` and describes what
    /// landed on disk.
    pub(crate) async fn download(&self, url: &str, id: &RunIdentifier) -> Result<MediaReference> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        let template = self.output_dir.join(format!("{id}.%(ext)s"));
        info!(url, "downloading media");
        let output = Command::new(&self.binary)
            .arg("--no-progress")
            .arg("--no-playlist")
            .arg("--write-info-json")
            .arg("-o")
            .arg(&template)
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "yt-dlp exited with {}: {}",
                output.status,
                preview(stderr.trim(), 500)
            );
        }

        let (kind, files) = collect_media(&self.output_dir, id).await?;
        let metadata = read_info_json(&self.output_dir.join(format!("{id}.info.json"))).await;
        debug!(kind = ?kind, files = files.len(), "media downloaded");

        Ok(MediaReference {
            kind,
            files,
            metadata,
        })
    }
}

/// Finds the media files written for `id` and decides the media kind.
///
/// Image sets are renamed to `{id}_{idx:02}.{ext}` in name order so every
/// item has a stable path.
pub(crate) async fn collect_media(
    dir: &Path,
    id: &RunIdentifier,
) -> Result<(MediaKind, Vec<PathBuf>)> {
    let mut videos = Vec::new();
    let mut images = Vec::new();

    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to list {}", dir.display()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .context("failed to read directory entry")?
    {
        let path = entry.path();
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|e| e.to_str()),
        ) else {
            continue;
        };
        if !belongs_to(stem, id.as_str()) {
            continue;
        }
        let ext = ext.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            videos.push(path);
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            images.push(path);
        }
    }

    if !videos.is_empty() {
        videos.sort();
        return Ok((MediaKind::Video, videos));
    }
    if images.is_empty() {
        bail!("no media files found for {id} in {}", dir.display());
    }

    images.sort_by_cached_key(|path| item_order(path, id.as_str()));
    let mut renamed = Vec::with_capacity(images.len());
    for (index, image) in images.into_iter().enumerate() {
        let ext = image
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_ascii_lowercase();
        let target = dir.join(format!("{}.{ext}", id.item(index + 1)));
        if image != target {
            tokio::fs::rename(&image, &target)
                .await
                .with_context(|| format!("failed to rename {}", image.display()))?;
        }
        renamed.push(target);
    }
    Ok((MediaKind::Carousel, renamed))
}

/// Sort key for carousel images: the bare `{id}` first, then `{id}_{n}` by
/// numeric `n`, so `_10` lands after `_2`.
fn item_order(path: &Path, id: &str) -> (u64, PathBuf) {
    let index = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.strip_prefix(id))
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|digits| digits.parse::<u64>().ok())
        .unwrap_or(0);
    (index, path.to_path_buf())
}

/// `{id}` itself or `{id}_{digits}`, so `x_photo_5` never claims
/// `x_photo_50`.
fn belongs_to(stem: &str, id: &str) -> bool {
    match stem.strip_prefix(id) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

async fn read_info_json(path: &Path) -> MediaMetadata {
    let Ok(raw) = tokio::fs::read(path).await else {
        return MediaMetadata::default();
    };
    match serde_json::from_slice::<InfoJson>(&raw) {
        Ok(info) => MediaMetadata {
            title: non_empty(info.title),
            description: non_empty(info.description),
            uploader: non_empty(info.uploader),
            duration_secs: info.duration.filter(|d| d.is_finite() && *d > 0.0),
        },
        Err(error) => {
            debug!(error = %error, path = %path.display(), "unreadable info json");
            MediaMetadata::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn id(raw: &str) -> RunIdentifier {
        RunIdentifier::resolve(raw).expect("id")
    }

    #[test]
    fn belongs_to_matches_exact_and_numbered_items() {
        assert!(belongs_to("a_photo_5", "a_photo_5"));
        assert!(belongs_to("a_photo_5_01", "a_photo_5"));
        assert!(!belongs_to("a_photo_50", "a_photo_5"));
        assert!(!belongs_to("a_photo_5_x", "a_photo_5"));
    }

    #[tokio::test]
    async fn video_file_wins_over_thumbnails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = id("https://www.tiktok.com/@a/video/1");
        fs::write(dir.path().join("a_video_1.mp4"), b"v").expect("write");
        fs::write(dir.path().join("a_video_1.jpg"), b"i").expect("write");
        fs::write(dir.path().join("a_video_1.info.json"), b"{}").expect("write");

        let (kind, files) = collect_media(dir.path(), &id).await.expect("collect");
        assert_eq!(kind, MediaKind::Video);
        assert_eq!(files, vec![dir.path().join("a_video_1.mp4")]);
    }

    #[tokio::test]
    async fn images_become_numbered_carousel_items() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = id("https://www.tiktok.com/@a/photo/2");
        fs::write(dir.path().join("a_photo_2_2.jpg"), b"second").expect("write");
        fs::write(dir.path().join("a_photo_2_1.png"), b"first").expect("write");

        let (kind, files) = collect_media(dir.path(), &id).await.expect("collect");
        assert_eq!(kind, MediaKind::Carousel);
        assert_eq!(
            files,
            vec![
                dir.path().join("a_photo_2_01.png"),
                dir.path().join("a_photo_2_02.jpg"),
            ]
        );
        assert_eq!(fs::read(&files[0]).expect("read"), b"first");
    }

    #[tokio::test]
    async fn carousel_items_keep_numeric_order_past_nine() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = id("https://www.tiktok.com/@a/photo/3");
        for index in 1..=11 {
            fs::write(
                dir.path().join(format!("a_photo_3_{index}.jpg")),
                index.to_string(),
            )
            .expect("write");
        }

        let (_, files) = collect_media(dir.path(), &id).await.expect("collect");

        assert_eq!(files.len(), 11);
        for (position, file) in files.iter().enumerate() {
            assert_eq!(
                file,
                &dir.path().join(format!("a_photo_3_{:02}.jpg", position + 1))
            );
            assert_eq!(
                fs::read_to_string(file).expect("read"),
                (position + 1).to_string()
            );
        }
    }

    #[tokio::test]
    async fn missing_media_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = id("https://www.tiktok.com/@a/video/9");
        assert!(collect_media(dir.path(), &id).await.is_err());
    }

    #[tokio::test]
    async fn info_json_fills_metadata() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x.info.json");
        fs::write(
            &path,
            r#"{"title": "Ramen tour", "description": " best bowls ", "uploader": "", "duration": 31.5}"#,
        )
        .expect("write");

        let metadata = read_info_json(&path).await;
        assert_eq!(metadata.title.as_deref(), Some("Ramen tour"));
        assert_eq!(metadata.description.as_deref(), Some("best bowls"));
        assert_eq!(metadata.uploader, None);
        assert_eq!(metadata.duration_secs, Some(31.5));
    }

    #[tokio::test]
    async fn missing_binary_fails_with_spawn_context() {
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = YtDlpDownloader::new("/nonexistent/yt-dlp", dir.path());
        let error = downloader
            .download("https://example.com/video/1", &id("https://example.com/video/1"))
            .await
            .expect_err("should fail");
        assert!(error.to_string().contains("failed to spawn"));
    }
}
