//! File and folder operations
//!
//! Each operation handles a batch of paths and reports every item, so one
//! bad path does not hide what happened to the others.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use tracing::debug;

use crate::llm::ToolPayload;

use super::image::{is_image_path, load_image};
use super::ToolError;

/// One entry of `create_files`
#[derive(Debug, Clone, Deserialize)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub content: String,
}

/// Per-item outcome of a batch operation
#[derive(Debug, Default)]
pub struct BatchReport {
    pub payload: ToolPayload,
    pub failures: usize,
}

impl BatchReport {
    fn ok(&mut self, line: String) {
        self.push(line);
    }

    fn fail(&mut self, err: ToolError) {
        self.failures += 1;
        self.push(format!("Error: {}", err));
    }

    fn push(&mut self, line: String) {
        if !self.payload.text.is_empty() {
            self.payload.text.push('\n');
        }
        self.payload.text.push_str(&line);
    }

    pub fn failed(&self) -> bool {
        self.failures > 0
    }
}

/// Resolves tool paths against the project root
#[derive(Debug, Clone)]
pub struct FileOps {
    root: PathBuf,
}

impl FileOps {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Relative paths are taken from the project root
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    pub async fn create_folders(&self, paths: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for path in paths {
            match tokio::fs::create_dir_all(self.resolve(path)).await {
                Ok(()) => report.ok(format!("Folder created: {}", path)),
                Err(e) => report.fail(ToolError::io(path, e)),
            }
        }
        report
    }

    pub async fn create_files(&self, files: &[FileSpec]) -> BatchReport {
        let mut report = BatchReport::default();
        for file in files {
            match write_file(&self.resolve(&file.path), &file.content).await {
                Ok(()) => report.ok(format!(
                    "File created: {} ({} bytes)",
                    file.path,
                    file.content.len()
                )),
                Err(e) => report.fail(ToolError::io(&file.path, e)),
            }
        }
        report
    }

    /// Text comes back as-is, images as attached JPEGs, other bytes as base64
    pub async fn read_files(&self, paths: &[String]) -> BatchReport {
        let mut report = BatchReport::default();
        for path in paths {
            let full = self.resolve(path);
            if is_image_path(&full) {
                match load_image(&full).await {
                    Ok(image) => {
                        report.payload.images.push(image);
                        report.ok(format!("Image {} attached", path));
                    }
                    Err(e) => report.fail(e),
                }
                continue;
            }

            match tokio::fs::read(&full).await {
                Ok(bytes) => {
                    debug!(path = %full.display(), bytes = bytes.len(), "Read file");
                    match String::from_utf8(bytes) {
                        Ok(text) => report.ok(format!("--- {} ---\n{}", path, text)),
                        Err(e) => report.ok(format!(
                            "--- {} (binary, base64) ---\n{}",
                            path,
                            STANDARD.encode(e.into_bytes())
                        )),
                    }
                }
                Err(e) => report.fail(ToolError::io(path, e)),
            }
        }
        report
    }
}

/// Write `content`, creating missing parent directories
pub async fn write_file(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, content).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_folders_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let ops = FileOps::new(dir.path());
        let report = ops
            .create_folders(&["a/b/c".to_string(), "d".to_string()])
            .await;
        assert!(!report.failed());
        assert!(dir.path().join("a/b/c").is_dir());
        assert!(dir.path().join("d").is_dir());
    }

    #[tokio::test]
    async fn test_create_then_read_files() {
        let dir = tempfile::tempdir().unwrap();
        let ops = FileOps::new(dir.path());
        let files = vec![FileSpec {
            path: "src/app.py".to_string(),
            content: "print('hi')\n".to_string(),
        }];
        assert!(!ops.create_files(&files).await.failed());

        let report = ops.read_files(&["src/app.py".to_string()]).await;
        assert!(!report.failed());
        assert!(report.payload.text.contains("print('hi')"));
        assert!(report.payload.images.is_empty());
    }

    #[tokio::test]
    async fn test_read_reports_each_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ok.txt"), "fine").unwrap();
        let ops = FileOps::new(dir.path());

        let report = ops
            .read_files(&["missing.txt".to_string(), "ok.txt".to_string()])
            .await;
        assert_eq!(report.failures, 1);
        assert!(report.payload.text.contains("missing.txt"));
        assert!(report.payload.text.contains("fine"));
    }

    #[tokio::test]
    async fn test_binary_is_base64() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();
        let ops = FileOps::new(dir.path());

        let report = ops.read_files(&["blob.bin".to_string()]).await;
        assert!(report.payload.text.contains("base64"));
        assert!(report.payload.text.contains(&STANDARD.encode([0xff, 0xfe, 0x00])));
    }

    #[tokio::test]
    async fn test_read_image_attaches_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]));
        img.save(dir.path().join("pic.png")).unwrap();
        let ops = FileOps::new(dir.path());

        let report = ops.read_files(&["pic.png".to_string()]).await;
        assert!(!report.failed());
        assert_eq!(report.payload.images.len(), 1);
        assert_eq!(report.payload.images[0].media_type, "image/jpeg");
    }
}
