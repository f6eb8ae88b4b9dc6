use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

// @module: File and directory utilities

/// Page image extensions picked up from an input directory
const PAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

static NATURAL_CHUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+|\D+").expect("valid chunk regex"));

// @struct: File operations utility
pub struct FileManager;

impl FileManager {
    // @checks: File existence
    pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_file()
    }

    // @checks: Directory existence
    pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref().exists() && path.as_ref().is_dir()
    }

    // @creates: Directory and parents if needed
    pub fn ensure_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path).with_context(|| format!("Failed to create directory: {:?}", path))?;
        }
        Ok(())
    }

    /// Page images under `dir` in natural order (`2.png` before `10.png`)
    pub fn find_page_images<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
        let mut result = Vec::new();
        for entry in WalkDir::new(dir.as_ref()).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if path.is_file() && Self::is_page_image(path) {
                result.push(path.to_path_buf());
            }
        }
        result.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
        Ok(result)
    }

    // @checks: Extension is a supported page image
    pub fn is_page_image(path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                PAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
            })
            .unwrap_or(false)
    }

    /// Page id derived from the file stem
    pub fn page_id(path: &Path) -> String {
        path.file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "page".to_string())
    }

    // @generates: Output path with a suffix, e.g. `001.en.png`
    pub fn generate_output_path<P1: AsRef<Path>, P2: AsRef<Path>>(
        input_file: P1,
        output_dir: P2,
        suffix: &str,
        extension: &str,
    ) -> PathBuf {
        let stem = input_file.as_ref().file_stem().unwrap_or_default();
        let mut output_filename = stem.to_string_lossy().to_string();
        output_filename.push('.');
        output_filename.push_str(suffix);
        output_filename.push('.');
        output_filename.push_str(extension);
        output_dir.as_ref().join(output_filename)
    }

    /// Write a string to a file
    pub fn write_to_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            Self::ensure_dir(parent)?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write to file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Serialize a value as pretty JSON into a file
    pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON output")?;
        Self::write_to_file(path, &json)
    }

    /// Save a page image, format chosen from the extension
    pub async fn save_image(path: PathBuf, image: DynamicImage) -> Result<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        tokio::task::spawn_blocking(move || {
            // JPEG has no alpha channel
            let is_jpeg = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
                .unwrap_or(false);
            let image = if is_jpeg {
                DynamicImage::ImageRgb8(image.to_rgb8())
            } else {
                image
            };
            image
                .save(&path)
                .with_context(|| format!("Failed to save image: {:?}", path))
        })
        .await
        .context("Failed to spawn blocking task for image save")?
    }
}

/// Compare names chunk by chunk, numeric chunks by value
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = NATURAL_CHUNK.find_iter(a).map(|m| m.as_str());
    let mut right = NATURAL_CHUNK.find_iter(b).map(|m| m.as_str());
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let order = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(n), Ok(m)) => n.cmp(&m).then_with(|| x.len().cmp(&y.len())),
                    _ => x.cmp(y),
                };
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
    }
}
