//! Still-image preview generator.
//!
//! Decodes a local image source with the `image` crate, fits it into the
//! requested bounding box (aspect preserved, never upscaled) and writes a
//! JPEG. Output goes to a `.tmp` sibling first and is renamed into place, so
//! a crash never leaves a truncated artifact under its final name.
//!
//! Video sources need a frame-grabbing generator plugged in through the same
//! `ArtifactGenerator` trait.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, ImageBuffer, ImageReader, Rgb, RgbImage};
use log::{debug, trace};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::entities::feed_item::local_path;
use crate::entities::{Artifact, ArtifactGenerator, ArtifactRequest, GenerationError};

/// Placeholder fill (dark green)
pub const PLACEHOLDER_RGB: [u8; 3] = [0, 100, 0];

const PLACEHOLDER_QUALITY: u8 = 85;

/// Fit `src` into `bounds` keeping aspect ratio; never larger than `src`.
///
/// Zero-sized bounds mean "no limit" on that axis.
pub fn fit_within(src: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = src;
    if sw == 0 || sh == 0 {
        return (sw, sh);
    }
    let sx = if bounds.0 == 0 { 1.0 } else { bounds.0 as f64 / sw as f64 };
    let sy = if bounds.1 == 0 { 1.0 } else { bounds.1 as f64 / sh as f64 };
    let scale = sx.min(sy).min(1.0);
    let w = ((sw as f64 * scale).round() as u32).clamp(1, sw);
    let h = ((sh as f64 * scale).round() as u32).clamp(1, sh);
    (w, h)
}

/// Generator for still-image sources.
#[derive(Debug, Default, Clone)]
pub struct ImageGenerator {
    filter: Option<FilterType>,
}

impl ImageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter: Some(filter) }
    }

    fn decode(&self, path: &Path) -> Result<image::DynamicImage, GenerationError> {
        // reader (and its file handle) is dropped on every path out of this fn
        let reader = ImageReader::open(path)?
            .with_guessed_format()
            .map_err(GenerationError::Io)?;
        reader
            .decode()
            .map_err(|e| GenerationError::Decode(format!("{}: {}", path.display(), e)))
    }
}

impl ArtifactGenerator for ImageGenerator {
    fn generate(&self, request: &ArtifactRequest) -> Result<Artifact, GenerationError> {
        let path = local_path(&request.source)
            .filter(|p| p.is_file())
            .ok_or_else(|| GenerationError::InvalidLocator(request.source.clone()))?;

        let img = self.decode(&path)?;
        let (w, h) = fit_within((img.width(), img.height()), (request.width, request.height));
        trace!(
            "Preview {}: {}x{} -> {}x{}",
            path.display(),
            img.width(),
            img.height(),
            w,
            h
        );

        let rgb = if (w, h) == (img.width(), img.height()) {
            img.to_rgb8()
        } else {
            img.resize_exact(w, h, self.filter.unwrap_or(FilterType::Triangle)).to_rgb8()
        };

        let size_bytes = write_jpeg(&rgb, &request.output, request.quality)?;
        debug!("Generated preview {} ({} bytes)", request.output.display(), size_bytes);
        Ok(Artifact { path: request.output.clone(), width: w, height: h, size_bytes })
    }

    fn placeholder(&self, output: &Path, width: u32, height: u32) -> Result<Artifact, GenerationError> {
        let (w, h) = (width.max(1), height.max(1));
        let img: RgbImage = ImageBuffer::from_pixel(w, h, Rgb(PLACEHOLDER_RGB));
        let size_bytes = write_jpeg(&img, output, PLACEHOLDER_QUALITY)?;
        Ok(Artifact { path: output.to_path_buf(), width: w, height: h, size_bytes })
    }
}

/// Removes the temp file unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Encode RGB pixels as JPEG at `output` (atomic rename). Returns file size.
fn write_jpeg(img: &RgbImage, output: &Path, quality: u8) -> Result<u64, GenerationError> {
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = output.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let mut partial = PartialFile { path: PathBuf::from(tmp_name), armed: true };

    {
        let mut writer = BufWriter::new(File::create(&partial.path)?);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100));
        encoder
            .encode(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
            .map_err(|e| GenerationError::Encode(e.to_string()))?;
        writer.flush()?;
    }

    fs::rename(&partial.path, output)?;
    partial.armed = false;
    Ok(fs::metadata(output)?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_source(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        let img: RgbImage = ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        img.save(&path).unwrap();
        path
    }

    fn request(source: &str, output: PathBuf, w: u32, h: u32) -> ArtifactRequest {
        ArtifactRequest { source: source.to_string(), output, width: w, height: h, quality: 85 }
    }

    #[test]
    fn test_fit_within() {
        // landscape into portrait box: width bound
        assert_eq!(fit_within((1920, 1080), (480, 800)), (480, 270));
        // portrait: height bound
        assert_eq!(fit_within((1080, 1920), (480, 800)), (450, 800));
        // never upscale
        assert_eq!(fit_within((100, 50), (480, 800)), (100, 50));
        assert_eq!(fit_within((0, 50), (480, 800)), (0, 50));
        assert_eq!(fit_within((1000, 10), (480, 800)), (480, 5));
        assert_eq!(fit_within((640, 480), (0, 240)), (320, 240));
    }

    #[test]
    fn test_generate_downscales_and_writes_jpeg() {
        let tmp = TempDir::new().unwrap();
        let src = write_source(tmp.path(), "src.png", 960, 540);
        let out = tmp.path().join("out").join("preview.jpg");

        let artifact = ImageGenerator::new()
            .generate(&request(src.to_str().unwrap(), out.clone(), 480, 800))
            .unwrap();

        assert_eq!((artifact.width, artifact.height), (480, 270));
        assert_eq!(artifact.path, out);
        assert_eq!(artifact.size_bytes, fs::metadata(&out).unwrap().len());
        let decoded = image::open(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (480, 270));
        assert!(!tmp.path().join("out").join("preview.jpg.tmp").exists());
    }

    #[test]
    fn test_generate_accepts_file_uri_and_keeps_small_sources() {
        let tmp = TempDir::new().unwrap();
        let src = write_source(tmp.path(), "small.png", 64, 32);
        let out = tmp.path().join("small.jpg");
        let uri = format!("file://{}", src.display());

        let artifact = ImageGenerator::new().generate(&request(&uri, out, 480, 800)).unwrap();
        assert_eq!((artifact.width, artifact.height), (64, 32));
    }

    #[test]
    fn test_invalid_locators() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("x.jpg");
        let generator = ImageGenerator::new();
        for source in ["", "   ", "https://example.com/a.png", "/definitely/not/here.png"] {
            let err = generator.generate(&request(source, out.clone(), 480, 800)).unwrap_err();
            assert!(matches!(err, GenerationError::InvalidLocator(_)), "{}: {}", source, err);
        }
        assert!(!out.exists());
    }

    #[test]
    fn test_undecodable_source_leaves_no_output() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("garbage.png");
        fs::write(&src, b"definitely not an image").unwrap();
        let out = tmp.path().join("garbage.jpg");

        let err = ImageGenerator::new()
            .generate(&request(src.to_str().unwrap(), out.clone(), 480, 800))
            .unwrap_err();
        assert!(matches!(err, GenerationError::Decode(_)));
        assert!(!out.exists());
    }

    #[test]
    fn test_placeholder() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("placeholder.jpg");
        let artifact = ImageGenerator::new().placeholder(&out, 48, 80).unwrap();
        assert_eq!((artifact.width, artifact.height), (48, 80));
        let decoded = image::open(&out).unwrap().to_rgb8();
        let px = decoded.get_pixel(24, 40);
        // JPEG is lossy; stay near the fill colour
        assert!(px[0] < 20 && (80..120).contains(&px[1]) && px[2] < 20, "{:?}", px);
    }
}
