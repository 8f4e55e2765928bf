//! Photo normalization before storage.
//!
//! Every accepted photo is decoded, downscaled when it is wider than the
//! configured maximum (aspect ratio preserved), and re-encoded as JPEG at a
//! fixed quality so stored assets have a bounded size and a single format.

use crate::config::NormalizerConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

/// Content type of every normalized image
pub const OUTPUT_CONTENT_TYPE: &str = "image/jpeg";

/// Canonical extension of every normalized image
pub const OUTPUT_EXTENSION: &str = "jpg";

/// Errors that can occur while normalizing a single photo.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),

    #[error("Could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Could not encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// A photo ready for upload
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Encoded JPEG bytes
    pub bytes: Vec<u8>,
    /// Width after normalization
    pub width: u32,
    /// Height after normalization
    pub height: u32,
    /// Width of the decoded input
    pub original_width: u32,
    /// Height of the decoded input
    pub original_height: u32,
}

impl NormalizedImage {
    pub fn was_resized(&self) -> bool {
        self.width != self.original_width || self.height != self.original_height
    }
}

/// Decodes, bounds and re-encodes photos.
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    config: NormalizerConfig,
    allowed_extensions: Vec<String>,
}

impl ImageNormalizer {
    pub fn new(config: NormalizerConfig, allowed_extensions: &[String]) -> Self {
        Self {
            config,
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Return the lower-cased extension of `filename` if it is allow-listed
    pub fn check_extension(&self, filename: &str) -> Result<String, NormalizeError> {
        let ext = file_extension(filename)
            .ok_or_else(|| NormalizeError::UnsupportedExtension(filename.to_string()))?;

        if self.allowed_extensions.iter().any(|allowed| *allowed == ext) {
            Ok(ext)
        } else {
            Err(NormalizeError::UnsupportedExtension(ext))
        }
    }

    /// Decode, downscale if needed and re-encode as JPEG
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage, NormalizeError> {
        let image = image::load_from_memory(bytes).map_err(NormalizeError::Decode)?;
        let (original_width, original_height) = (image.width(), image.height());

        let image = if self.config.resize && original_width > self.config.max_width {
            let (width, height) =
                target_dimensions(original_width, original_height, self.config.max_width);
            debug!(
                original_width,
                original_height,
                width,
                height,
                "Downscaling photo"
            );
            image.resize_exact(width, height, FilterType::Lanczos3)
        } else {
            image
        };

        let bytes = encode_jpeg(&image, self.config.output_quality)?;

        Ok(NormalizedImage {
            bytes,
            width: image.width(),
            height: image.height(),
            original_width,
            original_height,
        })
    }
}

/// Output size for an image of `width` x `height` bounded to `max_width`
pub fn target_dimensions(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width {
        return (width, height);
    }

    let scaled = (f64::from(height) * f64::from(max_width) / f64::from(width)).round();
    (max_width, (scaled as u32).max(1))
}

/// Lower-cased text after the last `.` of a filename
pub fn file_extension(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || ext.contains(['/', '\\']) {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Map extension aliases onto one spelling (`jpeg` -> `jpg`)
pub fn canonical_extension(ext: &str) -> String {
    match ext.to_lowercase().as_str() {
        "jpeg" | "jpe" | "jfif" => "jpg".to_string(),
        other => other.to_string(),
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, NormalizeError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder).map_err(NormalizeError::Encode)?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::PngEncoder;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        let mut buffer = Vec::new();
        img.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, 90))
            .unwrap();
        buffer
    }

    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 200])
        });
        let mut buffer = Vec::new();
        img.write_with_encoder(PngEncoder::new(&mut buffer)).unwrap();
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::test_images::{jpeg, png};
    use super::*;

    fn normalizer() -> ImageNormalizer {
        ImageNormalizer::new(
            NormalizerConfig::default(),
            &["jpg".to_string(), "jpeg".to_string(), "png".to_string()],
        )
    }

    #[test]
    fn test_target_dimensions() {
        assert_eq!(target_dimensions(2000, 1500, 1280), (1280, 960));
        assert_eq!(target_dimensions(2000, 1333, 1280), (1280, 853));
        assert_eq!(target_dimensions(3000, 1001, 1280), (1280, 427));
        assert_eq!(target_dimensions(1280, 720, 1280), (1280, 720));
        assert_eq!(target_dimensions(640, 480, 1280), (640, 480));
        assert_eq!(target_dimensions(100_000, 10, 1280), (1280, 1));
    }

    #[test]
    fn test_downscales_wide_jpeg() {
        let normalized = normalizer().normalize(&jpeg(2000, 1500)).unwrap();
        assert_eq!((normalized.width, normalized.height), (1280, 960));
        assert_eq!((normalized.original_width, normalized.original_height), (2000, 1500));
        assert!(normalized.was_resized());

        let decoded = image::load_from_memory(&normalized.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 960));
    }

    #[test]
    fn test_leaves_small_image_dimensions() {
        let normalized = normalizer().normalize(&jpeg(800, 600)).unwrap();
        assert_eq!((normalized.width, normalized.height), (800, 600));
        assert!(!normalized.was_resized());
    }

    #[test]
    fn test_png_is_reencoded_as_jpeg() {
        let normalized = normalizer().normalize(&png(1500, 300)).unwrap();
        assert_eq!((normalized.width, normalized.height), (1280, 256));
        assert_eq!(
            image::guess_format(&normalized.bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_normalization_is_stable() {
        let n = normalizer();
        let first = n.normalize(&jpeg(2400, 1800)).unwrap();
        let second = n.normalize(&first.bytes).unwrap();
        assert_eq!((second.width, second.height), (first.width, first.height));
        assert!(!second.was_resized());
        assert_eq!(
            image::guess_format(&second.bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn test_resize_disabled() {
        let n = ImageNormalizer::new(
            NormalizerConfig {
                resize: false,
                ..NormalizerConfig::default()
            },
            &["jpg".to_string()],
        );
        let normalized = n.normalize(&jpeg(1600, 100)).unwrap();
        assert_eq!(normalized.width, 1600);
    }

    #[test]
    fn test_corrupt_bytes_fail_to_decode() {
        let result = normalizer().normalize(b"definitely not a photo");
        assert!(matches!(result, Err(NormalizeError::Decode(_))));
    }

    #[test]
    fn test_check_extension() {
        let n = normalizer();
        assert_eq!(n.check_extension("floor.JPG").unwrap(), "jpg");
        assert_eq!(n.check_extension("tiles.final.jpeg").unwrap(), "jpeg");
        assert_eq!(n.check_extension("mat.png").unwrap(), "png");
        assert!(matches!(
            n.check_extension("carpet.gif"),
            Err(NormalizeError::UnsupportedExtension(ext)) if ext == "gif"
        ));
        assert!(n.check_extension("no_extension").is_err());
        assert!(n.check_extension("trailing.").is_err());
    }

    #[test]
    fn test_jpeg_only_configuration() {
        let n = ImageNormalizer::new(NormalizerConfig::default(), &[".JPG".to_string()]);
        assert!(n.check_extension("a.jpg").is_ok());
        assert!(n.check_extension("a.png").is_err());
    }

    #[test]
    fn test_canonical_extension() {
        assert_eq!(canonical_extension("jpeg"), "jpg");
        assert_eq!(canonical_extension("JPG"), "jpg");
        assert_eq!(canonical_extension("png"), "png");
    }
}
