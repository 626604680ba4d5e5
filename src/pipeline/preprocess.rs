//! Image normalisation before transmission.
//!
//! Phone photos of sheets routinely arrive at 4000 × 3000 px or more. The
//! model gains nothing past roughly 2 400 px on the long edge, while the
//! request body (base64, +33 %) grows with every pixel. The default
//! preprocessor caps the long edge and keeps the aspect ratio.

use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

/// Turns a raw image into one suitable for sending to the model.
///
/// Implementations must be pure from the pipeline's point of view: same
/// input, same output, no side effects.
pub trait ImagePreprocessor: Send + Sync {
    /// Label used in logs and `Debug` output.
    fn name(&self) -> &'static str;

    fn normalize(&self, image: DynamicImage) -> DynamicImage;
}

/// Leaves the image untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl ImagePreprocessor for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn normalize(&self, image: DynamicImage) -> DynamicImage {
        image
    }
}

/// Downscales oversized photos and optionally drops colour.
#[derive(Debug, Clone, Copy)]
pub struct SheetPreprocessor {
    /// Longest edge in pixels after normalisation. Default: 2400.
    pub max_dimension: u32,
    /// Convert to 8-bit luma. Default: false.
    pub grayscale: bool,
}

impl Default for SheetPreprocessor {
    fn default() -> Self {
        Self {
            max_dimension: 2400,
            grayscale: false,
        }
    }
}

impl SheetPreprocessor {
    pub fn new(max_dimension: u32, grayscale: bool) -> Self {
        Self {
            max_dimension: max_dimension.max(64),
            grayscale,
        }
    }
}

impl ImagePreprocessor for SheetPreprocessor {
    fn name(&self) -> &'static str {
        "sheet"
    }

    fn normalize(&self, image: DynamicImage) -> DynamicImage {
        let (w, h) = (image.width(), image.height());
        let longest = w.max(h);

        let image = if longest > self.max_dimension {
            // `resize` fits within the box and preserves aspect ratio.
            let resized = image.resize(self.max_dimension, self.max_dimension, FilterType::Lanczos3);
            debug!(
                "Downscaled {}x{} → {}x{}",
                w,
                h,
                resized.width(),
                resized.height()
            );
            resized
        } else {
            image
        };

        if self.grayscale {
            DynamicImage::ImageLuma8(image.to_luma8())
        } else {
            image
        }
    }
}
