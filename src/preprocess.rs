use crate::config::ImageSize;
use image::DynamicImage;
use image::imageops::FilterType;
use ndarray::{Array, ArrayD, ArrayViewD, IxDyn};

/// Channel count declared in the model's input shape.
pub const CHANNELS: usize = 3;

/// Bilinear. Changing it changes every downstream score.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

#[derive(thiserror::Error, Debug)]
pub enum PreprocessError {
    #[error("Image processing error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Input tensor shape mismatch: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// `[1, height, width, 3]` f32 tensor handed to the inference engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: ArrayD<f32>,
}

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    /// Flat values in standard (row-major) order.
    pub fn as_slice(&self) -> &[f32] {
        // Built with from_shape_vec, so always contiguous.
        self.data.as_slice().unwrap_or(&[])
    }

    pub fn into_array(self) -> ArrayD<f32> {
        self.data
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    size: ImageSize,
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(ImageSize::default())
    }
}

impl Preprocessor {
    pub fn new(size: ImageSize) -> Self {
        Self { size }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Decodes `raw` (any format the `image` crate recognizes) and packs it
    /// into an [`InputTensor`].
    pub fn preprocess(&self, raw: &[u8]) -> Result<InputTensor, PreprocessError> {
        let image = image::load_from_memory(raw)?;
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            color = ?image.color(),
            "decoded image"
        );
        self.preprocess_image(&image)
    }

    pub fn preprocess_image(&self, image: &DynamicImage) -> Result<InputTensor, PreprocessError> {
        let ImageSize { width, height } = self.size;

        // Always resized, never cropped or padded.
        let resized = image.resize_exact(width as u32, height as u32, RESIZE_FILTER);

        // Runs for single-channel input too; drops alpha and narrows to 8 bits.
        let luma = resized.grayscale().to_luma8();

        // The trained model expects luminance packed into the first
        // width*height slots of an NHWC buffer, leaving the rest zeroed.
        // Keep it that way or predictions drift from the published weights.
        let mut buffer = vec![0.0f32; width * height * CHANNELS];
        for (x, y, pixel) in luma.enumerate_pixels() {
            buffer[y as usize * width + x as usize] = pixel[0] as f32;
        }
        for value in buffer.iter_mut().take(width * height) {
            *value /= 255.0;
        }

        let data = Array::from_shape_vec(IxDyn(&[1, height, width, CHANNELS]), buffer)?;
        Ok(InputTensor { data })
    }
}
