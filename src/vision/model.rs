//! OCR model seam
//!
//! The meter recognition model is an external collaborator. The pipeline only
//! depends on [`OcrModel`]; [`OnnxMeterModel`] is the ONNX Runtime backend
//! used by the binary.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info};

use super::preprocess::{to_input_tensor, NormalizedImage};

/// Output of one model execution
#[derive(Debug, Clone)]
pub struct ModelExecutionResult {
    /// Input image with the model's findings drawn on it
    pub annotated_image: RgbImage,
    /// Recognized reading, `None` when nothing was detected
    pub reading: Option<String>,
    /// Raw model output (logits), kept for diagnostics
    pub raw_output: Vec<f32>,
}

/// External OCR model entry point.
///
/// Synchronous from the caller's point of view; implementations may return an
/// error or panic on internal failure.
pub trait OcrModel: Send {
    /// Run the model on one normalized image
    fn execute(&mut self, image: &NormalizedImage) -> Result<ModelExecutionResult>;
}

/// Settings for the ONNX meter model
#[derive(Debug, Clone)]
pub struct OnnxModelConfig {
    /// Characters the model can emit, in class order after the blank
    pub charset: String,
    /// Index of the CTC blank class
    pub blank_index: usize,
    /// Number of intra-op threads
    pub intra_threads: usize,
}

impl Default for OnnxModelConfig {
    fn default() -> Self {
        Self {
            charset: "0123456789".to_string(),
            blank_index: 0,
            intra_threads: 2,
        }
    }
}

/// Meter reading recognizer running an exported model through ONNX Runtime.
///
/// Expects an NHWC `[1, 320, 320, 3]` float input and a `[1, T, C]` class
/// score output that is greedy CTC decoded into digits.
pub struct OnnxMeterModel {
    session: Session,
    input_name: String,
    config: OnnxModelConfig,
}

impl OnnxMeterModel {
    /// Load a model file
    pub fn load(model_path: &Path, config: OnnxModelConfig) -> Result<Self> {
        info!("Loading ONNX meter model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model has no inputs")?;

        info!(
            "Model loaded. Input: {}, outputs: {:?}",
            input_name,
            session.outputs.iter().map(|o| o.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            session,
            input_name,
            config,
        })
    }
}

impl OcrModel for OnnxMeterModel {
    fn execute(&mut self, image: &NormalizedImage) -> Result<ModelExecutionResult> {
        let input = to_input_tensor(image);
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_array((shape, data))?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;
        let (output_shape, logits) = outputs[0].try_extract_tensor::<f32>()?;

        if output_shape.len() != 3 {
            anyhow::bail!("Unexpected output rank {} (expected [1, T, C])", output_shape.len());
        }
        let timesteps = output_shape[1] as usize;
        let classes = output_shape[2] as usize;
        let raw_output = logits.to_vec();

        let reading = ctc_greedy_decode(
            &raw_output,
            timesteps,
            classes,
            self.config.blank_index,
            &self.config.charset,
        );
        debug!("Decoded reading {:?} from {} timesteps", reading, timesteps);

        Ok(ModelExecutionResult {
            annotated_image: annotate(image, reading.is_some()),
            reading,
            raw_output,
        })
    }
}

/// Greedy CTC decoding: argmax per timestep, collapse repeats, drop blanks.
///
/// Class `i` maps to `charset[i - 1]` when the blank is class 0, otherwise to
/// `charset[i]` with the blank skipped. Returns `None` for an empty decode.
pub fn ctc_greedy_decode(
    logits: &[f32],
    timesteps: usize,
    classes: usize,
    blank_index: usize,
    charset: &str,
) -> Option<String> {
    let chars: Vec<char> = charset.chars().collect();
    let mut text = String::new();
    let mut previous: Option<usize> = None;

    for t in 0..timesteps {
        let start = t * classes;
        let Some(row) = logits.get(start..start + classes) else {
            break;
        };

        let best = row
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);

        if best != previous {
            if let Some(class) = best.filter(|&c| c != blank_index) {
                let char_index = if class > blank_index { class - 1 } else { class };
                if let Some(&ch) = chars.get(char_index) {
                    text.push(ch);
                }
            }
        }
        previous = best;
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Draw a frame around the image: green when a reading was found, red otherwise
fn annotate(image: &NormalizedImage, found: bool) -> RgbImage {
    let mut annotated = image.pixels().clone();
    let (width, height) = annotated.dimensions();
    let colour = if found { Rgb([0, 200, 0]) } else { Rgb([220, 0, 0]) };

    for inset in 0..3u32 {
        if width <= inset * 2 || height <= inset * 2 {
            break;
        }
        let rect =
            Rect::at(inset as i32, inset as i32).of_size(width - inset * 2, height - inset * 2);
        draw_hollow_rect_mut(&mut annotated, rect, colour);
    }

    annotated
}
