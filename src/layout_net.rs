use std::{path::PathBuf, time::Instant};

use float_ord::FloatOrd;
use geo::{coord, Rect};
use image::DynamicImage;
use ndarray::{ArrayView2, ArrayViewD, Ix3};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::{
    error::OracleError,
    oracle::LayoutDetector,
    util::{iou, letterbox_tensor, Letterbox},
    LayoutSnapshot, Point, Region,
};

/// Class names of the DocStructBench DocLayout-YOLO model, by class id.
pub const DOCLAYOUT_CLASSES: [&str; 10] = [
    "title",
    "plain text",
    "abandon",
    "figure",
    "figure_caption",
    "table",
    "table_caption",
    "table_footnote",
    "isolate_formula",
    "formula_caption",
];

/// `x1, y1, x2, y2, score, class` per detection.
const FEATURES: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct LayoutNetOptions {
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

impl Default for LayoutNetOptions {
    fn default() -> Self {
        Self {
            input_size: 1024,
            score_threshold: 0.1,
            iou_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

pub(crate) const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, input_size: u32) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(format!("images:1x3x{input_size}x{input_size}"))
        .with_profile_max_shapes(format!("images:1x3x{input_size}x{input_size}"))
        .with_profile_opt_shapes(format!("images:1x3x{input_size}x{input_size}"))
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

/// DocLayout-YOLO layout detector running on ONNX Runtime.
pub struct LayoutNet {
    session: Session,
    options: LayoutNetOptions,
}

impl LayoutNet {
    #[instrument(level = "debug")]
    pub fn init(
        path: PathBuf,
        num_threads: usize,
        options: LayoutNetOptions,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<PathBuf>,
    ) -> ort::Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let execution_providers = execution_providers.iter().filter_map(
            |provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => Some(setup_tensorrt(
                        cache_path.clone().unwrap_or_else(|| {
                            path.parent()
                                .map(|dir| dir.join(".cache"))
                                .unwrap_or_else(|| PathBuf::from(".cache"))
                        }),
                        options.input_size,
                    )),
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            },
        );
        #[cfg(not(feature = "tensorrt"))]
        let _ = &cache_path;

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("Layout session inputs: {:?}", session.inputs);
        log::debug!("Layout session outputs: {:?}", session.outputs);

        Ok(Self { session, options })
    }

    #[instrument(level = "debug", skip(self, image))]
    pub fn get_layout_regions(&self, image: &DynamicImage) -> Result<Vec<Region>, OracleError> {
        let (input, letterbox) = letterbox_tensor(image, self.options.input_size);
        let outputs = self.session.run(inputs!["images" => input]?)?;
        let (_, output) = outputs
            .first_key_value()
            .ok_or_else(|| OracleError::InvalidOutput("model produced no outputs".into()))?;
        let output = output.try_extract_tensor::<f32>()?;
        let detections = detection_rows(output)?;

        let boxes = decode(detections, &letterbox, self.options.score_threshold);
        let kept = non_max_suppression(boxes, self.options.iou_threshold);
        log::debug!("{} layout regions after NMS", kept.len());
        Ok(kept.into_iter().map(LayoutBox::into_region).collect())
    }
}

impl LayoutDetector for LayoutNet {
    fn detect(&mut self, image: &DynamicImage) -> Result<LayoutSnapshot, OracleError> {
        let start = Instant::now();
        let regions = self.get_layout_regions(image)?;
        Ok(LayoutSnapshot {
            regions,
            image_width: image.width(),
            image_height: image.height(),
            detection_time: start.elapsed(),
        })
    }
}

/// A decoded detection in source image coordinates.
#[derive(Debug, Clone, PartialEq)]
struct LayoutBox {
    rect: Rect<f32>,
    score: f32,
    class_id: usize,
}

impl LayoutBox {
    fn into_region(self) -> Region {
        let (min, max) = (self.rect.min(), self.rect.max());
        let (x1, y1, x2, y2) = (min.x as i32, min.y as i32, max.x as i32, max.y as i32);
        Region::new(
            vec![
                Point::new(x1, y1),
                Point::new(x2, y1),
                Point::new(x2, y2),
                Point::new(x1, y2),
            ],
            self.score,
            DOCLAYOUT_CLASSES[self.class_id],
        )
    }
}

/// Reshapes the `[1, N, 6]` model output into `N` rows.
fn detection_rows(output: ArrayViewD<'_, f32>) -> Result<ArrayView2<'_, f32>, OracleError> {
    let shape = output.shape().to_vec();
    let output = output
        .into_dimensionality::<Ix3>()
        .map_err(|_| OracleError::InvalidOutput(format!("expected 3 dimensions, got {shape:?}")))?;
    if output.len_of(ndarray::Axis(2)) < FEATURES {
        return Err(OracleError::InvalidOutput(format!(
            "expected {FEATURES} features per detection, got {shape:?}"
        )));
    }
    Ok(output.index_axis_move(ndarray::Axis(0), 0))
}

#[instrument(level = "trace", skip(rows, letterbox))]
fn decode(rows: ArrayView2<f32>, letterbox: &Letterbox, score_threshold: f32) -> Vec<LayoutBox> {
    rows.outer_iter()
        .filter_map(|row| {
            let score = row[4];
            let class = row[5];
            if score < score_threshold || class < 0.0 || class as usize >= DOCLAYOUT_CLASSES.len() {
                log::trace!("Skipping detection with score {score} and class {class}");
                return None;
            }
            let (x1, y1) = letterbox.unmap(row[0], row[1]);
            let (x2, y2) = letterbox.unmap(row[2], row[3]);
            if x2 <= x1 || y2 <= y1 {
                return None;
            }
            Some(LayoutBox {
                rect: Rect::new(coord! { x: x1, y: y1 }, coord! { x: x2, y: y2 }),
                score,
                class_id: class as usize,
            })
        })
        .collect()
}

/// Per-class greedy NMS: within each class, keeps the highest scoring box and
/// drops any later box overlapping it by more than `iou_threshold`.
fn non_max_suppression(mut boxes: Vec<LayoutBox>, iou_threshold: f32) -> Vec<LayoutBox> {
    boxes.sort_by_key(|b| (b.class_id, std::cmp::Reverse(FloatOrd(b.score))));
    let mut kept: Vec<LayoutBox> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let suppressed = kept.iter().any(|existing| {
            existing.class_id == candidate.class_id
                && iou(&existing.rect, &candidate.rect) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use ndarray::{arr2, Array3};

    use super::*;

    fn identity() -> Letterbox {
        Letterbox::new(1024, 1024, 1024)
    }

    #[test]
    fn decode_filters_scores_and_classes() {
        let rows = arr2(&[
            [10.0, 20.0, 110.0, 220.0, 0.9, 0.0],
            [10.0, 20.0, 110.0, 220.0, 0.05, 3.0],
            [10.0, 20.0, 110.0, 220.0, 0.9, 12.0],
            [50.0, 50.0, 40.0, 60.0, 0.9, 3.0],
        ]);
        let boxes = decode(rows.view(), &identity(), 0.1);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 0);
        assert_eq!(boxes[0].rect.min(), coord! { x: 10.0, y: 20.0 });
    }

    #[test]
    fn decode_undoes_letterbox() {
        let letterbox = Letterbox::new(2048, 1024, 1024);
        let rows = arr2(&[[0.0, 256.0, 512.0, 512.0, 0.8, 3.0]]);
        let boxes = decode(rows.view(), &letterbox, 0.1);
        assert_eq!(
            boxes[0].rect,
            Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1024.0, y: 512.0 })
        );
    }

    #[test]
    fn nms_is_per_class() {
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 100.0, y: 100.0 });
        let shifted = Rect::new(coord! { x: 5.0, y: 0.0 }, coord! { x: 105.0, y: 100.0 });
        let far = Rect::new(coord! { x: 500.0, y: 0.0 }, coord! { x: 600.0, y: 100.0 });
        let boxes = vec![
            LayoutBox { rect: shifted, score: 0.5, class_id: 1 },
            LayoutBox { rect, score: 0.9, class_id: 1 },
            LayoutBox { rect, score: 0.7, class_id: 3 },
            LayoutBox { rect: far, score: 0.3, class_id: 1 },
        ];
        let kept = non_max_suppression(boxes, 0.4);
        let summary = kept
            .iter()
            .map(|b| (b.class_id, b.score))
            .collect::<Vec<_>>();
        assert_eq!(summary, [(1, 0.9), (1, 0.3), (3, 0.7)]);
    }

    #[test]
    fn regions_use_class_names() {
        let region = LayoutBox {
            rect: Rect::new(coord! { x: 1.5, y: 2.0 }, coord! { x: 30.9, y: 40.0 }),
            score: 0.6,
            class_id: 4,
        }
        .into_region();
        assert_eq!(region.label, "figure_caption");
        assert_eq!(region.polygon[0], Point::new(1, 2));
        assert_eq!(region.polygon[2], Point::new(30, 40));
    }

    #[test]
    fn output_shape_is_validated() {
        let output = Array3::<f32>::zeros((1, 3, 6)).into_dyn();
        assert_eq!(detection_rows(output.view()).unwrap().dim(), (3, 6));

        let flat = Array3::<f32>::zeros((1, 3, 4)).into_dyn();
        assert!(matches!(
            detection_rows(flat.view()),
            Err(OracleError::InvalidOutput(_))
        ));
        let two_d = ndarray::Array2::<f32>::zeros((3, 6)).into_dyn();
        assert!(detection_rows(two_d.view()).is_err());
    }
}
