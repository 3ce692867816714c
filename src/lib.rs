use std::{
    fs,
    path::{Path, PathBuf},
};

mod assets;
pub mod classify;
mod error;
mod extract;
pub mod layout_net;
pub mod normalize;
mod oracle;
pub mod preview;
mod progress;
pub mod reading_order;
pub mod render;
mod result;
pub mod util;
pub mod visualize;

use image::DynamicImage;
use tracing::instrument;

pub use assets::{create_run_dir, AssetStore, FsAssetStore};
pub use classify::classify;
pub use error::{AssetError, Error, OracleError, RegionFailure};
pub use extract::{AssetCounters, ContentExtractor, SizeFilter};
pub use layout_net::{ExecutionProvider, LayoutNet, LayoutNetOptions};
pub use normalize::{NormalizerOptions, TextNormalizer};
pub use oracle::{FixedLayout, LayoutDetector, TextRecognizer};
pub use progress::{CancellationToken, ProgressEvent, ProgressSink};
pub use render::{MarkdownRenderer, ReferencePolicy};
pub use result::*;

pub use ort as runtime;

use layout_net::DEFAULT_PROVIDERS;
use progress::Progress;

/// Knobs for a single analysis run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Regions whose top edges are within this many pixels share a row.
    pub row_threshold: i32,
    pub size_filter: SizeFilter,
    pub normalizer: NormalizerOptions,
    pub reference_policy: ReferencePolicy,
    /// Also write `<base>_layout.png` with the detected boxes when exporting.
    pub save_visualization: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            row_threshold: reading_order::DEFAULT_ROW_THRESHOLD,
            size_filter: SizeFilter::default(),
            normalizer: NormalizerOptions::default(),
            reference_policy: ReferencePolicy::default(),
            save_visualization: false,
        }
    }
}

pub struct DocLayoutBuilder {
    threads: usize,
    layout_path: Option<PathBuf>,
    layout_options: LayoutNetOptions,
    cache_path: Option<PathBuf>,
    execution_providers: Vec<ExecutionProvider>,
    detector: Option<Box<dyn LayoutDetector>>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    output_root: Option<PathBuf>,
    options: PipelineOptions,
}

impl DocLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// ONNX DocLayout-YOLO model used when no detector is supplied.
    pub fn layout_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.layout_path = Some(path.into());
        self
    }

    pub fn layout_options(mut self, options: LayoutNetOptions) -> Self {
        self.layout_options = options;
        self
    }

    /// Uses `detector` instead of loading the ONNX layout model.
    pub fn detector(mut self, detector: impl LayoutDetector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn recognizer(mut self, recognizer: impl TextRecognizer + 'static) -> Self {
        self.recognizer = Some(Box::new(recognizer));
        self
    }

    /// Directory that receives one `DocLayout_<timestamp>` folder per run.
    pub fn output_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_root = Some(path.into());
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_engine_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_execution_providers(
        mut self,
        providers: impl IntoIterator<Item = ExecutionProvider>,
    ) -> Self {
        self.execution_providers = providers.into_iter().collect();
        self
    }

    #[instrument(skip(self), level = "debug")]
    fn init_detector(&mut self) -> Result<Box<dyn LayoutDetector>, Error> {
        if let Some(detector) = self.detector.take() {
            return Ok(detector);
        }
        let path = self
            .layout_path
            .take()
            .unwrap_or_else(|| "models/doclayout_yolo_docstructbench_imgsz1024.onnx".into());
        let layout_net = LayoutNet::init(
            path,
            self.threads,
            self.layout_options,
            &self.execution_providers,
            self.cache_path.clone(),
        )
        .map_err(|err| Error::OracleInit(err.into()))?;
        Ok(Box::new(layout_net))
    }

    #[instrument(skip(self))]
    pub fn build(mut self) -> Result<DocLayout, Error> {
        let recognizer = self.recognizer.take().ok_or_else(|| {
            Error::OracleInit(OracleError::Init("no text recognizer configured".into()))
        })?;
        let detector = self.init_detector()?;
        Ok(DocLayout {
            detector,
            recognizer,
            output_root: self.output_root.unwrap_or_else(std::env::temp_dir),
            options: self.options,
        })
    }
}

impl Default for DocLayoutBuilder {
    fn default() -> Self {
        Self {
            threads: 4,
            layout_path: None,
            layout_options: LayoutNetOptions::default(),
            cache_path: None,
            execution_providers: DEFAULT_PROVIDERS.to_vec(),
            detector: None,
            recognizer: None,
            output_root: None,
            options: PipelineOptions::default(),
        }
    }
}

/// Files written by [`DocLayout::analyze_and_export`].
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub document: Document,
    pub output_dir: PathBuf,
    pub markdown_path: PathBuf,
    pub html_path: PathBuf,
    pub visualization_path: Option<PathBuf>,
    pub figure_count: usize,
    pub table_count: usize,
    pub total_regions: usize,
}

/// Turns page images into Markdown using an injected layout detector and
/// text recognizer.
pub struct DocLayout {
    detector: Box<dyn LayoutDetector>,
    recognizer: Box<dyn TextRecognizer>,
    output_root: PathBuf,
    options: PipelineOptions,
}

impl DocLayout {
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn set_options(&mut self, options: PipelineOptions) {
        self.options = options;
    }

    /// Detects, extracts and renders one page. Assets land in a fresh run
    /// directory under the output root, created only if something is stored.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn analyze(
        &mut self,
        image: &DynamicImage,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome<Document>, Error> {
        let mut store = FsAssetStore::new(&self.output_root);
        let mut progress = Progress::new(progress);
        let outcome = self.run(image, &mut store, &mut progress, cancel)?;
        Ok(outcome.map(|mut document| {
            document.output_dir = store.existing_run_dir().map(Path::to_path_buf);
            progress.report("Analysis complete", 100);
            document
        }))
    }

    /// Like [`DocLayout::analyze`], then writes `<base>.md` and `<base>.html`
    /// (and optionally `<base>_layout.png`) next to the assets.
    #[instrument(skip(self, image, progress, cancel))]
    pub fn analyze_and_export(
        &mut self,
        image: &DynamicImage,
        base_name: &str,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome<ExportResult>, Error> {
        let mut store = FsAssetStore::new(&self.output_root);
        let mut progress = Progress::new(progress);
        let mut document = match self.run(image, &mut store, &mut progress, cancel)? {
            RunOutcome::Completed(document) => document,
            RunOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
        };

        let output_dir = store
            .run_dir()
            .map_err(|source| Error::OutputDir {
                path: self.output_root.clone(),
                source,
            })?
            .to_path_buf();
        document.output_dir = Some(output_dir.clone());

        let markdown_path = output_dir.join(format!("{base_name}.md"));
        write(&markdown_path, &document.markdown)?;
        let html_path = output_dir.join(format!("{base_name}.html"));
        write(&html_path, &document.html())?;

        let visualization_path = if self.options.save_visualization {
            let path = output_dir.join(format!("{base_name}_layout.png"));
            let regions = document
                .blocks
                .iter()
                .map(|block| block.region.clone())
                .collect::<Vec<_>>();
            visualize::draw_layout(image, &regions).save(&path)?;
            Some(path)
        } else {
            None
        };
        progress.report("Export complete", 100);
        log::debug!("Exported {} to {}", base_name, output_dir.display());

        Ok(RunOutcome::Completed(ExportResult {
            figure_count: document.figure_count(),
            table_count: document.table_count(),
            total_regions: document.blocks.len(),
            document,
            output_dir,
            markdown_path,
            html_path,
            visualization_path,
        }))
    }

    /// Runs everything after detection on a snapshot that is already known.
    #[instrument(skip_all, fields(regions = snapshot.regions.len()))]
    pub fn process(
        &mut self,
        image: &DynamicImage,
        snapshot: LayoutSnapshot,
        store: &mut dyn AssetStore,
        progress: &mut dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunOutcome<Document> {
        let mut progress = Progress::new(progress);
        self.extract_and_render(image, snapshot, store, &mut progress, cancel)
    }

    fn run(
        &mut self,
        image: &DynamicImage,
        store: &mut dyn AssetStore,
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome<Document>, Error> {
        progress.report("Detecting layout", 5);
        if cancel.is_cancelled() {
            return Ok(RunOutcome::Cancelled);
        }
        let snapshot = self.detector.detect(image).map_err(Error::Detection)?;
        log::debug!(
            "Detected {} regions in {:?}",
            snapshot.regions.len(),
            snapshot.detection_time
        );
        progress.report(format!("Detected {} regions", snapshot.regions.len()), 20);
        Ok(self.extract_and_render(image, snapshot, store, progress, cancel))
    }

    fn extract_and_render(
        &mut self,
        image: &DynamicImage,
        snapshot: LayoutSnapshot,
        store: &mut dyn AssetStore,
        progress: &mut Progress,
        cancel: &CancellationToken,
    ) -> RunOutcome<Document> {
        let options = self.options;
        let LayoutSnapshot {
            regions,
            detection_time,
            ..
        } = snapshot;

        let classified = regions
            .into_iter()
            .map(|region| Classified {
                category: classify(&region.label),
                region,
            })
            .collect::<Vec<_>>();
        let ordered = reading_order::sequence(classified, options.row_threshold);

        progress.report("Recognizing content", 60);
        let mut extractor = ContentExtractor::new(
            image,
            self.recognizer.as_mut(),
            store,
            TextNormalizer::new(options.normalizer),
            options.size_filter,
        );
        let mut blocks = Vec::with_capacity(ordered.len());
        let mut stored = 0;
        for item in ordered {
            if cancel.is_cancelled() {
                log::debug!("Run cancelled after {} regions", blocks.len());
                return RunOutcome::Cancelled;
            }
            let outcome = extractor.extract(&item.region, item.category);
            match &outcome {
                Ok(Content {
                    asset: Some(asset), ..
                }) => {
                    stored += 1;
                    progress.report(
                        format!("Saved {:?} {}", asset.kind, asset.number),
                        (60 + 2 * stored).min(89),
                    );
                }
                Ok(_) => {}
                Err(failure) => log::warn!("Region {:?} failed: {failure}", item.region.label),
            }
            blocks.push(Block::resolve(item, outcome));
        }
        let counters = extractor.counters();
        log::debug!(
            "Stored {} figures and {} tables",
            counters.figures,
            counters.tables
        );
        progress.report("Rendering markdown", 90);

        let markdown = MarkdownRenderer::new(options.reference_policy).render(&blocks);
        let assets = blocks
            .iter()
            .filter_map(|block| block.asset.clone())
            .collect();
        progress.report("Markdown ready", 95);

        RunOutcome::Completed(Document {
            blocks,
            assets,
            markdown,
            detection_time,
            output_dir: None,
        })
    }
}

fn write(path: &Path, contents: &str) -> Result<(), Error> {
    fs::write(path, contents).map_err(|source| Error::Export {
        path: path.to_path_buf(),
        source,
    })
}
