use std::{env, path::PathBuf, time::Instant};

use doclayout::{
    CancellationToken, DocLayoutBuilder, OracleError, PipelineOptions, ProgressEvent, Recognition,
};
use image::DynamicImage;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

fn main() {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let image_path = PathBuf::from(args.next().unwrap_or_else(|| "tests/data/page.png".into()));
    let model_path = args
        .next()
        .unwrap_or_else(|| "models/doclayout_yolo_docstructbench_imgsz1024.onnx".into());

    let image = image::open(&image_path).expect("Failed to load page image");
    let cache = PathBuf::from(".cache");
    std::fs::create_dir_all(&cache).expect("Failed to create cache dir");

    // Layout only: regions that need text come out empty.
    let recognizer =
        |_: &DynamicImage| -> Result<Recognition, OracleError> { Ok(Recognition::default()) };
    let mut engine = DocLayoutBuilder::new()
        .layout_model(model_path)
        .recognizer(recognizer)
        .with_engine_cache_path(cache)
        .output_root("output")
        .options(PipelineOptions {
            save_visualization: true,
            ..Default::default()
        })
        .build()
        .expect("Failed to build engine");

    let base_name = image_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "page".into());
    let mut progress = |event: ProgressEvent| log::info!("[{:>3}%] {}", event.percent, event.message);
    let start = Instant::now();
    let export = engine
        .analyze_and_export(&image, &base_name, &mut progress, &CancellationToken::new())
        .expect("Failed layout analysis")
        .completed()
        .expect("Run was cancelled");
    log::debug!("{:?}", start.elapsed());

    println!(
        "{} regions, {} figures, {} tables -> {}",
        export.total_regions,
        export.figure_count,
        export.table_count,
        export.markdown_path.display()
    );
}
