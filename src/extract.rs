use image::DynamicImage;
use tracing::instrument;

use crate::{
    assets::AssetStore, error::RegionFailure, normalize::TextNormalizer, oracle::TextRecognizer,
    util::crop, AssetKind, AssetReference, Category, Content, ExtractionState, Region,
};

/// Size limits used to tell real content from detector noise.
#[derive(Debug, Clone, Copy)]
pub struct SizeFilter {
    /// Smallest figure side in pixels.
    pub figure_min_side: i32,
    /// Smallest figure side as a fraction of the image side.
    pub figure_min_fraction: f32,
    /// Tables must be strictly larger than this on both sides.
    pub table_min_side: i32,
    /// Text regions must be strictly larger than this to be recognized.
    pub recognize_min_side: i32,
}

impl Default for SizeFilter {
    fn default() -> Self {
        Self {
            figure_min_side: 30,
            figure_min_fraction: 0.05,
            table_min_side: 10,
            recognize_min_side: 10,
        }
    }
}

impl SizeFilter {
    /// Minimum (width, height) of a figure in an image of the given size.
    pub fn figure_floor(&self, width: u32, height: u32) -> (i32, i32) {
        (
            self.figure_min_side.max((width as f32 * self.figure_min_fraction) as i32),
            self.figure_min_side.max((height as f32 * self.figure_min_fraction) as i32),
        )
    }
}

/// Figures and tables stored so far in one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetCounters {
    pub figures: u32,
    pub tables: u32,
}

impl AssetCounters {
    fn next(&mut self, kind: AssetKind) -> u32 {
        let counter = match kind {
            AssetKind::Figure => &mut self.figures,
            AssetKind::Table => &mut self.tables,
        };
        *counter += 1;
        *counter
    }
}

/// Per-run content extraction: crops figures and tables into the asset store
/// and sends everything else through the recognizer.
pub struct ContentExtractor<'a> {
    image: &'a DynamicImage,
    recognizer: &'a mut dyn TextRecognizer,
    store: &'a mut dyn AssetStore,
    normalizer: TextNormalizer,
    filter: SizeFilter,
    counters: AssetCounters,
}

impl<'a> ContentExtractor<'a> {
    pub fn new(
        image: &'a DynamicImage,
        recognizer: &'a mut dyn TextRecognizer,
        store: &'a mut dyn AssetStore,
        normalizer: TextNormalizer,
        filter: SizeFilter,
    ) -> Self {
        Self {
            image,
            recognizer,
            store,
            normalizer,
            filter,
            counters: AssetCounters::default(),
        }
    }

    pub fn counters(&self) -> AssetCounters {
        self.counters
    }

    #[instrument(level = "debug", skip(self, region), fields(label = %region.label))]
    pub fn extract(&mut self, region: &Region, category: Category) -> Result<Content, RegionFailure> {
        let rect = region.safe_rect(self.image.width(), self.image.height())?;
        let (width, height) = (rect.width(), rect.height());

        let Some(kind) = category.asset_kind() else {
            return self.recognize(region, category, &rect);
        };

        let (min_width, min_height) = match kind {
            AssetKind::Figure => self.filter.figure_floor(self.image.width(), self.image.height()),
            AssetKind::Table => (self.filter.table_min_side + 1, self.filter.table_min_side + 1),
        };
        if width < min_width || height < min_height {
            log::debug!(
                "{kind:?} of {width}x{height} is below {min_width}x{min_height}, treating as text"
            );
            return Ok(Content {
                category: Category::Text,
                text: String::new(),
                asset: None,
                state: ExtractionState::Reclassified,
            });
        }

        let part = crop(self.image, &rect)?;
        let number = self.counters.next(kind);
        let path = match self.store.store(kind, number, &part) {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("Failed to save {kind:?} {number}: {err}");
                None
            }
        };
        Ok(Content {
            category,
            text: String::new(),
            asset: Some(AssetReference {
                kind,
                number,
                path,
                origin: region.clone(),
            }),
            state: ExtractionState::Stored,
        })
    }

    fn recognize(
        &mut self,
        region: &Region,
        category: Category,
        rect: &geo::Rect<i32>,
    ) -> Result<Content, RegionFailure> {
        let floor = self.filter.recognize_min_side;
        if rect.width() <= floor || rect.height() <= floor {
            return Ok(Content {
                category,
                text: region.text.clone(),
                asset: None,
                state: ExtractionState::PassThrough,
            });
        }

        let part = crop(self.image, rect)?;
        let recognition = self
            .recognizer
            .recognize(&part)
            .map_err(|err| RegionFailure::Recognition(err.to_string()))?;
        log::trace!(
            "Recognized {} chars in {:?}",
            recognition.text.chars().count(),
            recognition.timing
        );
        Ok(Content {
            category,
            text: self.normalizer.normalize(recognition.text.trim()),
            asset: None,
            state: ExtractionState::Recognized,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use image::RgbImage;

    use super::*;
    use crate::{
        error::{AssetError, OracleError},
        Recognition,
    };

    #[derive(Default)]
    struct MemoryStore {
        saved: Vec<(AssetKind, u32, u32, u32)>,
        fail: bool,
    }

    impl AssetStore for MemoryStore {
        fn store(
            &mut self,
            kind: AssetKind,
            number: u32,
            image: &DynamicImage,
        ) -> Result<PathBuf, AssetError> {
            let path = PathBuf::from(format!("/assets/{}_{number}.png", kind.file_prefix()));
            if self.fail {
                return Err(AssetError::Io {
                    path,
                    source: std::io::Error::other("disk full"),
                });
            }
            self.saved.push((kind, number, image.width(), image.height()));
            Ok(path)
        }
    }

    fn page() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::new(1000, 1000))
    }

    fn echo(text: &'static str) -> impl FnMut(&DynamicImage) -> Result<Recognition, OracleError> {
        move |_: &DynamicImage| -> Result<Recognition, OracleError> {
            Ok(Recognition {
                text: text.to_string(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn figure_is_stored_without_recognition() {
        let image = page();
        let mut calls = 0;
        let mut recognizer = |_: &DynamicImage| -> Result<Recognition, OracleError> {
            calls += 1;
            Ok(Recognition::default())
        };
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let region = Region::from_box(100, 100, 200, 200, "figure");
        let content = extractor.extract(&region, Category::Figure).unwrap();
        assert_eq!(content.category, Category::Figure);
        assert_eq!(content.state, ExtractionState::Stored);
        let asset = content.asset.unwrap();
        assert_eq!(asset.number, 1);
        assert_eq!(asset.path, Some(PathBuf::from("/assets/figure_1.png")));
        assert_eq!(extractor.counters().figures, 1);
        drop(extractor);
        assert_eq!(store.saved, [(AssetKind::Figure, 1, 200, 200)]);
        assert_eq!(calls, 0);
    }

    #[test]
    fn icon_sized_figure_becomes_empty_text() {
        let image = page();
        let mut recognizer = echo("ignored");
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        // 5% of 1000 is 50, so 49 pixels is too narrow.
        for (w, h) in [(10, 10), (49, 300), (300, 49)] {
            let region = Region::from_box(0, 0, w, h, "figure");
            let content = extractor.extract(&region, Category::Figure).unwrap();
            assert_eq!(content.category, Category::Text);
            assert!(content.text.is_empty());
            assert!(content.asset.is_none());
            assert_eq!(content.state, ExtractionState::Reclassified);
        }
        assert_eq!(extractor.counters(), AssetCounters::default());
        drop(extractor);
        assert!(store.saved.is_empty());
    }

    #[test]
    fn figure_floor_uses_at_least_thirty_pixels() {
        let filter = SizeFilter::default();
        assert_eq!(filter.figure_floor(1000, 1000), (50, 50));
        assert_eq!(filter.figure_floor(200, 4000), (30, 200));
    }

    #[test]
    fn failed_save_still_consumes_a_number() {
        let image = page();
        let mut recognizer = echo("");
        let mut store = MemoryStore {
            fail: true,
            ..Default::default()
        };
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let region = Region::from_box(0, 0, 400, 400, "figure");
        let first = extractor.extract(&region, Category::Figure).unwrap();
        let second = extractor.extract(&region, Category::Figure).unwrap();
        assert_eq!(first.asset.as_ref().map(|a| a.number), Some(1));
        assert!(!first.asset.unwrap().is_persisted());
        assert_eq!(second.asset.map(|a| a.number), Some(2));
    }

    #[test]
    fn tables_are_numbered_separately() {
        let image = page();
        let mut recognizer = echo("");
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let figure = Region::from_box(0, 0, 400, 400, "figure");
        let table = Region::from_box(0, 500, 11, 11, "table");
        let tiny_table = Region::from_box(0, 600, 10, 10, "table");
        extractor.extract(&figure, Category::Figure).unwrap();
        let content = extractor.extract(&table, Category::Table).unwrap();
        assert_eq!(content.asset.map(|a| (a.kind, a.number)), Some((AssetKind::Table, 1)));
        let tiny = extractor.extract(&tiny_table, Category::Table).unwrap();
        assert_eq!(tiny.category, Category::Text);
        assert_eq!(
            extractor.counters(),
            AssetCounters {
                figures: 1,
                tables: 1
            }
        );
    }

    #[test]
    fn text_is_recognized_and_normalized() {
        let image = page();
        let mut recognizer = echo("  失由用户自行承担\n");
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let region = Region::from_box(0, 0, 300, 40, "plain text");
        let content = extractor.extract(&region, Category::Text).unwrap();
        assert_eq!(content.text, "损失用户自行承担");
        assert_eq!(content.state, ExtractionState::Recognized);
    }

    #[test]
    fn tiny_text_passes_through() {
        let image = page();
        let mut recognizer = echo("should not be used");
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let region = Region::from_box(0, 0, 10, 40, "title").with_text("kept");
        let content = extractor.extract(&region, Category::Title).unwrap();
        assert_eq!(content.text, "kept");
        assert_eq!(content.state, ExtractionState::PassThrough);
    }

    #[test]
    fn recognizer_failure_is_reported() {
        let image = page();
        let mut recognizer = |_: &DynamicImage| -> Result<Recognition, OracleError> {
            Err(OracleError::Inference("boom".into()))
        };
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let region = Region::from_box(0, 0, 300, 40, "text");
        let failure = extractor.extract(&region, Category::Text).unwrap_err();
        assert!(matches!(failure, RegionFailure::Recognition(ref msg) if msg.contains("boom")));
    }

    #[test]
    fn malformed_polygon_is_reported() {
        let image = page();
        let mut recognizer = echo("");
        let mut store = MemoryStore::default();
        let mut extractor = ContentExtractor::new(
            &image,
            &mut recognizer,
            &mut store,
            TextNormalizer::default(),
            SizeFilter::default(),
        );

        let region = Region::new(vec![], 0.5, "figure");
        assert_eq!(
            extractor.extract(&region, Category::Figure).unwrap_err(),
            RegionFailure::InvalidPolygon(0)
        );
    }
}
