use std::{path::PathBuf, time::Duration};

use geo::{coord, Rect};

use crate::error::RegionFailure;

/// Integer pixel coordinate of a polygon corner.
pub type Point = imageproc::point::Point<i32>;

/// One detected region as reported by the layout detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub polygon: Vec<Point>,
    pub score: f32,
    pub label: String,
    pub text: String,
}

impl Region {
    pub fn new(polygon: Vec<Point>, score: f32, label: impl Into<String>) -> Self {
        Self {
            polygon,
            score,
            label: label.into(),
            text: String::new(),
        }
    }

    /// Axis-aligned region with corners in clockwise order starting top-left.
    pub fn from_box(x: i32, y: i32, width: i32, height: i32, label: impl Into<String>) -> Self {
        Self::new(
            vec![
                Point::new(x, y),
                Point::new(x + width, y),
                Point::new(x + width, y + height),
                Point::new(x, y + height),
            ],
            1.0,
            label,
        )
    }

    /// Splits a legacy `"label|payload"` string into label and text.
    pub fn from_labeled(polygon: Vec<Point>, score: f32, labeled: &str) -> Self {
        let (label, text) = labeled.split_once('|').unwrap_or((labeled, ""));
        Self {
            polygon,
            score,
            label: label.to_string(),
            text: text.trim().to_string(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn min_x(&self) -> i32 {
        self.polygon.iter().map(|p| p.x).min().unwrap_or(0)
    }

    pub fn min_y(&self) -> i32 {
        self.polygon.iter().map(|p| p.y).min().unwrap_or(0)
    }

    /// Rectangle spanned by the polygon's opposite corners (0 and 2).
    pub fn corner_rect(&self) -> Result<Rect<i32>, RegionFailure> {
        if self.polygon.len() < 4 {
            return Err(RegionFailure::InvalidPolygon(self.polygon.len()));
        }
        let (a, c) = (self.polygon[0], self.polygon[2]);
        Ok(Rect::new(coord! { x: a.x, y: a.y }, coord! { x: c.x, y: c.y }))
    }

    /// Corner rectangle clamped to an image of the given size.
    pub fn safe_rect(&self, width: u32, height: u32) -> Result<Rect<i32>, RegionFailure> {
        let rect = self.corner_rect()?;
        let (w, h) = (width as i32, height as i32);
        Ok(Rect::new(
            coord! { x: rect.min().x.clamp(0, w), y: rect.min().y.clamp(0, h) },
            coord! { x: rect.max().x.clamp(0, w), y: rect.max().y.clamp(0, h) },
        ))
    }
}

impl AsRef<Region> for Region {
    fn as_ref(&self) -> &Region {
        self
    }
}

/// Semantic category of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Title,
    Text,
    Figure,
    FigureCaption,
    Table,
    TableCaption,
    Equation,
    Reference,
    Other,
}

impl Category {
    pub fn asset_kind(self) -> Option<AssetKind> {
        match self {
            Category::Figure => Some(AssetKind::Figure),
            Category::Table => Some(AssetKind::Table),
            _ => None,
        }
    }
}

/// A region tagged with its category.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub region: Region,
    pub category: Category,
}

impl AsRef<Region> for Classified {
    fn as_ref(&self) -> &Region {
        &self.region
    }
}

/// Everything the detector reported for one image.
#[derive(Debug, Clone)]
pub struct LayoutSnapshot {
    pub regions: Vec<Region>,
    pub image_width: u32,
    pub image_height: u32,
    pub detection_time: Duration,
}

impl LayoutSnapshot {
    pub fn new(regions: Vec<Region>, image_width: u32, image_height: u32) -> Self {
        Self {
            regions,
            image_width,
            image_height,
            detection_time: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetKind {
    Figure,
    Table,
}

impl AssetKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetKind::Figure => "figures",
            AssetKind::Table => "tables",
        }
    }

    pub fn file_prefix(self) -> &'static str {
        match self {
            AssetKind::Figure => "figure",
            AssetKind::Table => "table",
        }
    }
}

/// A cropped figure or table. `path` is `None` when saving failed.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetReference {
    pub kind: AssetKind,
    pub number: u32,
    pub path: Option<PathBuf>,
    pub origin: Region,
}

impl AssetReference {
    pub fn is_persisted(&self) -> bool {
        self.path.is_some()
    }
}

/// Output of the recognizer for one crop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub timing: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionState {
    /// Text came from the recognizer.
    Recognized,
    /// Region too small to recognize; existing text kept.
    PassThrough,
    /// Cropped into an asset.
    Stored,
    /// Icon-sized figure or table demoted to empty text.
    Reclassified,
    Failed(RegionFailure),
}

/// Extracted content for a single region.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub category: Category,
    pub text: String,
    pub asset: Option<AssetReference>,
    pub state: ExtractionState,
}

/// A region in final reading order with its extracted content.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub region: Region,
    pub category: Category,
    pub text: String,
    pub asset: Option<AssetReference>,
    pub state: ExtractionState,
}

impl Block {
    /// Folds an extraction outcome into a block. Failures fall back to the
    /// region's own text; figures and tables fall back to text so no number
    /// is consumed without an asset slot.
    pub fn resolve(classified: Classified, outcome: Result<Content, RegionFailure>) -> Self {
        let Classified { region, category } = classified;
        match outcome {
            Ok(Content {
                category,
                text,
                asset,
                state,
            }) => Self {
                region,
                category,
                text,
                asset,
                state,
            },
            Err(failure) => {
                let category = match category.asset_kind() {
                    Some(_) => Category::Text,
                    None => category,
                };
                Self {
                    text: region.text.clone(),
                    region,
                    category,
                    asset: None,
                    state: ExtractionState::Failed(failure),
                }
            }
        }
    }

    pub fn text_only(region: Region, category: Category, text: impl Into<String>) -> Self {
        Self {
            region,
            category,
            text: text.into(),
            asset: None,
            state: ExtractionState::PassThrough,
        }
    }
}

/// A rendered document.
#[derive(Debug, Clone)]
pub struct Document {
    pub blocks: Vec<Block>,
    pub assets: Vec<AssetReference>,
    pub markdown: String,
    pub detection_time: Duration,
    pub output_dir: Option<PathBuf>,
}

impl Document {
    pub fn html(&self) -> String {
        crate::preview::to_html(&self.markdown)
    }

    pub fn figure_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| block.category == Category::Figure)
            .count()
    }

    pub fn table_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|block| block.category == Category::Table)
            .count()
    }
}

/// Result of a run that may have been cancelled between regions.
#[derive(Debug, Clone)]
pub enum RunOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> RunOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunOutcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            RunOutcome::Cancelled => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunOutcome<U> {
        match self {
            RunOutcome::Completed(value) => RunOutcome::Completed(f(value)),
            RunOutcome::Cancelled => RunOutcome::Cancelled,
        }
    }
}
