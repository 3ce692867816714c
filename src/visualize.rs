use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use tracing::instrument;

use crate::{classify::classify, Category, Region};

const STROKE: i32 = 4;

fn color(category: Category) -> Rgba<u8> {
    match category {
        Category::Title => Rgba([0xFF, 0x57, 0x22, 0xFF]),
        Category::Figure => Rgba([0x21, 0x96, 0xF3, 0xFF]),
        Category::Table => Rgba([0x4C, 0xAF, 0x50, 0xFF]),
        Category::Equation => Rgba([0x9C, 0x27, 0xB0, 0xFF]),
        Category::FigureCaption | Category::TableCaption => Rgba([0xFF, 0x98, 0x00, 0xFF]),
        Category::Text | Category::Reference | Category::Other => Rgba([0x9E, 0x9E, 0x9E, 0xFF]),
    }
}

/// Draws every region's bounding box on a copy of `image`, colored by category.
#[instrument(level = "debug", skip_all, fields(regions = regions.len()))]
pub fn draw_layout(image: &DynamicImage, regions: &[Region]) -> RgbaImage {
    let mut canvas = image.to_rgba8();
    for region in regions {
        let Ok(rect) = region.safe_rect(canvas.width(), canvas.height()) else {
            log::debug!("Not drawing degenerate region {:?}", region.label);
            continue;
        };
        let color = color(classify(&region.label));
        let (min, width, height) = (rect.min(), rect.width(), rect.height());
        for inset in 0..STROKE {
            let (w, h) = (width - 2 * inset, height - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                &mut canvas,
                Rect::at(min.x + inset, min.y + inset).of_size(w as u32, h as u32),
                color,
            );
        }
    }
    canvas
}
