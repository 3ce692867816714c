use geo::{coord, Area, Rect};
use image::{imageops::FilterType, DynamicImage, Pixel, Rgb, RgbImage};
use ndarray::Array4;
use tracing::instrument;

use crate::error::RegionFailure;

/// Crops `rect` out of `image`. The rectangle must already be clamped.
pub(crate) fn crop(image: &DynamicImage, rect: &Rect<i32>) -> Result<DynamicImage, RegionFailure> {
    let (min, width, height) = (rect.min(), rect.width(), rect.height());
    if width <= 0 || height <= 0 {
        return Err(RegionFailure::Crop(format!("empty rectangle {rect:?}")));
    }
    let (x, y) = (min.x as u32, min.y as u32);
    if min.x < 0 || min.y < 0 || x + width as u32 > image.width() || y + height as u32 > image.height() {
        return Err(RegionFailure::Crop(format!(
            "{rect:?} exceeds {}x{} image",
            image.width(),
            image.height()
        )));
    }
    log::trace!("Slicing subimage to {rect:?}");
    Ok(image.crop_imm(x, y, width as u32, height as u32))
}

/// Mapping between source image coordinates and a square letterboxed input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub gain: f32,
    pub pad_left: u32,
    pub pad_top: u32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    pub fn new(source_width: u32, source_height: u32, target: u32) -> Self {
        let gain = (target as f32 / source_width as f32).min(target as f32 / source_height as f32);
        let new_width = (source_width as f32 * gain).round();
        let new_height = (source_height as f32 * gain).round();
        let pad_left = ((target as f32 - new_width) / 2.0 - 0.1).round().max(0.0) as u32;
        let pad_top = ((target as f32 - new_height) / 2.0 - 0.1).round().max(0.0) as u32;
        Self {
            gain,
            pad_left,
            pad_top,
            source_width,
            source_height,
        }
    }

    /// Maps a point from letterboxed input space back onto the source image,
    /// clipped to its bounds.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        let x = (x - self.pad_left as f32) / self.gain;
        let y = (y - self.pad_top as f32) / self.gain;
        (
            x.clamp(0.0, self.source_width as f32),
            y.clamp(0.0, self.source_height as f32),
        )
    }
}

/// Resizes `image` into a `target`×`target` gray-padded square and returns
/// it as a normalized NCHW tensor.
#[instrument(level = "debug", skip(image))]
pub(crate) fn letterbox_tensor(image: &DynamicImage, target: u32) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::new(image.width(), image.height(), target);
    let new_width = ((image.width() as f32 * letterbox.gain).round() as u32).clamp(1, target);
    let new_height = ((image.height() as f32 * letterbox.gain).round() as u32).clamp(1, target);
    let resized = image.resize_exact(new_width, new_height, FilterType::Triangle).to_rgb8();

    let mut canvas = RgbImage::from_pixel(target, target, Rgb([114, 114, 114]));
    image::imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.pad_left as i64,
        letterbox.pad_top as i64,
    );

    let tensor = Array4::<f32>::from_shape_fn(
        (1, 3, target as usize, target as usize),
        |(_, ch, y, x)| canvas.get_pixel(x as u32, y as u32).channels()[ch] as f32 / 255.0,
    );
    (tensor, letterbox)
}

/// Intersection over union of two rectangles.
pub(crate) fn iou(a: &Rect<f32>, b: &Rect<f32>) -> f32 {
    let min = coord! { x: a.min().x.max(b.min().x), y: a.min().y.max(b.min().y) };
    let max = coord! { x: a.max().x.min(b.max().x), y: a.max().y.min(b.max().y) };
    if max.x <= min.x || max.y <= min.y {
        return 0.0;
    }
    let intersection = Rect::new(min, max).unsigned_area();
    let union = a.unsigned_area() + b.unsigned_area() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}
