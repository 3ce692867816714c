use image::DynamicImage;

use crate::{error::OracleError, LayoutSnapshot, Recognition};

/// Finds layout regions in a page image.
///
/// Methods take `&mut self`: a handle serves one run at a time.
pub trait LayoutDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<LayoutSnapshot, OracleError>;
}

/// Recognizes the text in a cropped region.
pub trait TextRecognizer {
    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition, OracleError>;
}

impl<F> TextRecognizer for F
where
    F: FnMut(&DynamicImage) -> Result<Recognition, OracleError>,
{
    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition, OracleError> {
        self(image)
    }
}

impl<T: LayoutDetector + ?Sized> LayoutDetector for Box<T> {
    fn detect(&mut self, image: &DynamicImage) -> Result<LayoutSnapshot, OracleError> {
        (**self).detect(image)
    }
}

/// Replays a snapshot produced elsewhere, e.g. by a detector in another process.
#[derive(Debug, Clone)]
pub struct FixedLayout(pub LayoutSnapshot);

impl LayoutDetector for FixedLayout {
    fn detect(&mut self, _image: &DynamicImage) -> Result<LayoutSnapshot, OracleError> {
        Ok(self.0.clone())
    }
}
