use oblique_image::{Image, ImageSize};
use oblique_imgproc::draw::polygon_mask;

use crate::error::VelocityError;

/// A sequence of grayscale images processed pair by pair.
///
/// The pipelines ask for each image once and release it as soon as the pair it starts has
/// been processed, so an implementation only needs to keep two images resident.
pub trait ImageProvider {
    /// Number of images in the sequence.
    fn len(&self) -> usize;

    /// Whether the sequence holds no image.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load image `index`.
    fn image(&mut self, index: usize) -> Result<Image<f32, 1>, VelocityError>;

    /// Name of image `index`, used in the results.
    fn name(&self, index: usize) -> String;

    /// Free the memory held for image `index`.
    fn release(&mut self, index: usize);
}

/// An [`ImageProvider`] over images already in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySequence {
    images: Vec<Option<Image<f32, 1>>>,
    names: Vec<String>,
}

impl InMemorySequence {
    /// Create an empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an image.
    pub fn push(&mut self, name: impl Into<String>, image: Image<f32, 1>) {
        self.names.push(name.into());
        self.images.push(Some(image));
    }

    /// Append one band of an 8 bit multi band image, converted to `f32`.
    ///
    /// # Errors
    ///
    /// Returns an error when `band` is not a channel of `image`.
    pub fn push_band<const C: usize>(
        &mut self,
        name: impl Into<String>,
        image: &Image<u8, C>,
        band: usize,
    ) -> Result<(), VelocityError> {
        let gray = image.channel(band)?.cast::<f32>()?;
        self.push(name, gray);
        Ok(())
    }

    /// Whether image `index` is still held.
    pub fn is_loaded(&self, index: usize) -> bool {
        self.images.get(index).is_some_and(Option::is_some)
    }
}

impl ImageProvider for InMemorySequence {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn image(&mut self, index: usize) -> Result<Image<f32, 1>, VelocityError> {
        self.images
            .get(index)
            .and_then(Option::clone)
            .ok_or(VelocityError::ImageUnavailable(index))
    }

    fn name(&self, index: usize) -> String {
        self.names.get(index).cloned().unwrap_or_default()
    }

    fn release(&mut self, index: usize) {
        if let Some(image) = self.images.get_mut(index) {
            *image = None;
        }
    }
}

/// Supplies the mask restricting where points are seeded in an image.
pub trait MaskProvider {
    /// The mask for images of `size`, pixels equal to zero are excluded.
    fn mask(&self, size: ImageSize) -> Result<Image<u8, 1>, VelocityError>;
}

/// A fixed mask image.
#[derive(Debug, Clone)]
pub struct StaticMask(pub Image<u8, 1>);

impl MaskProvider for StaticMask {
    fn mask(&self, size: ImageSize) -> Result<Image<u8, 1>, VelocityError> {
        if self.0.size() != size {
            return Err(VelocityError::InvalidParameter(format!(
                "mask is {}x{} but images are {}x{}",
                self.0.width(),
                self.0.height(),
                size.width,
                size.height
            )));
        }
        Ok(self.0.clone())
    }
}

/// A mask given as a polygon in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonMask(pub Vec<[f64; 2]>);

impl MaskProvider for PolygonMask {
    fn mask(&self, size: ImageSize) -> Result<Image<u8, 1>, VelocityError> {
        Ok(polygon_mask(size, &self.0)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_release() -> Result<(), VelocityError> {
        let mut seq = InMemorySequence::new();
        seq.push("a.jpg", Image::from_size_val([4, 3].into(), 1.0)?);
        seq.push("b.jpg", Image::from_size_val([4, 3].into(), 2.0)?);
        assert_eq!(seq.len(), 2);
        assert_eq!(seq.name(1), "b.jpg");

        let b = seq.image(1)?;
        assert_eq!(b.as_slice()[0], 2.0);

        seq.release(0);
        assert!(!seq.is_loaded(0));
        assert!(seq.is_loaded(1));
        assert!(matches!(seq.image(0), Err(VelocityError::ImageUnavailable(0))));
        assert!(matches!(seq.image(5), Err(VelocityError::ImageUnavailable(5))));
        Ok(())
    }

    #[test]
    fn test_push_band() -> Result<(), VelocityError> {
        let rgb = Image::<u8, 3>::from_fn([2, 2].into(), |x, y| [10, (x + 2 * y) as u8, 200]);
        let mut seq = InMemorySequence::new();
        seq.push_band("rgb.jpg", &rgb, 1)?;
        assert_eq!(seq.image(0)?.as_slice(), &[0.0, 1.0, 2.0, 3.0]);
        assert!(seq.push_band("rgb.jpg", &rgb, 3).is_err());
        assert_eq!(seq.len(), 1);
        Ok(())
    }

    #[test]
    fn test_masks() -> Result<(), VelocityError> {
        let size = ImageSize {
            width: 10,
            height: 10,
        };
        let square = PolygonMask(vec![[2.0, 2.0], [7.0, 2.0], [7.0, 7.0], [2.0, 7.0]]);
        let mask = square.mask(size)?;
        assert_eq!(mask.size(), size);
        assert_eq!(mask.get_pixel(4, 4, 0)?, 1);
        assert_eq!(mask.get_pixel(0, 9, 0)?, 0);

        let fixed = StaticMask(mask);
        assert!(fixed.mask(size).is_ok());
        assert!(fixed.mask([5, 5].into()).is_err());
        Ok(())
    }
}
