use std::fmt;

use ndarray::Array2;

use crate::error::{Result, SpectralError};

/// A single captured frame: rows × cols of raw or normalized counts.
pub type Frame = Array2<u16>;

// ---------------------------------------------------------------------------
// WavelengthRange – inclusive, contiguous, in nanometres
// ---------------------------------------------------------------------------

/// Inclusive integer wavelength range `[min, max]` in nm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavelengthRange {
    min: u32,
    max: u32,
}

impl WavelengthRange {
    pub fn new(min: u32, max: u32) -> Result<Self> {
        if min > max {
            return Err(SpectralError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    /// The range covered by `len` slides starting at `min`.
    pub fn starting_at(min: u32, len: usize) -> Result<Self> {
        let span = u32::try_from(len)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or(SpectralError::InvalidRange { min, max: min })?;
        let max = min
            .checked_add(span)
            .ok_or(SpectralError::InvalidRange { min, max: u32::MAX })?;
        Self::new(min, max)
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of wavelengths, both ends included.
    pub fn len(&self) -> usize {
        (self.max - self.min) as usize + 1
    }

    pub fn contains(&self, wavelength: u32) -> bool {
        (self.min..=self.max).contains(&wavelength)
    }

    /// Wavelength of slide `index`.
    pub fn wavelength_at(&self, index: usize) -> Option<u32> {
        if index < self.len() {
            Some(self.min + index as u32)
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.min..=self.max
    }
}

impl fmt::Display for WavelengthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{} nm", self.min, self.max)
    }
}

// ---------------------------------------------------------------------------
// ImageStack – one slide per wavelength
// ---------------------------------------------------------------------------

/// Ordered slides of equal shape; slide `i` belongs to the `i`-th wavelength
/// of whatever range produced it.
#[derive(Debug, Clone, Default)]
pub struct ImageStack {
    slides: Vec<Frame>,
}

impl ImageStack {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            slides: Vec::with_capacity(n),
        }
    }

    /// Build a stack from pre-decoded slides, checking they share one shape.
    pub fn from_slides(slides: Vec<Frame>) -> Result<Self> {
        let mut stack = Self::with_capacity(slides.len());
        for slide in slides {
            stack.push(slide)?;
        }
        Ok(stack)
    }

    /// Append a slide. The first slide fixes the frame shape.
    pub fn push(&mut self, slide: Frame) -> Result<()> {
        if let Some(shape) = self.shape() {
            if slide.dim() != shape {
                return Err(SpectralError::ShapeMismatch {
                    expected: shape,
                    found: slide.dim(),
                });
            }
        }
        self.slides.push(slide);
        Ok(())
    }

    /// `(rows, cols)` of every slide, `None` while empty.
    pub fn shape(&self) -> Option<(usize, usize)> {
        self.slides.first().map(|s| s.dim())
    }

    pub fn slide(&self, index: usize) -> Option<&Frame> {
        self.slides.get(index)
    }

    pub fn slides(&self) -> &[Frame] {
        &self.slides
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Region / Selection – what part of each slide to reduce
// ---------------------------------------------------------------------------

/// Inclusive rectangle of `(row, col)` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    top_left: (usize, usize),
    bottom_right: (usize, usize),
}

impl Region {
    /// Corners must already be ordered; an inverted rectangle is rejected
    /// rather than silently producing an empty crop.
    pub fn new(top_left: (usize, usize), bottom_right: (usize, usize)) -> Result<Self> {
        if top_left.0 > bottom_right.0 || top_left.1 > bottom_right.1 {
            return Err(SpectralError::InvalidRegion {
                top: top_left.0,
                left: top_left.1,
                bottom: bottom_right.0,
                right: bottom_right.1,
            });
        }
        Ok(Self {
            top_left,
            bottom_right,
        })
    }

    /// Rectangle spanned by two arbitrary corners, e.g. a mouse drag.
    pub fn spanning(a: (usize, usize), b: (usize, usize)) -> Self {
        Self {
            top_left: (a.0.min(b.0), a.1.min(b.1)),
            bottom_right: (a.0.max(b.0), a.1.max(b.1)),
        }
    }

    pub fn top_left(&self) -> (usize, usize) {
        self.top_left
    }

    pub fn bottom_right(&self) -> (usize, usize) {
        self.bottom_right
    }

    pub fn rows(&self) -> usize {
        self.bottom_right.0 - self.top_left.0 + 1
    }

    pub fn cols(&self) -> usize {
        self.bottom_right.1 - self.top_left.1 + 1
    }

    pub fn is_pixel(&self) -> bool {
        self.top_left == self.bottom_right
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})–({}, {})",
            self.top_left.0, self.top_left.1, self.bottom_right.0, self.bottom_right.1
        )
    }
}

/// Spatial selection the viewer hands to the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Point { row: usize, col: usize },
    Area(Region),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Point { row, col } => write!(f, "pixel ({row}, {col})"),
            Selection::Area(region) => write!(f, "area {region}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – intensity against wavelength
// ---------------------------------------------------------------------------

/// One `(wavelength, intensity)` pair per slide.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Human-readable description of the selection.
    pub label: String,
    pub points: Vec<(u32, f64)>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points as `[x, y]` pairs, ready for plotting.
    pub fn xy(&self) -> Vec<[f64; 2]> {
        self.points
            .iter()
            .map(|&(wl, value)| [f64::from(wl), value])
            .collect()
    }

    /// Intensities rescaled to `[0, 1]`; a flat spectrum maps to zeros.
    pub fn min_max_scaled(&self) -> Vec<[f64; 2]> {
        let min = self.points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max = self
            .points
            .iter()
            .map(|p| p.1)
            .fold(f64::NEG_INFINITY, f64::max);
        let range = max - min;
        self.points
            .iter()
            .map(|&(wl, value)| {
                let y = if range.abs() < f64::EPSILON {
                    0.0
                } else {
                    (value - min) / range
                };
                [f64::from(wl), y]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_length_and_indexing() {
        let range = WavelengthRange::new(550, 570).unwrap();
        assert_eq!(range.len(), 21);
        assert_eq!(range.wavelength_at(0), Some(550));
        assert_eq!(range.wavelength_at(20), Some(570));
        assert_eq!(range.wavelength_at(21), None);
        assert_eq!(range.iter().collect::<Vec<_>>().len(), 21);
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            WavelengthRange::new(600, 500),
            Err(SpectralError::InvalidRange { min: 600, max: 500 })
        ));
    }

    #[test]
    fn range_from_stack_length() {
        let range = WavelengthRange::starting_at(430, 301).unwrap();
        assert_eq!(range.max(), 730);
        assert!(WavelengthRange::starting_at(430, 0).is_err());
    }

    #[test]
    fn stack_rejects_mismatched_slides() {
        let mut stack = ImageStack::default();
        stack.push(Frame::zeros((4, 6))).unwrap();
        let err = stack.push(Frame::zeros((6, 4))).unwrap_err();
        assert!(matches!(
            err,
            SpectralError::ShapeMismatch {
                expected: (4, 6),
                found: (6, 4)
            }
        ));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn inverted_region_fails_fast() {
        assert!(Region::new((5, 5), (4, 8)).is_err());
        assert!(Region::new((5, 9), (6, 8)).is_err());
        let region = Region::new((2, 3), (4, 8)).unwrap();
        assert_eq!((region.rows(), region.cols()), (3, 6));
    }

    #[test]
    fn spanning_normalizes_drag_corners() {
        let region = Region::spanning((9, 2), (3, 7));
        assert_eq!(region.top_left(), (3, 2));
        assert_eq!(region.bottom_right(), (9, 7));
        assert!(Region::spanning((1, 1), (1, 1)).is_pixel());
    }

    #[test]
    fn flat_spectrum_scales_to_zero() {
        let spectrum = Spectrum {
            label: "flat".into(),
            points: vec![(500, 3.0), (501, 3.0)],
        };
        assert_eq!(spectrum.min_max_scaled(), vec![[500.0, 0.0], [501.0, 0.0]]);
    }
}
