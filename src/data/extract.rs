use ndarray::s;

use super::model::{ImageStack, Region, Selection, Spectrum, WavelengthRange};
use crate::error::{Result, SpectralError};

// ---------------------------------------------------------------------------
// Spectral extraction: one scalar per slide
// ---------------------------------------------------------------------------

/// Reduce every slide of `stack` over `selection` and pair the results with
/// the wavelengths of `range`.
pub fn extract(stack: &ImageStack, selection: Selection, range: WavelengthRange) -> Result<Spectrum> {
    match selection {
        Selection::Point { row, col } => extract_point(stack, row, col, range),
        Selection::Area(region) => extract_area(stack, region, range),
    }
}

/// Raw value at `(row, col)` of every slide.
pub fn extract_point(
    stack: &ImageStack,
    row: usize,
    col: usize,
    range: WavelengthRange,
) -> Result<Spectrum> {
    check_range(stack, range)?;
    check_bounds(stack, row, col)?;

    let points = range
        .iter()
        .zip(stack.slides())
        .map(|(wl, slide)| (wl, f64::from(slide[[row, col]])))
        .collect();

    Ok(Spectrum {
        label: Selection::Point { row, col }.to_string(),
        points,
    })
}

/// Mean over the inclusive `region` of every slide.
pub fn extract_area(stack: &ImageStack, region: Region, range: WavelengthRange) -> Result<Spectrum> {
    check_range(stack, range)?;
    let (top, left) = region.top_left();
    let (bottom, right) = region.bottom_right();
    check_bounds(stack, bottom, right)?;

    let n = (region.rows() * region.cols()) as f64;
    let points = range
        .iter()
        .zip(stack.slides())
        .map(|(wl, slide)| {
            let crop = slide.slice(s![top..=bottom, left..=right]);
            let sum: f64 = crop.iter().map(|&v| f64::from(v)).sum();
            (wl, sum / n)
        })
        .collect();

    Ok(Spectrum {
        label: Selection::Area(region).to_string(),
        points,
    })
}

fn check_range(stack: &ImageStack, range: WavelengthRange) -> Result<()> {
    if range.len() != stack.len() {
        return Err(SpectralError::WavelengthMismatch {
            range: range.len(),
            slides: stack.len(),
        });
    }
    Ok(())
}

fn check_bounds(stack: &ImageStack, row: usize, col: usize) -> Result<()> {
    let (height, width) = stack.shape().unwrap_or((0, 0));
    if row >= height || col >= width {
        return Err(SpectralError::OutOfBounds {
            row,
            col,
            height,
            width,
        });
    }
    Ok(())
}
