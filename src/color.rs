use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

use crate::data::model::Frame;

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Spectrum colours: one per extracted spectrum, cycling
// ---------------------------------------------------------------------------

/// Hands out line colours for successive spectra.
#[derive(Debug, Clone)]
pub struct SpectrumColors {
    palette: Vec<Color32>,
    next: usize,
}

impl Default for SpectrumColors {
    fn default() -> Self {
        Self::new(8)
    }
}

impl SpectrumColors {
    pub fn new(n: usize) -> Self {
        Self {
            palette: generate_palette(n.max(1)),
            next: 0,
        }
    }

    pub fn next_color(&mut self) -> Color32 {
        let c = self.palette[self.next % self.palette.len()];
        self.next += 1;
        c
    }
}

// ---------------------------------------------------------------------------
// Grey levels for display
// ---------------------------------------------------------------------------

/// Map a 16-bit slide to 8-bit grey levels, row-major.
///
/// With `min_max` the slide's own range is stretched to 0..=255; otherwise
/// the top byte of each sample is shown.
pub fn display_levels(frame: &Frame, min_max: bool) -> Vec<u8> {
    if !min_max {
        return frame.iter().map(|&v| (v >> 8) as u8).collect();
    }
    let min = frame.iter().copied().min().unwrap_or(0);
    let max = frame.iter().copied().max().unwrap_or(0);
    let range = f32::from(max - min);
    if range == 0.0 {
        return vec![0; frame.len()];
    }
    frame
        .iter()
        .map(|&v| (f32::from(v - min) / range * 255.0).round() as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_has_requested_size() {
        assert_eq!(generate_palette(5).len(), 5);
        assert!(generate_palette(0).is_empty());
    }

    #[test]
    fn spectrum_colors_cycle() {
        let mut colors = SpectrumColors::new(2);
        let a = colors.next_color();
        let b = colors.next_color();
        assert_ne!(a, b);
        assert_eq!(colors.next_color(), a);
    }

    #[test]
    fn min_max_stretches_to_full_range() {
        let frame = Frame::from_shape_vec((1, 3), vec![100, 150, 200]).unwrap();
        assert_eq!(display_levels(&frame, true), vec![0, 128, 255]);
        assert_eq!(display_levels(&frame, false), vec![0, 0, 0]);
    }

    #[test]
    fn flat_frame_is_black_when_stretched() {
        let frame = Frame::from_elem((2, 2), 700);
        assert_eq!(display_levels(&frame, true), vec![0; 4]);
    }
}
