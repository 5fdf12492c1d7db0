//! Writes demo data for the viewer: a 301-page reference stack covering
//! 430..=730 nm, a matching power table, and a small captured stack with three
//! "cells" that absorb at different wavelengths.
//!
//! Usage: `generate_sample [OUT_DIR]` (defaults to `sample_data`).

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tiff::encoder::{colortype, TiffEncoder};

const WIDTH: u32 = 96;
const HEIGHT: u32 = 64;
const CALIBRATION_MIN: u32 = 430;
const CALIBRATION_MAX: u32 = 730;

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Lamp brightness through the filter at `wl`, before vignetting.
fn lamp(wl: f64) -> f64 {
    gaussian(wl, 590.0, 90.0, 1.0) * 0.9 + 0.1
}

/// Radial fall-off towards the frame corners.
fn vignette(row: u32, col: u32) -> f64 {
    let dy = (row as f64 - HEIGHT as f64 / 2.0) / HEIGHT as f64;
    let dx = (col as f64 - WIDTH as f64 / 2.0) / WIDTH as f64;
    1.0 - 0.8 * (dx * dx + dy * dy)
}

/// (row, col, radius, absorption peak nm, peak width nm, depth)
const CELLS: [(f64, f64, f64, f64, f64, f64); 3] = [
    (20.0, 24.0, 10.0, 540.0, 15.0, 0.7),
    (40.0, 60.0, 12.0, 575.0, 10.0, 0.6),
    (18.0, 75.0, 7.0, 600.0, 20.0, 0.8),
];

fn transmission(row: u32, col: u32, wl: f64) -> f64 {
    CELLS
        .iter()
        .filter(|&&(r, c, radius, ..)| {
            (row as f64 - r).powi(2) + (col as f64 - c).powi(2) <= radius * radius
        })
        .map(|&(_, _, _, peak, width, depth)| 1.0 - gaussian(wl, peak, width, depth))
        .product()
}

fn to_u16(v: f64) -> u16 {
    v.round().clamp(0.0, u16::MAX as f64) as u16
}

fn write_pages<F>(path: &Path, wavelengths: impl Iterator<Item = u32>, mut pixel: F) -> Result<usize>
where
    F: FnMut(u32, u32, u32) -> f64,
{
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut pages = 0;
    for wl in wavelengths {
        let mut data = Vec::with_capacity((WIDTH * HEIGHT) as usize);
        for row in 0..HEIGHT {
            for col in 0..WIDTH {
                data.push(to_u16(pixel(wl, row, col)));
            }
        }
        encoder.write_image::<colortype::Gray16>(WIDTH, HEIGHT, &data)?;
        pages += 1;
    }
    Ok(pages)
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    std::fs::create_dir_all(&out_dir)?;
    let mut rng = SimpleRng::new(42);

    // ---- Reference stack: one page per nm over the whole filter range ----
    let calib_path = out_dir.join(format!("Calib_{CALIBRATION_MIN}-{CALIBRATION_MAX}nm.tif"));
    let pages = write_pages(&calib_path, CALIBRATION_MIN..=CALIBRATION_MAX, |wl, row, col| {
        20_000.0 * lamp(wl as f64) * vignette(row, col)
    })?;
    println!("Wrote {} ({pages} pages)", calib_path.display());

    // ---- Power table over the same range ----
    let power_path = out_dir.join("Calib.csv");
    let mut writer = csv::Writer::from_path(&power_path)?;
    writer.write_record(["wavelengths", "power_meas", "std_power_meas"])?;
    for wl in CALIBRATION_MIN..=CALIBRATION_MAX {
        let mean = 2.5e-3 * lamp(wl as f64);
        let std = (mean * 0.01 + rng.gauss(0.0, 1e-6)).abs();
        writer.write_record([wl.to_string(), mean.to_string(), std.to_string()])?;
    }
    writer.flush()?;
    println!("Wrote {}", power_path.display());

    // ---- A captured stack over 520..=620 nm ----
    let (min, max) = (520, 620);
    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let stack_path = out_dir.join(format!("cells_wl_{min}-{max}nm_{stamp}.tif"));
    let pages = write_pages(&stack_path, min..=max, |wl, row, col| {
        let wl = wl as f64;
        let signal = 20_000.0 * lamp(wl) * vignette(row, col) * transmission(row, col, wl);
        signal + rng.gauss(0.0, 150.0)
    })?;
    println!("Wrote {} ({pages} pages)", stack_path.display());

    Ok(())
}
