use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tiff::decoder::DecodingResult;

use super::loader::{for_each_page, to_array};
use super::model::WavelengthRange;
use crate::error::{Result, SpectralError};

/// First wavelength of a calibration TIFF; page `i` is `430 + i` nm.
pub const CALIBRATION_MIN_WAVELENGTH: u32 = 430;
/// Pages in a calibration TIFF (430..=730 nm).
pub const CALIBRATION_PAGES: usize = 301;

// ---------------------------------------------------------------------------
// Reference – the divisor for one wavelength
// ---------------------------------------------------------------------------

/// Reference intensity for one wavelength.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    /// Per-pixel reference from a calibration image.
    Frame(Array2<f32>),
    /// One power-meter reading applied to every pixel.
    Uniform(f64),
}

impl Reference {
    /// Shape the reference imposes on frames, if any.
    pub fn shape(&self) -> Option<(usize, usize)> {
        match self {
            Reference::Frame(m) => Some(m.dim()),
            Reference::Uniform(_) => None,
        }
    }

    pub fn at(&self, row: usize, col: usize) -> f64 {
        match self {
            Reference::Frame(m) => f64::from(m[[row, col]]),
            Reference::Uniform(v) => *v,
        }
    }
}

// ---------------------------------------------------------------------------
// CalibrationMap – wavelength → reference, contiguous and immutable
// ---------------------------------------------------------------------------

/// Where the references came from, which decides how a capture applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationKind {
    /// Reference images: each frame is normalized on its own.
    ReferenceImages,
    /// Lamp power in watts: frames are divided by it and the whole run is
    /// rescaled to its peak afterwards.
    PowerTable,
}

/// References indexed by `wavelength - range.min()`.
#[derive(Debug, Clone)]
pub struct CalibrationMap {
    range: WavelengthRange,
    references: Vec<Reference>,
    kind: CalibrationKind,
}

impl CalibrationMap {
    /// Bind `references[i]` to wavelength `min + i`.
    pub fn from_references(min: u32, references: Vec<Reference>) -> Result<Self> {
        let range = WavelengthRange::starting_at(min, references.len())?;
        Ok(Self {
            range,
            references,
            kind: CalibrationKind::ReferenceImages,
        })
    }

    /// Load a calibration file.  Dispatch by extension.
    ///
    /// * `.tif` / `.tiff` – 301-page reference image stack
    /// * `.csv`           – power sweep table
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "tif" | "tiff" => Self::from_tiff(path),
            "csv" => Self::from_power_csv(path),
            other => Err(load_error(path, format!("unsupported extension .{other}"))),
        }
    }

    /// Read a 301-page TIFF; page `i` becomes the reference for `430 + i` nm.
    pub fn from_tiff(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| load_error(path, e.to_string()))?;
        let mut references = Vec::with_capacity(CALIBRATION_PAGES);
        let mut shape = None;

        let visited = for_each_page(BufReader::new(file), |width, height, data| {
            let page = to_array(width, height, widen_to_f32(data)?)?;
            match shape {
                None => shape = Some(page.dim()),
                Some(expected) if expected != page.dim() => {
                    return Err(SpectralError::ShapeMismatch {
                        expected,
                        found: page.dim(),
                    })
                }
                Some(_) => {}
            }
            references.push(Reference::Frame(page));
            Ok(())
        })
        .map_err(|e| match e {
            SpectralError::Io(_) | SpectralError::Tiff(_) => load_error(path, e.to_string()),
            other => other,
        })?;

        if visited != CALIBRATION_PAGES {
            return Err(SpectralError::CalibrationPageCount {
                expected: CALIBRATION_PAGES,
                found: visited,
            });
        }
        log::info!(
            "loaded {visited} calibration pages of {:?} from {}",
            shape.unwrap_or_default(),
            path.display()
        );
        Self::from_references(CALIBRATION_MIN_WAVELENGTH, references)
    }

    /// Read the power sweep table; rows must be contiguous ascending wavelengths.
    pub fn from_power_csv(path: &Path) -> Result<Self> {
        let readings = read_power_csv(path)?;
        Self::from_power_readings(&readings).map_err(|e| match e {
            SpectralError::InvalidRange { .. } => load_error(path, "empty table".to_string()),
            SpectralError::CalibrationLoad { reason, .. } => load_error(path, reason),
            other => other,
        })
    }

    pub fn from_power_readings(readings: &[PowerReading]) -> Result<Self> {
        let Some(first) = readings.first() else {
            return Err(SpectralError::InvalidRange { min: 0, max: 0 });
        };
        for (i, reading) in readings.iter().enumerate() {
            let expected = first.wavelength + i as u32;
            if reading.wavelength != expected {
                return Err(SpectralError::CalibrationLoad {
                    path: Default::default(),
                    reason: format!(
                        "row {i}: expected {expected} nm, found {} nm",
                        reading.wavelength
                    ),
                });
            }
        }
        let references = readings.iter().map(|r| Reference::Uniform(r.mean)).collect();
        let mut map = Self::from_references(first.wavelength, references)?;
        map.kind = CalibrationKind::PowerTable;
        Ok(map)
    }

    /// Reference for `wavelength`; absent wavelengths are an error.
    pub fn get(&self, wavelength: u32) -> Result<&Reference> {
        if !self.range.contains(wavelength) {
            return Err(SpectralError::CalibrationMissing { wavelength });
        }
        self.references
            .get((wavelength - self.range.min()) as usize)
            .ok_or(SpectralError::CalibrationMissing { wavelength })
    }

    pub fn range(&self) -> WavelengthRange {
        self.range
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }
}

fn load_error(path: &Path, reason: String) -> SpectralError {
    SpectralError::CalibrationLoad {
        path: path.to_path_buf(),
        reason,
    }
}

fn widen_to_f32(data: DecodingResult) -> Result<Vec<f32>> {
    Ok(match data {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => {
            return Err(SpectralError::UnsupportedSampleFormat(
                "calibration pages must be unsigned or floating point".to_string(),
            ))
        }
    })
}

// ---------------------------------------------------------------------------
// Power sweep table (CSV)
// ---------------------------------------------------------------------------

/// Mean and spread of the power meter at one wavelength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    pub wavelength: u32,
    pub mean: f64,
    pub std_dev: f64,
}

/// On-disk row.  Wavelengths are written as floats (`550.0`) so tables from
/// older tooling load unchanged.
#[derive(Debug, Serialize, Deserialize)]
struct PowerRow {
    wavelengths: f64,
    power_meas: f64,
    std_power_meas: f64,
}

pub fn read_power_csv(path: &Path) -> Result<Vec<PowerReading>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| load_error(path, e.to_string()))?;
    let mut readings = Vec::new();
    for (row_no, row) in reader.deserialize::<PowerRow>().enumerate() {
        let row = row.map_err(|e| load_error(path, format!("row {row_no}: {e}")))?;
        if row.wavelengths.fract() != 0.0 || row.wavelengths < 0.0 {
            return Err(load_error(
                path,
                format!("row {row_no}: {} is not a whole wavelength", row.wavelengths),
            ));
        }
        readings.push(PowerReading {
            wavelength: row.wavelengths as u32,
            mean: row.power_meas,
            std_dev: row.std_power_meas,
        });
    }
    Ok(readings)
}

pub fn write_power_csv(path: &Path, readings: &[PowerReading]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for r in readings {
        writer.serialize(PowerRow {
            wavelengths: f64::from(r.wavelength),
            power_meas: r.mean,
            std_power_meas: r.std_dev,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_uniform_tiff(path: &Path, pages: usize, value: u16) {
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        let data = vec![value; 4 * 3];
        for _ in 0..pages {
            encoder
                .write_image::<colortype::Gray16>(4, 3, &data)
                .unwrap();
        }
    }

    #[test]
    fn full_calibration_tiff_covers_430_to_730() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.tif");
        write_uniform_tiff(&path, CALIBRATION_PAGES, 100);

        let map = CalibrationMap::load(&path).unwrap();
        assert_eq!(map.len(), 301);
        assert_eq!(map.range(), WavelengthRange::new(430, 730).unwrap());
        assert_eq!(map.kind(), CalibrationKind::ReferenceImages);
        let reference = map.get(500).unwrap();
        assert_eq!(reference.shape(), Some((3, 4)));
        assert_eq!(reference.at(2, 3), 100.0);
    }

    #[test]
    fn short_calibration_tiff_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.tif");
        write_uniform_tiff(&path, 10, 100);

        let err = CalibrationMap::from_tiff(&path).unwrap_err();
        assert!(matches!(
            err,
            SpectralError::CalibrationPageCount {
                expected: 301,
                found: 10
            }
        ));
    }

    #[test]
    fn missing_file_reports_load_error() {
        let err = CalibrationMap::load(Path::new("/nonexistent/calib.tif")).unwrap_err();
        assert!(matches!(err, SpectralError::CalibrationLoad { .. }));
    }

    #[test]
    fn lookup_outside_range_is_missing() {
        let map = CalibrationMap::from_references(500, vec![Reference::Uniform(1.0); 3]).unwrap();
        assert!(map.get(502).is_ok());
        assert!(matches!(
            map.get(503),
            Err(SpectralError::CalibrationMissing { wavelength: 503 })
        ));
        assert!(matches!(
            map.get(499),
            Err(SpectralError::CalibrationMissing { wavelength: 499 })
        ));
    }

    #[test]
    fn power_table_round_trips_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PowerCalibrationFiles").join("Calib_x40.csv");
        let readings: Vec<PowerReading> = (550..555)
            .map(|wl| PowerReading {
                wavelength: wl,
                mean: f64::from(wl) * 1e-6,
                std_dev: 1e-8,
            })
            .collect();
        write_power_csv(&path, &readings).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("wavelengths,power_meas,std_power_meas"));

        let map = CalibrationMap::load(&path).unwrap();
        assert_eq!(map.range(), WavelengthRange::new(550, 554).unwrap());
        assert_eq!(map.get(552).unwrap(), &Reference::Uniform(552.0 * 1e-6));
        assert_eq!(map.kind(), CalibrationKind::PowerTable);
    }

    #[test]
    fn gap_in_power_table_is_rejected() {
        let readings = [
            PowerReading {
                wavelength: 550,
                mean: 1.0,
                std_dev: 0.0,
            },
            PowerReading {
                wavelength: 552,
                mean: 1.0,
                std_dev: 0.0,
            },
        ];
        assert!(matches!(
            CalibrationMap::from_power_readings(&readings),
            Err(SpectralError::CalibrationLoad { .. })
        ));
    }
}
