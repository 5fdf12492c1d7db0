use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use chrono::{DateTime, Local};
use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::ColorType;

use super::model::{Frame, ImageStack, WavelengthRange};
use crate::error::{Result, SpectralError};

/// `strftime` pattern of the timestamp embedded in stack file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load an image stack from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.tif` / `.tiff` – multi-page greyscale TIFF, one page per wavelength
pub fn load_file(path: &Path) -> Result<ImageStack> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "tif" | "tiff" => read_stack(path),
        other => Err(SpectralError::UnsupportedSampleFormat(format!(
            "file extension .{other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// TIFF reader
// ---------------------------------------------------------------------------

/// Decode every page of a multi-page grey TIFF.  8-bit pages are widened.
pub fn read_stack(path: &Path) -> Result<ImageStack> {
    let file = File::open(path)?;
    let mut pages = Vec::new();
    for_each_page(BufReader::new(file), |width, height, data| {
        let samples = match data {
            DecodingResult::U16(v) => v,
            DecodingResult::U8(v) => v.into_iter().map(u16::from).collect(),
            _ => {
                return Err(SpectralError::UnsupportedSampleFormat(
                    "stack pages must be 8 or 16 bit unsigned".to_string(),
                ))
            }
        };
        pages.push(to_array(width, height, samples)?);
        Ok(())
    })?;
    log::debug!("read {} slides from {}", pages.len(), path.display());
    ImageStack::from_slides(pages)
}

/// Walk the pages of a TIFF, handing each decoded buffer to `visit` along
/// with its `(width, height)`.  Only single-channel images are accepted.
pub fn for_each_page<R, F>(reader: R, mut visit: F) -> Result<usize>
where
    R: Read + Seek,
    F: FnMut(usize, usize, DecodingResult) -> Result<()>,
{
    let mut decoder = Decoder::new(reader)?;
    let mut count = 0;
    loop {
        match decoder.colortype()? {
            ColorType::Gray(_) => {}
            other => {
                return Err(SpectralError::UnsupportedSampleFormat(format!(
                    "page {count} has colour type {other:?}, expected greyscale"
                )))
            }
        }
        let (width, height) = decoder.dimensions()?;
        let data = decoder.read_image()?;
        visit(width as usize, height as usize, data)?;
        count += 1;

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(count)
}

/// Reshape a row-major buffer into `(height, width)`.
pub fn to_array<T>(width: usize, height: usize, samples: Vec<T>) -> Result<Array2<T>> {
    if samples.len() != width * height {
        return Err(SpectralError::UnsupportedSampleFormat(format!(
            "{} samples for a {width}x{height} page",
            samples.len()
        )));
    }
    Array2::from_shape_vec((height, width), samples)
        .map_err(|e| SpectralError::UnsupportedSampleFormat(e.to_string()))
}

// ---------------------------------------------------------------------------
// TIFF writer
// ---------------------------------------------------------------------------

/// Appends Gray16 pages to a TIFF as slides arrive.
pub struct StackWriter<W: Write + Seek> {
    encoder: TiffEncoder<W>,
    pages: usize,
}

impl StackWriter<File> {
    /// Create (or truncate) the file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(File::create(path)?)
    }
}

impl<W: Write + Seek> StackWriter<W> {
    pub fn new(writer: W) -> Result<Self> {
        Ok(Self {
            encoder: TiffEncoder::new(writer)?,
            pages: 0,
        })
    }

    pub fn write_slide(&mut self, slide: &Frame) -> Result<()> {
        let (height, width) = slide.dim();
        let data: Vec<u16> = slide.iter().copied().collect();
        self.encoder
            .write_image::<colortype::Gray16>(width as u32, height as u32, &data)?;
        self.pages += 1;
        Ok(())
    }

    /// Pages written so far.
    pub fn pages(&self) -> usize {
        self.pages
    }
}

// ---------------------------------------------------------------------------
// File naming
// ---------------------------------------------------------------------------

/// `{name}_wl_{min}-{max}nm_{timestamp}.tif`
pub fn stack_filename(name: &str, range: WavelengthRange, at: DateTime<Local>) -> String {
    format!(
        "{name}_wl_{}-{}nm_{}.tif",
        range.min(),
        range.max(),
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Recover the wavelength range from a file named by [`stack_filename`].
pub fn parse_stack_filename(path: &Path) -> Option<WavelengthRange> {
    let stem = path.file_stem()?.to_str()?;
    let (_, tail) = stem.rsplit_once("_wl_")?;
    let (span, _) = tail.split_once("nm")?;
    let (min, max) = span.split_once('-')?;
    WavelengthRange::new(min.trim().parse().ok()?, max.trim().parse().ok()?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn write_stack(path: &Path, stack: &ImageStack) -> Result<()> {
        let mut writer = StackWriter::create(path)?;
        for slide in stack.slides() {
            writer.write_slide(slide)?;
        }
        assert_eq!(writer.pages(), stack.len());
        Ok(())
    }

    fn ramp(rows: usize, cols: usize, offset: u16) -> Frame {
        Array2::from_shape_fn((rows, cols), |(r, c)| offset + (r * cols + c) as u16)
    }

    #[test]
    fn written_stack_reads_back_page_by_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let stack = ImageStack::from_slides(vec![ramp(3, 5, 0), ramp(3, 5, 100), ramp(3, 5, 200)])
            .unwrap();
        write_stack(&path, &stack).unwrap();

        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.shape(), Some((3, 5)));
        assert_eq!(loaded.slide(2).unwrap()[[2, 4]], 214);
    }

    #[test]
    fn eight_bit_pages_are_widened() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            encoder
                .write_image::<colortype::Gray8>(2, 2, &[1u8, 2, 3, 255])
                .unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eight.tiff");
        std::fs::write(&path, buf.into_inner()).unwrap();

        let stack = read_stack(&path).unwrap();
        assert_eq!(stack.slide(0).unwrap()[[1, 1]], 255);
    }

    #[test]
    fn colour_pages_are_rejected() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            encoder
                .write_image::<colortype::RGB8>(1, 1, &[1u8, 2, 3])
                .unwrap();
        }
        buf.set_position(0);
        let err = for_each_page(buf, |_, _, _| Ok(())).unwrap_err();
        assert!(matches!(err, SpectralError::UnsupportedSampleFormat(_)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(load_file(Path::new("stack.png")).is_err());
    }

    #[test]
    fn filename_embeds_and_recovers_range() {
        let at = Local.with_ymd_and_hms(2023, 6, 1, 14, 5, 9).unwrap();
        let range = WavelengthRange::new(550, 570).unwrap();
        let name = stack_filename("embryo", range, at);
        assert_eq!(name, "embryo_wl_550-570nm_2023-06-01_14-05-09.tif");
        assert_eq!(parse_stack_filename(Path::new(&name)), Some(range));
    }

    #[test]
    fn filename_without_range_yields_none() {
        assert_eq!(parse_stack_filename(Path::new("focal3.tif")), None);
        assert_eq!(parse_stack_filename(Path::new("x_wl_700-600nm_t.tif")), None);
    }
}
