/// Data layer: core types, stack and calibration I/O, normalization, extraction.
///
/// Architecture:
/// ```text
///  calibration .tif / .csv        camera frame         stack .tif
///        │                             │                    │
///        ▼                             ▼                    ▼
///   ┌─────────────┐   lookup   ┌────────────┐        ┌──────────┐
///   │ calibration │──────────▶ │ normalize  │──────▶ │  loader  │  read / append pages
///   └─────────────┘            └────────────┘        └──────────┘
///                                                          │
///                                                          ▼
///                                                   ┌────────────┐
///                                                   │ ImageStack │
///                                                   └────────────┘
///                                                          │  Selection + WavelengthRange
///                                                          ▼
///                                                   ┌──────────┐
///                                                   │ extract  │  → Spectrum
///                                                   └──────────┘
/// ```

pub mod calibration;
pub mod extract;
pub mod loader;
pub mod model;
pub mod normalize;
