//! # VOX-DICOM library
//!
//! This crate converts Revvity/Rigaku `.vox` volumes into DICOM image
//! series.
//!
//! A VOX file is a variable-length ASCII header terminated by `##`,
//! followed directly by the raw voxel payload. The conversion runs in two
//! steps:
//!  - [`VoxLoader`] scans the header line by line within fixed bounds and
//!    decodes the payload into a [`VoxelGrid`] indexed `[slice, row, column]`
//!  - [`SeriesEncoder`] turns every slice of the grid into a [`SliceRecord`]
//!    that serializes to one DICOM file
//!
//! Parse failures carry the header lines read so far, so a caller can show
//! why a file was rejected. The [`archive`] module handles the ZIP files the
//! volumes are usually shipped in.
//!
//! Supported input:
//!  - a single data field (`Field 0`)
//!  - 8 or 16 bits per voxel, little-endian
//!  - axis-aligned volumes (no oblique orientation)
//!
//! # Examples
//!
//! ## Converting a VOX file into DICOM files
//!
//! ```no_run
//! # use vox_dicom::{SeriesEncoder, VoxLoader};
//! # use std::fs::File;
//! let parsed = VoxLoader::default()
//!     .load_from_path("sample.vox")
//!     .expect("should have parsed the VOX file");
//! let records = SeriesEncoder::default()
//!     .encode(&parsed.grid, &parsed.metadata)
//!     .expect("should have encoded the volume");
//! for record in &records {
//!     let file = File::create(record.file_name()).expect("should have created file");
//!     record.write_to(file).expect("should have written DICOM file");
//! }
//! ```

pub mod archive;
pub mod enums;
pub mod header;
pub mod reorder;
pub mod series_encoder;
pub mod uid;
pub mod volume;
pub mod vox_loader;

pub use header::{DiagnosticLog, HeaderLimits, VolumeMetadata};
pub use series_encoder::{EncodeError, EncoderConfig, SeriesEncoder, SliceRecord};
pub use volume::VoxelGrid;
pub use vox_loader::{ParseError, ParseFailure, ParsedVolume, VoxLoader};
