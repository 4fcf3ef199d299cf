use crate::{header::VolumeMetadata, uid::generate_uid, volume::VoxelGrid};

use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};
use ndarray::{Array2, s};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{io::Write, sync::Arc};
use thiserror::Error;

pub const BITS_ALLOCATED: u16 = 16;

/// Row and column direction cosines of an axis-aligned acquisition.
pub const AXIAL_ORIENTATION: [f64; 6] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

// Decimal String values are limited to 16 characters.
const MAX_DS_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("invalid VolumeScale `{0}`, expected three positive numbers")]
    InvalidScale(String),

    #[error("cannot store {0}-bit samples in 16-bit pixels")]
    UnsupportedBitDepth(u32),

    #[error("slice of {rows}x{columns} pixels exceeds the DICOM image size limit")]
    DimensionsTooLarge { rows: usize, columns: usize },

    #[error("DICOM meta error: {0}")]
    Meta(#[from] dicom::object::WithMetaError),

    #[error("DICOM write error: {0}")]
    Write(#[from] dicom::object::WriteError),
}

/// Fixed attributes written into every record of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub patient_name: String,
    pub patient_id: String,
    pub modality: String,
    pub series_number: u32,
    /// `YYYYMMDD`; the local date at encode time when absent.
    pub study_date: Option<String>,
    /// `HHMMSS`; the local time at encode time when absent.
    pub study_time: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            patient_name: "VOX_Converted".to_string(),
            patient_id: "12345".to_string(),
            modality: "CT".to_string(),
            series_number: 1,
            study_date: None,
            study_time: None,
        }
    }
}

/// Identifiers and attributes shared by all slices of one conversion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesContext {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub frame_of_reference_uid: String,
    pub patient_name: String,
    pub patient_id: String,
    pub modality: String,
    pub series_number: u32,
    pub study_date: String,
    pub study_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliceGeometry {
    pub image_position: [f64; 3],
    pub image_orientation: [f64; 6],
    /// Row spacing, column spacing.
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: f64,
}

impl SliceGeometry {
    fn axial(index: usize, pixel_spacing: [f64; 2], slice_thickness: f64) -> Self {
        Self {
            image_position: [0.0, 0.0, index as f64 * slice_thickness],
            image_orientation: AXIAL_ORIENTATION,
            pixel_spacing,
            slice_thickness,
        }
    }
}

/// One output image of the series.
#[derive(Debug, Clone)]
pub struct SliceRecord {
    context: Arc<SeriesContext>,
    sop_instance_uid: String,
    instance_number: u32,
    geometry: SliceGeometry,
    bits_stored: u16,
    pixels: Array2<u16>,
}

impl SliceRecord {
    pub fn context(&self) -> &SeriesContext {
        &self.context
    }

    pub fn sop_instance_uid(&self) -> &str {
        &self.sop_instance_uid
    }

    /// 1-based position of the record in the series.
    pub fn instance_number(&self) -> u32 {
        self.instance_number
    }

    pub fn geometry(&self) -> &SliceGeometry {
        &self.geometry
    }

    pub fn bits_stored(&self) -> u16 {
        self.bits_stored
    }

    pub fn rows(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn columns(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn pixels(&self) -> &Array2<u16> {
        &self.pixels
    }

    /// Row-major little-endian pixel samples.
    pub fn pixel_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn file_name(&self) -> String {
        format!("slice_{:04}.dcm", self.instance_number)
    }

    /// Build the DICOM file object for this slice.
    pub fn to_dicom(&self) -> Result<FileDicomObject<InMemDicomObject>, EncodeError> {
        let context = &self.context;
        let geometry = &self.geometry;
        let mut obj = InMemDicomObject::new_empty();

        put(&mut obj, tags::PATIENT_NAME, VR::PN, context.patient_name.as_str().into());
        put(&mut obj, tags::PATIENT_ID, VR::LO, context.patient_id.as_str().into());
        put(&mut obj, tags::STUDY_DATE, VR::DA, context.study_date.as_str().into());
        put(&mut obj, tags::STUDY_TIME, VR::TM, context.study_time.as_str().into());
        put(
            &mut obj,
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            context.study_instance_uid.as_str().into(),
        );
        put(
            &mut obj,
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            context.series_instance_uid.as_str().into(),
        );
        put(&mut obj, tags::MODALITY, VR::CS, context.modality.as_str().into());
        put(&mut obj, tags::SERIES_NUMBER, VR::IS, context.series_number.to_string().into());
        put(&mut obj, tags::INSTANCE_NUMBER, VR::IS, self.instance_number.to_string().into());
        put(&mut obj, tags::SOP_CLASS_UID, VR::UI, uids::CT_IMAGE_STORAGE.into());
        put(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, self.sop_instance_uid.as_str().into());
        put(
            &mut obj,
            tags::FRAME_OF_REFERENCE_UID,
            VR::UI,
            context.frame_of_reference_uid.as_str().into(),
        );

        put(&mut obj, tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16));
        put(&mut obj, tags::PHOTOMETRIC_INTERPRETATION, VR::CS, "MONOCHROME2".into());
        put(&mut obj, tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0_u16));
        put(&mut obj, tags::ROWS, VR::US, PrimitiveValue::from(self.rows() as u16));
        put(&mut obj, tags::COLUMNS, VR::US, PrimitiveValue::from(self.columns() as u16));
        put(&mut obj, tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(BITS_ALLOCATED));
        put(&mut obj, tags::BITS_STORED, VR::US, PrimitiveValue::from(self.bits_stored));
        put(&mut obj, tags::HIGH_BIT, VR::US, PrimitiveValue::from(self.bits_stored - 1));
        put(&mut obj, tags::RESCALE_INTERCEPT, VR::DS, "0".into());
        put(&mut obj, tags::RESCALE_SLOPE, VR::DS, "1".into());

        put(&mut obj, tags::PIXEL_SPACING, VR::DS, decimal_strings(&geometry.pixel_spacing));
        put(&mut obj, tags::SLICE_THICKNESS, VR::DS, decimal_strings(&[geometry.slice_thickness]));
        put(
            &mut obj,
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            decimal_strings(&geometry.image_position),
        );
        put(
            &mut obj,
            tags::IMAGE_ORIENTATION_PATIENT,
            VR::DS,
            decimal_strings(&geometry.image_orientation),
        );

        put(
            &mut obj,
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(self.pixels.iter().copied().collect()),
        );

        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(self.sop_instance_uid.as_str());

        Ok(obj.with_meta(meta)?)
    }

    /// Write this slice as a complete DICOM file (preamble, meta group, data set).
    pub fn write_to(&self, writer: impl Write) -> Result<(), EncodeError> {
        self.to_dicom()?.write_all(writer)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SeriesEncoder {
    config: EncoderConfig,
}

impl SeriesEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Turn a voxel grid into one record per slice, in ascending slice
    /// order
    ///
    /// # Errors
    ///
    /// Returns error if the volume scale is malformed, the bit depth does
    /// not fit 16-bit pixels or a slice is too large for a DICOM image
    pub fn encode(
        &self,
        grid: &VoxelGrid,
        metadata: &VolumeMetadata,
    ) -> Result<Vec<SliceRecord>, EncodeError> {
        let [scale_x, scale_y, scale_z] = metadata.scale()?;
        // Rows run along y and columns along x after the axis reorder.
        let pixel_spacing = [scale_y, scale_x];
        let slice_thickness = scale_z;
        let bits_stored = Self::bits_stored(metadata.bits_per_voxel)?;

        let (num_slices, rows, columns) = grid.dim();
        if rows > u16::MAX as usize || columns > u16::MAX as usize {
            return Err(EncodeError::DimensionsTooLarge { rows, columns });
        }

        let context = Arc::new(self.series_context());
        log::info!(
            "encoding {num_slices} slices of {rows}x{columns} into series {}",
            context.series_instance_uid
        );

        let records = (0..num_slices)
            .into_par_iter()
            .map(|index| SliceRecord {
                context: Arc::clone(&context),
                sop_instance_uid: generate_uid(),
                instance_number: index as u32 + 1,
                geometry: SliceGeometry::axial(index, pixel_spacing, slice_thickness),
                bits_stored,
                pixels: grid.data().slice(s![index, .., ..]).to_owned(),
            })
            .collect();

        Ok(records)
    }

    fn bits_stored(bits_per_voxel: u32) -> Result<u16, EncodeError> {
        match bits_per_voxel {
            1..=16 => Ok(bits_per_voxel as u16),
            bits => Err(EncodeError::UnsupportedBitDepth(bits)),
        }
    }

    fn series_context(&self) -> SeriesContext {
        let now = chrono::Local::now();
        let config = &self.config;
        SeriesContext {
            study_instance_uid: generate_uid(),
            series_instance_uid: generate_uid(),
            frame_of_reference_uid: generate_uid(),
            patient_name: config.patient_name.clone(),
            patient_id: config.patient_id.clone(),
            modality: config.modality.clone(),
            series_number: config.series_number,
            study_date: config
                .study_date
                .clone()
                .unwrap_or_else(|| now.format("%Y%m%d").to_string()),
            study_time: config
                .study_time
                .clone()
                .unwrap_or_else(|| now.format("%H%M%S").to_string()),
        }
    }
}

fn put(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: PrimitiveValue) {
    obj.put(DataElement::new(tag, vr, value));
}

fn decimal_strings(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| format_decimal(*v)).collect())
}

/// Shortest rendering of `value` that fits a Decimal String.
fn format_decimal(value: f64) -> String {
    let plain = value.to_string();
    if plain.len() <= MAX_DS_LEN {
        return plain;
    }
    (0..=10)
        .rev()
        .map(|precision| {
            let fixed = format!("{value:.precision$}");
            if fixed.contains('.') {
                fixed.trim_end_matches('0').trim_end_matches('.').to_string()
            } else {
                fixed
            }
        })
        .find(|s| s.len() <= MAX_DS_LEN)
        .unwrap_or_else(|| format!("{value:e}"))
}
