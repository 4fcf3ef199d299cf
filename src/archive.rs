//! ZIP input and output around the conversion.
//!
//! The input archive must hold exactly one `.vox` entry. macOS resource
//! fork entries (`._name.vox`) are not counted. The output archive holds
//! one DICOM file per slice record.

use crate::series_encoder::{EncodeError, SliceRecord};

use std::{
    io::{Read, Seek, Write},
    path::Path,
};
use thiserror::Error;
use zip::{CompressionMethod, ZipArchive, ZipWriter, result::ZipError, write::SimpleFileOptions};

pub const VOX_EXTENSION: &str = ".vox";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("no .vox file found in the archive")]
    NoVoxEntry,

    #[error("multiple .vox files found in the archive: {}", .0.join(", "))]
    MultipleVoxEntries(Vec<String>),

    #[error("ZIP error: {0}")]
    Zip(#[from] ZipError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),
}

/// Pick the single VOX entry out of an archive listing.
pub fn find_vox_entry<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<String, ArchiveError> {
    let mut matches: Vec<String> = names
        .into_iter()
        .filter(|name| is_vox_entry(name))
        .map(str::to_string)
        .collect();

    match matches.len() {
        0 => Err(ArchiveError::NoVoxEntry),
        1 => Ok(matches.remove(0)),
        _ => Err(ArchiveError::MultipleVoxEntries(matches)),
    }
}

fn is_vox_entry(name: &str) -> bool {
    let base_name = name.rsplit('/').next().unwrap_or(name);
    name.to_ascii_lowercase().ends_with(VOX_EXTENSION) && !base_name.starts_with("._")
}

/// Name of the output archive for a given VOX entry, `<stem>_dicom.zip`.
pub fn output_archive_name(entry_name: &str) -> String {
    let stem = Path::new(entry_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("volume");
    format!("{stem}_dicom.zip")
}

/// An input archive with its VOX entry already selected.
pub struct VoxArchive<R> {
    archive: ZipArchive<R>,
    entry_name: String,
}

impl<R: Read + Seek> VoxArchive<R> {
    /// Open the archive and select its VOX entry. Nothing is decompressed
    /// until [`VoxArchive::entry_reader`] is called.
    pub fn open(reader: R) -> Result<Self, ArchiveError> {
        let archive = ZipArchive::new(reader)?;
        let entry_name = find_vox_entry(archive.file_names())?;
        log::info!("found {entry_name} inside the archive");
        Ok(Self {
            archive,
            entry_name,
        })
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Stream the uncompressed VOX bytes.
    pub fn entry_reader(&mut self) -> Result<impl Read + '_, ArchiveError> {
        Ok(self.archive.by_name(&self.entry_name)?)
    }
}

/// Package slice records into a ZIP archive, one DICOM file per record.
pub fn write_series_archive<W: Write + Seek>(
    records: &[SliceRecord],
    writer: W,
) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut buffer = Vec::new();

    for record in records {
        buffer.clear();
        record.write_to(&mut buffer)?;
        zip.start_file(record.file_name(), options)?;
        zip.write_all(&buffer)?;
    }

    log::info!("packaged {} DICOM files", records.len());
    Ok(zip.finish()?)
}
