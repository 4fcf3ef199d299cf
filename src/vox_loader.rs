use crate::{
    enums::ByteOrder,
    header::{
        DiagnosticLog, HeaderAccumulator, HeaderLimits, RAW_TERMINATOR, VolumeMetadata,
        find_raw_terminator, is_text_terminator,
    },
    reorder::AxisReorder,
    volume::VoxelGrid,
};

use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};
use thiserror::Error;

/// Number of raw bytes echoed into the log for an undecodable line.
const LOGGED_BINARY_PREFIX: usize = 200;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no end-of-header marker within the first {limit} bytes (read {read})")]
    HeaderTooLarge { limit: u64, read: u64 },

    #[error("header line of {length} bytes exceeds {limit} bytes, this is not a text header")]
    NotTextHeader { length: usize, limit: usize },

    #[error("binary data in header line {line} before the end-of-header marker")]
    BinaryInHeader { line: usize },

    #[error("header ended without the required `{field}` directive")]
    MissingRequiredField { field: &'static str },

    #[error("read {actual} bytes of voxel data, expected {expected}")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("unsupported voxel depth of {0} bits (8 or 16 supported)")]
    UnsupportedBitDepth(u32),

    #[error("unsupported byte order `{0}` (only little-endian is supported)")]
    UnsupportedEndianness(String),

    #[error("unexpected error while parsing VOX data: {0}")]
    Unknown(String),
}

/// A failed parse, with whatever the parser learned before failing.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ParseFailure {
    pub kind: ParseError,
    /// Present once both `VolumeSize` and `Field 0 Size` were read.
    pub metadata: Option<VolumeMetadata>,
    pub log: DiagnosticLog,
}

#[derive(Debug)]
pub struct ParsedVolume {
    pub grid: VoxelGrid,
    pub metadata: VolumeMetadata,
    pub log: DiagnosticLog,
}

enum LineRead {
    Eof,
    Line(Vec<u8>),
}

/// Result of scanning the text header.
struct HeaderScan {
    metadata: VolumeMetadata,
    // Payload bytes that shared a line with a raw terminator.
    payload_prefix: Vec<u8>,
}

pub struct VoxLoader {
    limits: HeaderLimits,
}

impl Default for VoxLoader {
    fn default() -> Self {
        Self::with_limits(HeaderLimits::default())
    }
}

impl VoxLoader {
    pub fn with_limits(limits: HeaderLimits) -> Self {
        Self { limits }
    }

    /// Parse a VOX stream into a voxel grid and its header metadata
    ///
    /// # Arguments
    ///
    /// * `reader` - Source positioned at the first header byte
    ///
    /// # Errors
    ///
    /// Returns a [`ParseFailure`] carrying the error kind, the header lines
    /// read so far and, once known, the header metadata
    pub fn load_from_reader(&self, reader: impl Read) -> Result<ParsedVolume, ParseFailure> {
        let mut reader = BufReader::new(reader);
        let mut log = DiagnosticLog::default();

        let scan = match self.read_header(&mut reader, &mut log) {
            Ok(scan) => scan,
            Err((kind, metadata)) => return Err(ParseFailure { kind, metadata, log }),
        };

        match Self::read_payload(&mut reader, &scan) {
            Ok(grid) => Ok(ParsedVolume {
                grid,
                metadata: scan.metadata,
                log,
            }),
            Err(kind) => Err(ParseFailure {
                kind,
                metadata: Some(scan.metadata),
                log,
            }),
        }
    }

    pub fn load_from_bytes(&self, bytes: &[u8]) -> Result<ParsedVolume, ParseFailure> {
        self.load_from_reader(bytes)
    }

    /// Load a volume from a .vox file on disk
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<ParsedVolume, ParseFailure> {
        let file = File::open(path.as_ref()).map_err(|e| ParseFailure {
            kind: ParseError::Unknown(format!("{}: {e}", path.as_ref().display())),
            metadata: None,
            log: DiagnosticLog::default(),
        })?;
        self.load_from_reader(file)
    }

    fn read_header(
        &self,
        reader: &mut impl BufRead,
        diagnostics: &mut DiagnosticLog,
    ) -> Result<HeaderScan, (ParseError, Option<VolumeMetadata>)> {
        let mut header = HeaderAccumulator::default();
        let mut bytes_read: u64 = 0;
        let mut line_number = 0;

        let too_large = |header: &HeaderAccumulator, read: u64| match header.missing_field() {
            Some(field) if header.terminator_seen() => ParseError::MissingRequiredField { field },
            _ => ParseError::HeaderTooLarge {
                limit: self.limits.max_header_bytes,
                read,
            },
        };

        while bytes_read < self.limits.max_header_bytes {
            let line = match self.read_line(reader) {
                Ok(LineRead::Line(line)) => line,
                Ok(LineRead::Eof) => {
                    return Err((too_large(&header, bytes_read), header.to_metadata()));
                }
                Err(kind) => return Err((kind, header.to_metadata())),
            };
            line_number += 1;

            if line.len() > self.limits.max_line_bytes {
                diagnostics.push(format!(
                    "SAFETY_ABORT: read a single line of {} bytes",
                    line.len()
                ));
                return Err((
                    ParseError::NotTextHeader {
                        length: line.len(),
                        limit: self.limits.max_line_bytes,
                    },
                    header.to_metadata(),
                ));
            }
            bytes_read += line.len() as u64;

            let text = match std::str::from_utf8(&line) {
                Ok(text) if line.is_ascii() => text.trim(),
                _ => {
                    diagnostics.push(format!(
                        "DECODE_ERROR on bytes: {}...",
                        line[..line.len().min(LOGGED_BINARY_PREFIX)].escape_ascii()
                    ));
                    return match (find_raw_terminator(&line), header.to_metadata()) {
                        (Some(pos), Some(metadata)) => {
                            log::debug!("header terminated inside binary line {line_number}");
                            Ok(Self::finish_header(metadata, payload_after(&line, pos)))
                        }
                        (_, metadata) => Err((
                            ParseError::BinaryInHeader { line: line_number },
                            metadata,
                        )),
                    };
                }
            };
            diagnostics.push(text);

            match header.apply(text) {
                Ok(true) => {}
                Ok(false) => log::debug!("ignoring header line {line_number}: {text}"),
                Err(kind) => return Err((kind, header.to_metadata())),
            }

            let raw_marker = find_raw_terminator(&line);
            if is_text_terminator(text) || raw_marker.is_some() {
                header.mark_terminator();
                if let Some(metadata) = header.to_metadata() {
                    let prefix = raw_marker
                        .map(|pos| payload_after(&line, pos))
                        .unwrap_or_default();
                    return Ok(Self::finish_header(metadata, prefix));
                }
                log::debug!("end-of-header marker on line {line_number} before required fields");
            }
        }

        Err((too_large(&header, bytes_read), header.to_metadata()))
    }

    fn finish_header(metadata: VolumeMetadata, payload_prefix: Vec<u8>) -> HeaderScan {
        log::info!(
            "VOX header: size {:?}, {} bits per voxel",
            metadata.dimensions,
            metadata.bits_per_voxel
        );
        HeaderScan {
            metadata,
            payload_prefix,
        }
    }

    /// Read one line, buffering at most one byte more than the line limit.
    fn read_line(&self, reader: &mut impl BufRead) -> Result<LineRead, ParseError> {
        let mut line = Vec::new();
        let cap = self.limits.max_line_bytes as u64 + 1;
        reader
            .by_ref()
            .take(cap)
            .read_until(b'\n', &mut line)
            .map_err(|e| ParseError::Unknown(e.to_string()))?;
        if line.is_empty() {
            Ok(LineRead::Eof)
        } else {
            Ok(LineRead::Line(line))
        }
    }

    fn read_payload(reader: &mut impl Read, scan: &HeaderScan) -> Result<VoxelGrid, ParseError> {
        let metadata = &scan.metadata;
        Self::validate_encoding(metadata)?;

        let expected = metadata
            .payload_len()
            .ok_or_else(|| ParseError::Unknown("volume size overflows".to_string()))?;

        let mut payload = scan.payload_prefix.clone();
        payload.truncate(expected);
        let remaining = (expected - payload.len()) as u64;
        reader
            .take(remaining)
            .read_to_end(&mut payload)
            .map_err(|e| ParseError::Unknown(e.to_string()))?;

        if payload.len() != expected {
            return Err(ParseError::TruncatedPayload {
                expected,
                actual: payload.len(),
            });
        }

        let samples = Self::decode_samples(&payload, metadata.bits_per_voxel);
        let data = AxisReorder::SLICE_ROW_COLUMN
            .apply(metadata.dimensions, samples)
            .map_err(|e| ParseError::Unknown(e.to_string()))?;
        Ok(VoxelGrid::new(data))
    }

    fn validate_encoding(metadata: &VolumeMetadata) -> Result<(), ParseError> {
        match metadata.byte_order() {
            ByteOrder::Little => {}
            ByteOrder::Big => {
                let token = metadata.endianness.clone().unwrap_or_default();
                return Err(ParseError::UnsupportedEndianness(token));
            }
            ByteOrder::Unrecognized => log::warn!(
                "unrecognized byte order {:?}, decoding as little-endian",
                metadata.endianness
            ),
        }

        match metadata.bits_per_voxel {
            8 | 16 => Ok(()),
            bits => Err(ParseError::UnsupportedBitDepth(bits)),
        }
    }

    /// Little-endian samples widened to 16 bits.
    fn decode_samples(payload: &[u8], bits_per_voxel: u32) -> Vec<u16> {
        match bits_per_voxel {
            8 => payload.iter().copied().map(u16::from).collect(),
            _ => bytemuck::pod_collect_to_vec::<u8, u16>(payload)
                .into_iter()
                .map(u16::from_le)
                .collect(),
        }
    }
}

/// Bytes following a raw terminator. A bare line ending is not payload.
fn payload_after(line: &[u8], marker_pos: usize) -> Vec<u8> {
    match &line[marker_pos + RAW_TERMINATOR.len()..] {
        b"\n" | b"\r\n" => Vec::new(),
        tail => tail.to_vec(),
    }
}
