//! VOX text header: metadata, directive matching and the line accumulator.
//!
//! A VOX header is a block of ASCII lines such as
//!
//! ```text
//! Endian L
//! VolumeSize 512 512 300
//! VolumeScale 0.05 0.05 0.05
//! Field 0 {...} Size 16 Format unsigned ...
//! ##
//! ```
//!
//! followed directly by the binary voxel payload. Only a handful of
//! directives matter for the conversion, everything else is kept in the
//! [`DiagnosticLog`] and ignored.

use serde::Serialize;

use crate::{enums::ByteOrder, series_encoder::EncodeError, vox_loader::ParseError};

/// Upper bound for the whole text header.
pub const MAX_HEADER_BYTES: u64 = 5 * 1024 * 1024;

/// Upper bound for a single header line, including its line separator.
pub const MAX_LINE_BYTES: usize = 2048;

/// Terminator marker as it appears in the raw bytes (`##` followed by a form feed).
pub(crate) const RAW_TERMINATOR: &[u8] = b"##\x0c";

const TEXT_TERMINATOR: &str = "##";

const DEFAULT_SCALE: [f64; 3] = [1.0, 1.0, 1.0];

/// Bailout limits applied while scanning the text header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLimits {
    pub max_header_bytes: u64,
    pub max_line_bytes: usize,
}

impl Default for HeaderLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: MAX_HEADER_BYTES,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

/// Parsed VOX header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeMetadata {
    /// Voxel counts (x, y, z) in the order declared by `VolumeSize`.
    pub dimensions: [usize; 3],
    pub bits_per_voxel: u32,
    pub voxel_format: Option<String>,
    /// Remainder of the `VolumeScale` line, parsed lazily by [`VolumeMetadata::scale`].
    pub scale: Option<String>,
    pub endianness: Option<String>,
}

impl VolumeMetadata {
    pub fn voxel_count(&self) -> Option<usize> {
        let [x, y, z] = self.dimensions;
        x.checked_mul(y)?.checked_mul(z)
    }

    pub fn bytes_per_voxel(&self) -> usize {
        (self.bits_per_voxel / 8) as usize
    }

    /// Size of the binary payload in bytes, `None` on overflow.
    pub fn payload_len(&self) -> Option<usize> {
        self.voxel_count()?.checked_mul(self.bytes_per_voxel())
    }

    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_token(self.endianness.as_deref())
    }

    /// Physical voxel size (x, y, z). Defaults to unit spacing when the
    /// header carries no `VolumeScale` directive.
    pub fn scale(&self) -> Result<[f64; 3], EncodeError> {
        let Some(text) = self.scale.as_deref() else {
            return Ok(DEFAULT_SCALE);
        };
        let invalid = || EncodeError::InvalidScale(text.to_string());

        let values = text
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;

        match values.as_slice() {
            [x, y, z, ..] if [x, y, z].iter().all(|v| v.is_finite() && **v > 0.0) => {
                Ok([*x, *y, *z])
            }
            _ => Err(invalid()),
        }
    }
}

/// Ordered record of every header line the parser looked at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticLog {
    lines: Vec<String>,
}

impl DiagnosticLog {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render the first `max_lines` entries, noting when the log was cut.
    pub fn render(&self, max_lines: usize) -> String {
        let mut out = self
            .lines
            .iter()
            .take(max_lines)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n");
        if self.lines.len() > max_lines {
            out.push_str("\n... (log truncated for display)");
        }
        out
    }
}

/// Header state threaded through the line loop. Later directives overwrite
/// earlier ones.
#[derive(Debug, Default)]
pub(crate) struct HeaderAccumulator {
    endianness: Option<String>,
    dimensions: Option<[usize; 3]>,
    bits_per_voxel: Option<u32>,
    voxel_format: Option<String>,
    scale: Option<String>,
    terminator_seen: bool,
}

impl HeaderAccumulator {
    /// Apply one trimmed header line. Returns whether a directive matched.
    pub(crate) fn apply(&mut self, line: &str) -> Result<bool, ParseError> {
        if line.starts_with("Endian") {
            if let Some(token) = line.split_whitespace().skip(1).last() {
                self.endianness = Some(token.to_string());
            }
        } else if line.starts_with("VolumeSize") {
            self.dimensions = Some(parse_volume_size(line)?);
        } else if line.starts_with("VolumeScale") {
            let rest: Vec<&str> = line.split_whitespace().skip(1).collect();
            self.scale = Some(rest.join(" "));
        } else if line.starts_with("Field 0") {
            if let Some(size) = value_after(line, "Size", |c| c.is_ascii_digit()) {
                let bits = size.parse::<u32>().map_err(|e| {
                    ParseError::Unknown(format!("invalid Field 0 size `{size}`: {e}"))
                })?;
                self.bits_per_voxel = Some(bits);
            }
            if let Some(format) = value_after(line, "Format", |c| c.is_ascii_alphabetic()) {
                self.voxel_format = Some(format.to_string());
            }
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    pub(crate) fn mark_terminator(&mut self) {
        self.terminator_seen = true;
    }

    pub(crate) fn terminator_seen(&self) -> bool {
        self.terminator_seen
    }

    /// First required field that has not been declared yet.
    pub(crate) fn missing_field(&self) -> Option<&'static str> {
        if self.dimensions.is_none() {
            Some("VolumeSize")
        } else if self.bits_per_voxel.is_none() {
            Some("Field 0 Size")
        } else {
            None
        }
    }

    pub(crate) fn to_metadata(&self) -> Option<VolumeMetadata> {
        Some(VolumeMetadata {
            dimensions: self.dimensions?,
            bits_per_voxel: self.bits_per_voxel?,
            voxel_format: self.voxel_format.clone(),
            scale: self.scale.clone(),
            endianness: self.endianness.clone(),
        })
    }
}

/// Whether a decoded, trimmed line ends the header.
pub(crate) fn is_text_terminator(line: &str) -> bool {
    line.ends_with(TEXT_TERMINATOR)
}

pub(crate) fn find_raw_terminator(bytes: &[u8]) -> Option<usize> {
    bytes
        .windows(RAW_TERMINATOR.len())
        .position(|window| window == RAW_TERMINATOR)
}

fn parse_volume_size(line: &str) -> Result<[usize; 3], ParseError> {
    let malformed = |reason: String| ParseError::Unknown(format!("invalid `{line}`: {reason}"));

    let values = line
        .split_whitespace()
        .skip(1)
        .take(3)
        .map(str::parse::<usize>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| malformed(e.to_string()))?;

    match values.as_slice() {
        [x, y, z] if *x > 0 && *y > 0 && *z > 0 => Ok([*x, *y, *z]),
        [_, _, _] => Err(malformed("dimensions must be positive".to_string())),
        _ => Err(malformed("expected three dimensions".to_string())),
    }
}

/// Find the first `keyword`, followed by whitespace, followed by a run of
/// characters accepted by `accept`. Lines like `Field 0 {...} Size 16 ...`
/// interleave other tokens, so this searches rather than tokenizes.
fn value_after<'a>(line: &'a str, keyword: &str, accept: fn(char) -> bool) -> Option<&'a str> {
    line.match_indices(keyword).find_map(|(pos, _)| {
        let rest = &line[pos + keyword.len()..];
        let value = rest.trim_start();
        if value.len() == rest.len() {
            return None;
        }
        let end = value.find(|c: char| !accept(c)).unwrap_or(value.len());
        (end > 0).then(|| &value[..end])
    })
}
