use serde::Serialize;

/// Byte order declared by the `Endian` header directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
    // Declared with a token we do not recognize; decoded as little-endian.
    Unrecognized,
}

impl ByteOrder {
    /// Classify an `Endian` token. A missing directive means little-endian.
    pub fn from_token(token: Option<&str>) -> Self {
        match token.and_then(|t| t.chars().next()) {
            None => ByteOrder::Little,
            Some('L' | 'l') => ByteOrder::Little,
            Some('B' | 'b') => ByteOrder::Big,
            Some(_) => ByteOrder::Unrecognized,
        }
    }
}
