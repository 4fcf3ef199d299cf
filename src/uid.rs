/// Root for UIDs derived from a 128-bit random number (ISO/IEC 9834-8).
pub const UUID_DERIVED_ROOT: &str = "2.25";

/// Generate a fresh DICOM UID of the form `2.25.<decimal>`.
pub fn generate_uid() -> String {
    format!("{UUID_DERIVED_ROOT}.{}", rand::random::<u128>())
}
