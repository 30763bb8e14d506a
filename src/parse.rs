use crate::error::ProtocolError;

pub(crate) mod fields;
pub(crate) mod warc;

/// Returns whether a line opens a record header block
/// (`"WARC/"` followed by a version token).
pub fn is_version_line(line: &[u8]) -> bool {
    warc::version(line).is_ok()
}

/// Splits a header line into its name and value.
pub(crate) fn split_field_line(line: &[u8]) -> Result<fields::FieldPairRef<'_>, ProtocolError> {
    match nom::combinator::all_consuming(fields::field_pair)(line) {
        Ok((_input, output)) => Ok(output),
        Err(error) => Err(error.into()),
    }
}

pub fn validate_field_name(value: &[u8]) -> Result<(), ProtocolError> {
    match nom::combinator::all_consuming(fields::field_name)(value) {
        Ok((_input, _output)) => Ok(()),
        Err(error) => Err(error.into()),
    }
}

pub fn validate_field_value(value: &[u8]) -> Result<(), ProtocolError> {
    match nom::combinator::all_consuming(fields::field_value)(value) {
        Ok((_input, _output)) => Ok(()),
        Err(error) => Err(error.into()),
    }
}

pub fn parse_u64_strict(value: &str) -> Result<u64, std::num::ParseIntError> {
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return "?".parse();
    }

    value.parse()
}

/// Strips one trailing CRLF or bare LF.
pub(crate) fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

pub(crate) fn is_continuation_line(line: &[u8]) -> bool {
    matches!(line.first(), Some(&(b' ' | b'\t')))
}
