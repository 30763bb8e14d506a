use nom::{
    bytes::complete::{tag, take_while, take_while1, take_while_m_n},
    character::complete::space0,
    combinator::{map, recognize},
    multi::many0_count,
    sequence::{delimited, pair, separated_pair},
    IResult,
};

pub struct FieldPairRef<'a> {
    pub name: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> From<(&'a [u8], &'a [u8])> for FieldPairRef<'a> {
    fn from(value: (&'a [u8], &'a [u8])) -> Self {
        Self {
            name: value.0,
            value: value.1,
        }
    }
}

pub fn field_pair(input: &[u8]) -> IResult<&[u8], FieldPairRef<'_>> {
    let val = delimited(space0, field_value, space0);
    let pair = separated_pair(field_name, tag(":"), val);

    map(pair, |p| p.into())(input)
}

pub fn field_name(input: &[u8]) -> IResult<&[u8], &[u8]> {
    token(input)
}

pub fn token(input: &[u8]) -> IResult<&[u8], &[u8]> {
    take_while1(is_tchar)(input)
}

pub fn field_value(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(many0_count(field_content))(input)
}

fn field_content(input: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(pair(
        take_while_m_n(1, 1, is_field_vchar),
        take_while(is_field_char),
    ))(input)
}

fn is_field_vchar(b: u8) -> bool {
    b.is_ascii_graphic() || is_obs_text(b)
}

fn is_field_char(b: u8) -> bool {
    is_field_vchar(b) || b == b' ' || b == b'\t'
}

pub fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

pub fn is_obs_text(b: u8) -> bool {
    b >= 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_pair_plain() {
        let (_remain, output) = field_pair(b"n1:v1").unwrap();
        assert_eq!(output.name, b"n1");
        assert_eq!(output.value, b"v1");
    }

    #[test]
    fn test_field_pair_surrounding_space() {
        let (_remain, output) = field_pair(b"n1:  v1 v2").unwrap();
        assert_eq!(output.name, b"n1");
        assert_eq!(output.value, b"v1 v2");
    }

    #[test]
    fn test_field_pair_empty_value() {
        let (_remain, output) = field_pair(b"n1:").unwrap();
        assert_eq!(output.name, b"n1");
        assert_eq!(output.value, b"");
    }

    #[test]
    fn test_field_pair_value_with_colon() {
        let (_remain, output) = field_pair(b"WARC-Record-ID: <urn:uuid:abc>").unwrap();
        assert_eq!(output.name, b"WARC-Record-ID");
        assert_eq!(output.value, b"<urn:uuid:abc>");
    }

    #[test]
    fn test_field_pair_malformed() {
        assert!(field_pair(b"no colon here").is_err());
    }
}
