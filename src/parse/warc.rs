use nom::{
    bytes::complete::{tag, take_while1},
    combinator::recognize,
    sequence::pair,
    IResult,
};

pub fn version(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let tag = tag("WARC/");
    let digits = take_while1(|c: u8| c.is_ascii_digit() || c == b'.');

    recognize(pair(tag, digits))(input)
}
