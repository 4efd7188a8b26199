//! Parsers for CGI/1.1 responses

use crate::cgi::{DocumentHeaders, Header, Location, Status};

use nom::branch::alt;
use nom::bytes::complete::{tag, take_till, take_till1, take_while,
                           take_while_m_n};
use nom::character::is_digit;
use nom::combinator::{map_res, verify};
use nom::multi::many0;
use nom::sequence::terminated;
use nom::IResult;

use std::str;

fn cr_or_lf(x: u8) -> bool {
    x == b'\n' || x == b'\r'
}

fn lwsp(x: u8) -> bool {
    x == b' ' || x == b'\t'
}

fn newline(input: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((tag("\r\n"), tag("\n")))(input)
}

/// The three-digit code and the reason phrase of a `Status` field's content
///
/// Codes outside 100 to 599 are refused.
pub fn status(input: &[u8]) -> IResult<&[u8], Status> {
    let (input, code) = verify(
        map_res(
            map_res(take_while_m_n(3, 3, is_digit), str::from_utf8),
            |digits: &str| digits.parse::<u16>()
        ),
        |code: &u16| (100 ..= 599).contains(code)
    )(input)?;
    let (phrase, _) = take_while(lwsp)(input)?;

    Ok((&phrase[phrase.len() ..], Status {
        code: code,
        reason_phrase: Vec::from(phrase)
    }))
}

pub fn header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, name) = take_till1(|x: u8| x == b':' || cr_or_lf(x))(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, _) = take_while(lwsp)(input)?;
    let (input, content) = take_till(cr_or_lf)(input)?;
    let (input, _) = newline(input)?;

    let trimmed = content.iter().rposition(|&x| !lwsp(x))
        .map_or(&b""[..], |end| &content[.. end + 1]);

    Ok((input, Header {
        name: Vec::from(name),
        content: Vec::from(trimmed)
    }))
}

/// Header fields up to and including the blank line that ends them
pub fn headers(input: &[u8]) -> IResult<&[u8], Vec<Header>> {
    terminated(many0(header), newline)(input)
}

/// Splits a CGI document into its header block and its body
///
/// Whatever follows the header block is returned untouched as the rest of
/// the input.
pub fn document(input: &[u8]) -> IResult<&[u8], DocumentHeaders> {
    let (body, fields) = headers(input)?;

    let mut doc = DocumentHeaders {
        status: None,
        location: None,
        headers: Vec::with_capacity(fields.len())
    };

    for field in fields {
        if field.name.eq_ignore_ascii_case(b"Status") {
            doc.status = status(&field.content).ok().map(|(_, s)| s);
            continue;
        }

        if field.name.eq_ignore_ascii_case(b"Location") {
            doc.location = Some(Location { url: field.content.clone() });
        }
        doc.headers.push(field);
    }

    Ok((body, doc))
}
