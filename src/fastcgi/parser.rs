//! Decoding of FastCGI records and name-value pair streams

use super::*;
use crate::errors::{Error, Result};

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;

use std::io::{self, Read};

/// A record header as it appears on the wire
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Header {
    pub version: u8,
    pub kind: u8,
    pub id: u16,
    pub content_length: u16,
    pub padding_length: u8
}

pub fn header(input: &[u8]) -> IResult<&[u8], Header> {
    let (input, version) = be_u8(input)?;
    let (input, kind) = be_u8(input)?;
    let (input, id) = be_u16(input)?;
    let (input, content_length) = be_u16(input)?;
    let (input, padding_length) = be_u8(input)?;
    let (input, _) = take(1usize)(input)?; // reserved byte

    Ok((input, Header {
        version: version,
        kind: kind,
        id: id,
        content_length: content_length,
        padding_length: padding_length
    }))
}

/// Takes the content and skips the padding that follows it
fn framed_content(input: &[u8], header: Header) -> IResult<&[u8], &[u8]> {
    let (input, content) = take(header.content_length)(input)?;
    let (input, _) = take(header.padding_length)(input)?;

    Ok((input, content))
}

fn check_version(header: &Header) -> Result<()> {
    if header.version != VERSION {
        return Err(Error::MalformedRecord(
            format!("unsupported protocol version {}", header.version)));
    }

    Ok(())
}

/// Decodes one record from the front of `input`
///
/// Returns the bytes following the record alongside it.
pub fn record(input: &[u8]) -> Result<(&[u8], Record)> {
    let (rest, hdr) = header(input).map_err(|_| {
        Error::MalformedRecord(String::from("truncated header"))
    })?;
    check_version(&hdr)?;

    let (rest, body) = framed_content(rest, hdr).map_err(|_| {
        Error::MalformedRecord(String::from("truncated content"))
    })?;

    Ok((rest, Record { id: hdr.id, content: content(hdr.kind, body)? }))
}

/// Reads one record from a byte stream
///
/// `Ok(None)` means the stream ended cleanly on a record boundary. Failures of
/// the stream itself come back as `Error::Io`.
pub fn read_record<R: Read>(mut input: R) -> Result<Option<Record>> {
    let mut head = [0u8; HEADER_LENGTH];
    let mut filled = 0;
    while filled < HEADER_LENGTH {
        match input.read(&mut head[filled ..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::MalformedRecord(
                String::from("stream closed mid-header"))),
            Ok(read) => filled += read,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
            Err(e) => return Err(Error::from(e))
        }
    }

    let (_, hdr) = header(&head[..]).map_err(|_| {
        Error::MalformedRecord(String::from("truncated header"))
    })?;
    check_version(&hdr)?;

    let content_length = hdr.content_length as usize;
    let mut body = vec![0; content_length + hdr.padding_length as usize];
    if let Err(e) = input.read_exact(&mut body) {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::MalformedRecord(
                String::from("stream closed mid-content")),
            _ => Error::from(e)
        });
    }
    body.truncate(content_length);

    Ok(Some(Record { id: hdr.id, content: content(hdr.kind, &body)? }))
}

/// Interprets a record body according to the record's kind
fn content(kind: u8, body: &[u8]) -> Result<Content> {
    let parsed = match kind {
        record_kind::BEGIN_REQUEST => fixed(begin_request(body))?,
        record_kind::ABORT_REQUEST => Content::AbortRequest(AbortRequest),
        record_kind::END_REQUEST => fixed(end_request(body))?,
        record_kind::PARAMS => Content::Params(Vec::from(body)),
        record_kind::STDIN => Content::Stdin(Vec::from(body)),
        record_kind::STDOUT => Content::Stdout(Vec::from(body)),
        record_kind::STDERR => Content::Stderr(Vec::from(body)),
        record_kind::DATA => Content::Data(Vec::from(body)),
        record_kind::GET_VALUES =>
            Content::GetValues(name_value_pairs(body)?),
        record_kind::GET_VALUES_RESULT =>
            Content::GetValuesResult(name_value_pairs(body)?),
        record_kind::UNKNOWN_TYPE => fixed(unknown_type(body))?,
        _ => Content::Other { kind: kind, body: Vec::from(body) }
    };

    Ok(parsed)
}

/// Unwraps the result of a fixed-layout body parser
fn fixed(parsed: IResult<&[u8], Content>) -> Result<Content> {
    parsed.map(|(_, content)| content).map_err(|_| {
        Error::MalformedRecord(String::from("short fixed-layout body"))
    })
}

fn begin_request(input: &[u8]) -> IResult<&[u8], Content> {
    let (rest, role) = be_u16(input)?;
    let (rest, flags) = be_u8(rest)?;
    let (rest, _) = take(5usize)(rest)?;

    let role = match Role::from_protocol_number(role) {
        Some(r) => r,
        None => return Err(nom::Err::Error(
            nom::error::Error::new(input, nom::error::ErrorKind::Verify)))
    };

    Ok((rest, Content::BeginRequest(BeginRequest { role: role, flags: flags })))
}

fn end_request(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, app_status) = be_u32(input)?;
    let (input, protocol_status) = be_u8(input)?;
    let (input, _) = take(3usize)(input)?;

    Ok((input, Content::EndRequest(EndRequest {
        app_status: app_status,
        protocol_status: protocol_status
    })))
}

fn unknown_type(input: &[u8]) -> IResult<&[u8], Content> {
    let (input, kind) = be_u8(input)?;
    let (input, _) = take(7usize)(input)?;

    Ok((input, Content::UnknownType(UnknownType(kind))))
}

/// A name or value length: one byte, or four with the high bit set
fn pair_length(input: &[u8]) -> IResult<&[u8], u32> {
    let (_, first) = be_u8(input)?;
    if first >> 7 == 1 {
        let (input, length) = be_u32(input)?;
        Ok((input, length & 0x7FFF_FFFF))
    }
    else {
        let (input, length) = be_u8(input)?;
        Ok((input, length as u32))
    }
}

fn name_value_pair(input: &[u8]) -> IResult<&[u8], NameValuePair> {
    let (input, name_length) = pair_length(input)?;
    let (input, value_length) = pair_length(input)?;
    let (input, name) = take(name_length)(input)?;
    let (input, value) = take(value_length)(input)?;

    Ok((input, NameValuePair {
        name: Vec::from(name),
        value: Vec::from(value)
    }))
}

/// Decodes a complete name-value pair stream
pub fn name_value_pairs(mut input: &[u8]) -> Result<Params> {
    let mut params = Params::new();
    while !input.is_empty() {
        let (rest, pair) = name_value_pair(input)
            .map_err(|_| Error::MalformedNameValuePair)?;
        params.insert(pair.name, pair.value);
        input = rest;
    }

    Ok(params)
}
