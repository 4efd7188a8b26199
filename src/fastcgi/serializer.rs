//! Serialization of FastCGI messages

use crate::errors::{Error, Result};
use crate::fastcgi::{Content, Params, Record, Role, management_records, record_kind,
                     MAX_CONTENT_LENGTH, VERSION};

use byteorder::{BigEndian, WriteBytesExt};

use std::io::Write;

/// Largest length the name-value pair format can express
const MAX_PAIR_LENGTH: usize = 0x7FFF_FFFF;

/// Number of zero bytes that bring `content_length` up to a multiple of 8
#[inline]
pub fn padding_for(content_length: usize) -> u8 {
    ((8 - content_length % 8) % 8) as u8
}

/// Writes a header from its bits
///
/// If succesful, returns the number of bytes of padding we told the other end
/// of the connection we were going to write.
fn write_header<W: Write>(mut output: W, kind: u8, id: u16,
                          content_length: usize)
                          -> Result<u8>
{
    if content_length > MAX_CONTENT_LENGTH {
        return Err(Error::RecordTooLong);
    }

    let padding_length = padding_for(content_length);

    output.write_all(&[VERSION, kind])?;
    output.write_u16::<BigEndian>(id)?;
    output.write_u16::<BigEndian>(content_length as u16)?;
    output.write_u8(padding_length)?;
    output.write_u8(0)?; // reserved byte

    Ok(padding_length)
}

/// Writes one record with an already-encoded body
fn write_raw<W: Write>(mut output: W, kind: u8, id: u16, content: &[u8])
                       -> Result<()>
{
    let padding_length = write_header(&mut output, kind, id, content.len())?;
    output.write_all(content)?;
    output.write_all(&[0; 8][.. padding_length as usize])?;

    Ok(())
}

/// Encodes the body of a record
fn content_bytes(content: &Content) -> Result<Vec<u8>> {
    let mut body = Vec::new();

    match *content {
        Content::GetValues(ref pairs) | Content::GetValuesResult(ref pairs) =>
            body = name_value_pairs(pairs)?,
        Content::UnknownType(ref unknown) => {
            body.push(unknown.0);
            body.extend_from_slice(&[0; 7]);
        },
        Content::BeginRequest(ref begin) => {
            body.write_u16::<BigEndian>(begin.role.to_protocol_number())?;
            body.push(begin.flags);
            body.extend_from_slice(&[0; 5]);
        },
        Content::Params(ref bytes) |
        Content::Stdin(ref bytes) |
        Content::Data(ref bytes) |
        Content::Stdout(ref bytes) |
        Content::Stderr(ref bytes) |
        Content::Other { body: ref bytes, .. } =>
            body.extend_from_slice(bytes),
        Content::AbortRequest(_) => (),
        Content::EndRequest(ref end) => {
            body.write_u32::<BigEndian>(end.app_status)?;
            body.push(end.protocol_status);
            body.extend_from_slice(&[0; 3]);
        }
    }

    Ok(body)
}

/// Writes any record to the output stream
pub fn write_record<W: Write>(output: W, record: &Record) -> Result<()> {
    let body = content_bytes(&record.content)?;
    write_raw(output, record.kind(), record.id, &body)
}

/// Encodes a record into a fresh buffer
pub fn encode(record: &Record) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_record(&mut buffer, record)?;
    Ok(buffer)
}

/// Writes a `GetValues` record to the output stream
pub fn get_values<W: Write>(output: W, get_for: &[&[u8]]) -> Result<()> {
    let query: Params = get_for.iter().map(|&name| (name, &b""[..])).collect();
    write_raw(output, record_kind::GET_VALUES, 0, &name_value_pairs(&query)?)
}

/// Asks for the variables the gateway cares about
pub fn get_capabilities<W: Write>(output: W) -> Result<()> {
    get_values(output, &[management_records::MAX_CONNS,
                         management_records::MAX_REQS,
                         management_records::MPXS_CONNS])
}

/// Writes a length in the FastCGI name-value pair format
fn write_pair_length<W: Write>(mut output: W, length: usize) -> Result<()> {
    if length > MAX_PAIR_LENGTH {
        return Err(Error::RecordTooLong);
    }

    if length > 127 {
        output.write_u32::<BigEndian>(length as u32 | 0x8000_0000)?;
    }
    else {
        output.write_u8(length as u8)?;
    }

    Ok(())
}

/// Writes a name-value pair to the stream
fn write_name_val_pair<W: Write>(mut output: W, name: &[u8], val: &[u8])
                                 -> Result<()>
{
    write_pair_length(&mut output, name.len())?;
    write_pair_length(&mut output, val.len())?;
    output.write_all(name)?;
    output.write_all(val)?;

    Ok(())
}

/// Encodes a parameter set, pairs in insertion order
pub fn name_value_pairs(params: &Params) -> Result<Vec<u8>> {
    let mut encoded = Vec::new();
    for pair in params {
        write_name_val_pair(&mut encoded, &pair.name, &pair.value)?;
    }

    Ok(encoded)
}

/// Write a `BeginRequest` message
///
/// This is specialized for the Responder role. A `flags` of 0 asks the
/// application to close the connection once the request is over.
pub fn start_request<W: Write>(output: W, id: u16, flags: u8) -> Result<()> {
    let mut body = Vec::with_capacity(8);
    body.write_u16::<BigEndian>(Role::Responder.to_protocol_number())?;
    body.push(flags);
    body.extend_from_slice(&[0; 5]); // reserved

    write_raw(output, record_kind::BEGIN_REQUEST, id, &body)
}

/// Write a stream of parameters
///
/// The encoded pairs are split over as many records as they need, and the
/// stream-terminating empty record is always emitted.
pub fn params<W: Write>(mut output: W, id: u16, params: &Params) -> Result<()>
{
    let encoded = name_value_pairs(params)?;
    for chunk in encoded.chunks(MAX_CONTENT_LENGTH) {
        write_raw(&mut output, record_kind::PARAMS, id, chunk)?;
    }

    write_raw(&mut output, record_kind::PARAMS, id, &[])
}

/// Write a frame of a FCGI_STDIN stream
///
/// An empty `content` is the stream's sentinel marker.
pub fn stdin<W: Write>(output: W, id: u16, content: &[u8]) -> Result<()> {
    write_raw(output, record_kind::STDIN, id, content)
}

/// Tell the application to give up on a request
pub fn abort_request<W: Write>(output: W, id: u16) -> Result<()> {
    write_raw(output, record_kind::ABORT_REQUEST, id, &[])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fastcgi::*;
    use crate::fastcgi::parser::{self, record};

    fn round_trip(original: Record) {
        let bytes = encode(&original).unwrap();
        let (rest, decoded) = record(&bytes).unwrap();

        assert!(rest.is_empty());
        assert_eq!(decoded, original);
    }

    #[test]
    fn begin_request_matches_wire_capture() {
        let mut output = Vec::new();
        start_request(&mut output, 1, 0).unwrap();

        assert_eq!(output, [1, 1, 0, 1, 0, 8, 0, 0,
                            0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn padding_brings_records_to_eight_byte_boundaries() {
        for length in [0, 1, 7, 8, 9, 100, 65534, 65535].iter().cloned() {
            let bytes = encode(&Record {
                id: 1,
                content: Content::Stdout(vec![b'x'; length])
            }).unwrap();
            let padding = bytes[6] as usize;

            assert!(padding < 8);
            assert_eq!((length + padding) % 8, 0);
            assert_eq!(bytes.len(), 8 + length + padding);
            assert!(bytes[8 + length ..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn content_over_u16_is_rejected() {
        let result = stdin(Vec::new(), 1, &vec![0; MAX_CONTENT_LENGTH + 1]);
        match result {
            Err(Error::RecordTooLong) => (),
            other => panic!("{:?}", other)
        }
    }

    #[test]
    fn typed_records_survive_decoding() {
        round_trip(Record {
            id: 1,
            content: Content::BeginRequest(BeginRequest {
                role: Role::Responder,
                flags: 0
            })
        });
        round_trip(Record {
            id: 1,
            content: Content::EndRequest(EndRequest {
                app_status: 0xDEAD_BEEF,
                protocol_status: protocol_status::OVERLOADED
            })
        });
        round_trip(Record { id: 9, content: Content::AbortRequest(AbortRequest) });
        round_trip(Record { id: 0, content: Content::UnknownType(UnknownType(42)) });
        round_trip(Record {
            id: 3,
            content: Content::Other { kind: 200, body: b"future".to_vec() }
        });
        round_trip(Record {
            id: 0xFFFF,
            content: Content::Stderr(vec![7; MAX_CONTENT_LENGTH])
        });
    }

    #[test]
    fn pair_lengths_switch_to_four_bytes_past_127() {
        let params: Params = vec![
            (vec![b'N'; 127], vec![b'v'; 128]),
        ].into_iter().collect();

        let encoded = name_value_pairs(&params).unwrap();
        assert_eq!(encoded[0], 127);
        assert_eq!(&encoded[1 .. 5], &[0x80, 0, 0, 128]);
        assert_eq!(encoded.len(), 1 + 4 + 127 + 128);
    }

    #[test]
    fn name_value_pairs_survive_decoding() {
        let params: Params = vec![
            (b"SHORT".to_vec(), b"".to_vec()),
            (vec![b'n'; 128], b"x".to_vec()),
            (b"LONG_VALUE".to_vec(), vec![b'v'; 70000]),
            (vec![b'a'; 127], vec![b'b'; 127]),
        ].into_iter().collect();

        let encoded = name_value_pairs(&params).unwrap();
        assert_eq!(parser::name_value_pairs(&encoded).unwrap(), params);
    }

    #[test]
    fn params_stream_splits_and_terminates() {
        let params: Params = vec![
            (b"BIG".to_vec(), vec![b'z'; 100_000]),
        ].into_iter().collect();

        let mut output = Vec::new();
        super::params(&mut output, 1, &params).unwrap();

        let mut input = &output[..];
        let mut stream = Vec::new();
        let mut records = 0;
        loop {
            let (rest, rec) = record(input).unwrap();
            input = rest;
            records += 1;
            match rec.content {
                Content::Params(ref bytes) if bytes.is_empty() => break,
                Content::Params(bytes) => stream.extend(bytes),
                other => panic!("{:?}", other)
            }
        }

        assert_eq!(records, 3);
        assert!(input.is_empty());
        assert_eq!(parser::name_value_pairs(&stream).unwrap(), params);
    }

    #[test]
    fn empty_params_still_get_a_terminator() {
        let mut output = Vec::new();
        super::params(&mut output, 1, &Params::new()).unwrap();

        assert_eq!(output, [1, 4, 0, 1, 0, 0, 0, 0]);
    }
}
