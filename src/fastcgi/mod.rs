#![allow(dead_code)]

pub mod driver;
pub mod parser;
pub mod serializer;

/// The only protocol version there is
pub const VERSION: u8 = 1;

/// Size of the fixed record header
pub const HEADER_LENGTH: usize = 8;

/// Largest body a single record can carry
pub const MAX_CONTENT_LENGTH: usize = 0xFFFF;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Record {
    pub id: u16,
    pub content: Content
}

impl Record {
    #[inline]
    pub fn kind(&self) -> u8 {
        self.content.kind()
    }
}

/// The body of a record, typed by record kind
///
/// `Params` carries raw bytes rather than pairs: a parameter stream may split
/// a pair across record boundaries, so pairs only make sense once the whole
/// stream has been concatenated.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Content {
    GetValues(Params),
    GetValuesResult(Params),
    UnknownType(UnknownType),
    BeginRequest(BeginRequest),
    Params(Vec<u8>),
    Stdin(Vec<u8>),
    Data(Vec<u8>),
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    AbortRequest(AbortRequest),
    EndRequest(EndRequest),
    /// A record kind this implementation does not know
    Other { kind: u8, body: Vec<u8> }
}

impl Content {
    pub fn kind(&self) -> u8 {
        match *self {
            Content::GetValues(_) => record_kind::GET_VALUES,
            Content::GetValuesResult(_) => record_kind::GET_VALUES_RESULT,
            Content::UnknownType(_) => record_kind::UNKNOWN_TYPE,
            Content::BeginRequest(_) => record_kind::BEGIN_REQUEST,
            Content::Params(_) => record_kind::PARAMS,
            Content::Stdin(_) => record_kind::STDIN,
            Content::Data(_) => record_kind::DATA,
            Content::Stdout(_) => record_kind::STDOUT,
            Content::Stderr(_) => record_kind::STDERR,
            Content::AbortRequest(_) => record_kind::ABORT_REQUEST,
            Content::EndRequest(_) => record_kind::END_REQUEST,
            Content::Other { kind, .. } => kind
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NameValuePair {
    pub name: Vec<u8>,
    pub value: Vec<u8>
}

/// A set of name-value pairs, kept in insertion order
///
/// Names are unique. Inserting a name that is already present replaces its
/// value where it stands.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Params {
    pairs: Vec<NameValuePair>
}

impl Params {
    pub fn new() -> Params {
        Params { pairs: Vec::new() }
    }

    pub fn insert<N, V>(&mut self, name: N, value: V)
        where N: Into<Vec<u8>>, V: Into<Vec<u8>>
    {
        let name = name.into();
        let value = value.into();

        match self.pairs.iter_mut().find(|pair| pair.name == name) {
            Some(pair) => pair.value = value,
            None => self.pairs.push(NameValuePair { name: name, value: value })
        }
    }

    pub fn get<N: AsRef<[u8]>>(&self, name: N) -> Option<&[u8]> {
        self.pairs.iter()
            .find(|pair| pair.name == name.as_ref())
            .map(|pair| pair.value.as_slice())
    }

    pub fn contains<N: AsRef<[u8]>>(&self, name: N) -> bool {
        self.get(name).is_some()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> ::std::slice::Iter<'_, NameValuePair> {
        self.pairs.iter()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = &'a NameValuePair;
    type IntoIter = ::std::slice::Iter<'a, NameValuePair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}

impl<N, V> ::std::iter::FromIterator<(N, V)> for Params
    where N: Into<Vec<u8>>, V: Into<Vec<u8>>
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Params {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BeginRequest {
    pub role: Role,
    pub flags: u8
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct UnknownType(pub u8);

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct AbortRequest;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Role {
    Responder,
    Authorizer,
    Filter
}

impl Role {
    /// Returns the protocol's number for this role
    pub fn to_protocol_number(self) -> u16 {
        match self {
            Role::Responder => 1,
            Role::Authorizer => 2,
            Role::Filter => 3
        }
    }

    pub fn from_protocol_number(number: u16) -> Option<Role> {
        match number {
            1 => Some(Role::Responder),
            2 => Some(Role::Authorizer),
            3 => Some(Role::Filter),
            _ => None
        }
    }
}

pub mod record_kind {
    pub const BEGIN_REQUEST: u8 = 1;
    pub const ABORT_REQUEST: u8 = 2;
    pub const END_REQUEST: u8 = 3;
    pub const PARAMS: u8 = 4;
    pub const STDIN: u8 = 5;
    pub const STDOUT: u8 = 6;
    pub const STDERR: u8 = 7;
    pub const DATA: u8 = 8;
    pub const GET_VALUES: u8 = 9;
    pub const GET_VALUES_RESULT: u8 = 10;
    pub const UNKNOWN_TYPE: u8 = 11;
}

pub mod protocol_status {
    pub const REQUEST_COMPLETE: u8 = 0;
    pub const CANT_MPX_CONN: u8 = 1;
    pub const OVERLOADED: u8 = 2;
    pub const UNKNOWN_ROLE: u8 = 3;
}

pub mod management_records {
    pub const MAX_CONNS: &[u8] = b"FCGI_MAX_CONNS";
    pub const MAX_REQS: &[u8] = b"FCGI_MAX_REQS";
    pub const MPXS_CONNS: &[u8] = b"FCGI_MPXS_CONNS";
}
