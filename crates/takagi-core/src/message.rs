//! CoAP message model
//!
//! A [`Message`] is the parsed form of one CoAP exchange unit, shared by the
//! UDP (RFC 7252) and TCP (RFC 8323) framings. TCP messages carry no
//! version, type, or message id.
//!
//! Options are an ordered multimap: numbers ascend on the wire and repeated
//! numbers (Uri-Path, Uri-Query) preserve insertion order.

use bytes::Bytes;
use std::collections::BTreeMap;

/// Request method codes (code class 0)
pub mod method {
    pub const GET: u8 = 1;
    pub const POST: u8 = 2;
    pub const PUT: u8 = 3;
    pub const DELETE: u8 = 4;
    pub const FETCH: u8 = 5;
    pub const PATCH: u8 = 6;
    pub const IPATCH: u8 = 7;
}

/// Response codes (class.detail encoded as class*32 + detail)
pub mod code {
    pub const EMPTY: u8 = 0;

    pub const CREATED: u8 = 65; // 2.01
    pub const DELETED: u8 = 66; // 2.02
    pub const VALID: u8 = 67; // 2.03
    pub const CHANGED: u8 = 68; // 2.04
    pub const CONTENT: u8 = 69; // 2.05
    pub const CONTINUE: u8 = 95; // 2.31

    pub const BAD_REQUEST: u8 = 128; // 4.00
    pub const UNAUTHORIZED: u8 = 129; // 4.01
    pub const BAD_OPTION: u8 = 130; // 4.02
    pub const FORBIDDEN: u8 = 131; // 4.03
    pub const NOT_FOUND: u8 = 132; // 4.04
    pub const METHOD_NOT_ALLOWED: u8 = 133; // 4.05
    pub const NOT_ACCEPTABLE: u8 = 134; // 4.06
    pub const PRECONDITION_FAILED: u8 = 140; // 4.12
    pub const REQUEST_ENTITY_TOO_LARGE: u8 = 141; // 4.13
    pub const UNSUPPORTED_CONTENT_FORMAT: u8 = 143; // 4.15

    pub const INTERNAL_SERVER_ERROR: u8 = 160; // 5.00
    pub const NOT_IMPLEMENTED: u8 = 161; // 5.01
    pub const BAD_GATEWAY: u8 = 162; // 5.02
    pub const SERVICE_UNAVAILABLE: u8 = 163; // 5.03
    pub const GATEWAY_TIMEOUT: u8 = 164; // 5.04
    pub const PROXYING_NOT_SUPPORTED: u8 = 165; // 5.05
}

/// Signaling codes (RFC 8323, class 7)
pub mod signaling {
    pub const CSM: u8 = 225; // 7.01
    pub const PING: u8 = 226; // 7.02
    pub const PONG: u8 = 227; // 7.03
    pub const RELEASE: u8 = 228; // 7.04
    pub const ABORT: u8 = 229; // 7.05
}

/// Option numbers (RFC 7252 §5.10 and RFC 7641)
pub mod option {
    pub const IF_MATCH: u16 = 1;
    pub const URI_HOST: u16 = 3;
    pub const ETAG: u16 = 4;
    pub const IF_NONE_MATCH: u16 = 5;
    pub const OBSERVE: u16 = 6;
    pub const URI_PORT: u16 = 7;
    pub const LOCATION_PATH: u16 = 8;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const MAX_AGE: u16 = 14;
    pub const URI_QUERY: u16 = 15;
    pub const ACCEPT: u16 = 17;
    pub const LOCATION_QUERY: u16 = 20;
    pub const BLOCK2: u16 = 23;
    pub const BLOCK1: u16 = 27;
    pub const SIZE2: u16 = 28;
    pub const PROXY_URI: u16 = 35;
    pub const PROXY_SCHEME: u16 = 39;
    pub const SIZE1: u16 = 60;
}

/// CSM option numbers (RFC 8323 §5.3, distinct from the request option space)
pub mod csm_option {
    pub const MAX_MESSAGE_SIZE: u16 = 2;
    pub const BLOCK_WISE_TRANSFER: u16 = 4;
}

/// Content-format codes (RFC 7252 §12.3)
pub mod content_format {
    pub const TEXT_PLAIN: u16 = 0;
    pub const LINK_FORMAT: u16 = 40;
    pub const XML: u16 = 41;
    pub const OCTET_STREAM: u16 = 42;
    pub const EXI: u16 = 47;
    pub const JSON: u16 = 50;
    pub const CBOR: u16 = 60;
}

/// UDP message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Confirmable
    Con = 0,
    /// Non-confirmable
    Non = 1,
    /// Acknowledgement
    Ack = 2,
    /// Reset
    Rst = 3,
}

impl MessageType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(MessageType::Con),
            1 => Some(MessageType::Non),
            2 => Some(MessageType::Ack),
            3 => Some(MessageType::Rst),
            _ => None,
        }
    }
}

/// Transport a message was received on or is destined for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    #[default]
    Udp,
    Tcp,
}

/// An 8-bit CoAP code: upper 3 bits class, lower 5 bits detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Code(pub u8);

impl Code {
    /// Build a code from class and detail (`class*32 + detail`).
    pub const fn new(class: u8, detail: u8) -> Self {
        Code(class << 5 | (detail & 0x1F))
    }

    pub const fn class(self) -> u8 {
        self.0 >> 5
    }

    pub const fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    /// Empty message (0.00)
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Request codes occupy class 0 with a non-zero detail.
    pub const fn is_request(self) -> bool {
        self.class() == 0 && self.detail() != 0
    }

    pub const fn is_response(self) -> bool {
        matches!(self.class(), 2 | 4 | 5)
    }

    pub const fn is_signaling(self) -> bool {
        self.class() == 7
    }

    pub const fn is_success(self) -> bool {
        self.class() == 2
    }

    pub const fn is_client_error(self) -> bool {
        self.class() == 4
    }

    pub const fn is_server_error(self) -> bool {
        self.class() == 5
    }

    pub const fn is_error(self) -> bool {
        self.is_client_error() || self.is_server_error()
    }

    /// Dotted display form, e.g. `2.05` or `4.04`.
    pub fn dotted(self) -> String {
        format!("{}.{:02}", self.class(), self.detail())
    }
}

impl From<u8> for Code {
    fn from(v: u8) -> Self {
        Code(v)
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

/// A parsed CoAP message.
///
/// Immutable after parse on the receive path; the builder-style setters are
/// used when constructing outgoing messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Protocol version, always 1 on UDP. Absent on TCP.
    pub version: u8,
    /// Message type; `None` on TCP.
    pub mtype: Option<MessageType>,
    /// Opaque request/response correlator, 0-8 bytes.
    pub token: Bytes,
    /// 16-bit id for deduplication and ACK pairing; `None` on TCP.
    pub message_id: Option<u16>,
    /// Request method, response code, or signaling code.
    pub code: Code,
    /// Ordered option multimap.
    pub options: BTreeMap<u16, Vec<Bytes>>,
    /// Payload bytes; empty means no marker on the wire.
    pub payload: Bytes,
    /// Framing this message uses.
    pub transport: Transport,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            version: 1,
            mtype: Some(MessageType::Con),
            token: Bytes::new(),
            message_id: Some(0),
            code: Code(0),
            options: BTreeMap::new(),
            payload: Bytes::new(),
            transport: Transport::Udp,
        }
    }
}

impl Message {
    /// New UDP request with the given method code.
    pub fn request(mtype: MessageType, method: u8) -> Self {
        Self {
            mtype: Some(mtype),
            code: Code(method),
            ..Default::default()
        }
    }

    /// New TCP message with the given code.
    pub fn tcp(code: u8) -> Self {
        Self {
            mtype: None,
            message_id: None,
            code: Code(code),
            transport: Transport::Tcp,
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_message_id(mut self, id: u16) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Replace all values of an option.
    pub fn set_option(&mut self, number: u16, value: impl Into<Bytes>) {
        self.options.insert(number, vec![value.into()]);
    }

    /// Append a repeated value for an option.
    pub fn add_option(&mut self, number: u16, value: impl Into<Bytes>) {
        self.options.entry(number).or_default().push(value.into());
    }

    /// Set an option to a minimally encoded unsigned integer.
    pub fn set_uint_option(&mut self, number: u16, value: u64) {
        self.set_option(number, encode_uint(value));
    }

    /// All values of an option, in insertion order.
    pub fn option_values(&self, number: u16) -> &[Bytes] {
        self.options.get(&number).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of an option.
    pub fn option(&self, number: u16) -> Option<&Bytes> {
        self.options.get(&number).and_then(|v| v.first())
    }

    pub fn has_option(&self, number: u16) -> bool {
        self.options.contains_key(&number)
    }

    /// First value of an option decoded as an unsigned integer.
    pub fn uint_option(&self, number: u16) -> Option<u64> {
        self.option(number).map(|b| decode_uint(b))
    }

    /// Joined Uri-Path as `/a/b/c`; `/` when no Uri-Path options exist.
    pub fn path(&self) -> String {
        let segments = self.option_values(option::URI_PATH);
        if segments.is_empty() {
            return "/".to_string();
        }
        let mut path = String::new();
        for seg in segments {
            path.push('/');
            path.push_str(&String::from_utf8_lossy(seg));
        }
        path
    }

    /// Split a path into Uri-Path options. Empty segments are skipped, so
    /// `/a//b` and `/a/b/` both produce the segments `a`, `b`.
    pub fn set_path(&mut self, path: &str) {
        self.options.remove(&option::URI_PATH);
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(option::URI_PATH, Bytes::copy_from_slice(seg.as_bytes()));
        }
    }

    /// Append a Uri-Query option.
    pub fn add_query(&mut self, query: &str) {
        self.add_option(option::URI_QUERY, Bytes::copy_from_slice(query.as_bytes()));
    }
}

/// Minimal big-endian encoding of an unsigned integer: no leading zeros,
/// zero encodes to zero bytes.
pub fn encode_uint(value: u64) -> Bytes {
    if value == 0 {
        return Bytes::new();
    }
    let be = value.to_be_bytes();
    let skip = be.iter().take_while(|&&b| b == 0).count();
    Bytes::copy_from_slice(&be[skip..])
}

/// Big-endian decoding of an unsigned integer option value.
pub fn decode_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classes() {
        assert!(Code(code::CONTENT).is_success());
        assert!(Code(code::NOT_FOUND).is_client_error());
        assert!(Code(code::INTERNAL_SERVER_ERROR).is_server_error());
        assert!(Code(code::NOT_FOUND).is_error());
        assert!(!Code(code::CONTENT).is_error());
        assert!(Code(method::GET).is_request());
        assert!(Code(signaling::CSM).is_signaling());
    }

    #[test]
    fn test_code_dotted() {
        assert_eq!(Code(69).dotted(), "2.05");
        assert_eq!(Code(132).dotted(), "4.04");
        assert_eq!(Code::new(2, 5).0, 69);
        assert_eq!(Code::new(4, 4).0, 132);
    }

    #[test]
    fn test_uint_minimal() {
        assert_eq!(encode_uint(0).len(), 0);
        assert_eq!(encode_uint(8_388_864).as_ref(), &[0x80, 0x01, 0x00]);
        assert_eq!(decode_uint(&[0x80, 0x01, 0x00]), 8_388_864);
        assert_eq!(decode_uint(&[]), 0);
    }

    #[test]
    fn test_path_round_trip() {
        let mut msg = Message::default();
        msg.set_path("/sensors/temp");
        assert_eq!(msg.option_values(option::URI_PATH).len(), 2);
        assert_eq!(msg.path(), "/sensors/temp");

        msg.set_path("/a//b/");
        assert_eq!(msg.path(), "/a/b");
    }

    #[test]
    fn test_repeated_options_preserve_order() {
        let mut msg = Message::default();
        msg.add_query("b=2");
        msg.add_query("a=1");
        let values = msg.option_values(option::URI_QUERY);
        assert_eq!(values[0].as_ref(), b"b=2");
        assert_eq!(values[1].as_ref(), b"a=1");
    }
}
