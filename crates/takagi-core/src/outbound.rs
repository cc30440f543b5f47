//! Response under construction
//!
//! [`Outbound`] mirrors the request it answers: on UDP a confirmable
//! request gets a piggybacked ACK echoing message id and token, a
//! non-confirmable one gets a NON; on TCP there is no type or message id.

use bytes::Bytes;
use std::collections::BTreeMap;

use crate::inbound::Inbound;
use crate::message::{encode_uint, option, Code, Message, MessageType, Transport};

/// A response being built for one request.
#[derive(Debug, Clone)]
pub struct Outbound {
    code: Code,
    mtype: Option<MessageType>,
    token: Bytes,
    message_id: Option<u16>,
    options: BTreeMap<u16, Vec<Bytes>>,
    payload: Bytes,
    transport: Transport,
}

impl Outbound {
    /// Response skeleton matched to a request: transport, token, and the
    /// CON→ACK / NON→NON type rule with message-id echo on UDP.
    pub fn for_request(req: &Inbound) -> Self {
        let (mtype, message_id) = match req.transport() {
            Transport::Tcp => (None, None),
            Transport::Udp => {
                let mtype = match req.mtype() {
                    Some(MessageType::Con) => MessageType::Ack,
                    _ => MessageType::Non,
                };
                (Some(mtype), req.message_id())
            }
        };

        Self {
            code: Code(crate::message::code::CONTENT),
            mtype,
            token: req.token().clone(),
            message_id,
            options: BTreeMap::new(),
            payload: Bytes::new(),
            transport: req.transport(),
        }
    }

    /// Bare outbound for server-initiated messages (Observe notifications).
    pub fn notification(token: Bytes, code: u8) -> Self {
        Self {
            code: Code(code),
            mtype: Some(MessageType::Non),
            token,
            message_id: Some(0),
            options: BTreeMap::new(),
            payload: Bytes::new(),
            transport: Transport::Udp,
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn with_code(mut self, code: u8) -> Self {
        self.code = Code(code);
        self
    }

    pub fn set_code(&mut self, code: u8) {
        self.code = Code(code);
    }

    pub fn with_message_id(mut self, id: u16) -> Self {
        self.message_id = Some(id);
        self
    }

    pub fn set_option(&mut self, number: u16, value: impl Into<Bytes>) {
        self.options.insert(number, vec![value.into()]);
    }

    pub fn add_option(&mut self, number: u16, value: impl Into<Bytes>) {
        self.options.entry(number).or_default().push(value.into());
    }

    pub fn set_uint_option(&mut self, number: u16, value: u64) {
        self.set_option(number, encode_uint(value));
    }

    pub fn has_option(&self, number: u16) -> bool {
        self.options.contains_key(&number)
    }

    pub fn option(&self, number: u16) -> Option<&Bytes> {
        self.options.get(&number).and_then(|v| v.first())
    }

    pub fn content_format(&self) -> Option<u16> {
        self.option(option::CONTENT_FORMAT)
            .map(|b| crate::message::decode_uint(b) as u16)
    }

    pub fn set_content_format(&mut self, format: u16) {
        self.set_uint_option(option::CONTENT_FORMAT, format as u64);
    }

    pub fn with_content_format(mut self, format: u16) -> Self {
        self.set_content_format(format);
        self
    }

    /// Observe sequence number, truncated to 24 bits on the wire.
    pub fn with_observe(mut self, sequence: u32) -> Self {
        self.set_uint_option(option::OBSERVE, (sequence & 0x00FF_FFFF) as u64);
        self
    }

    pub fn with_max_age(mut self, seconds: u32) -> Self {
        self.set_uint_option(option::MAX_AGE, seconds as u64);
        self
    }

    /// Location-Path options for a `2.01 Created` response, one segment
    /// per option.
    pub fn with_location_path(mut self, path: &str) -> Self {
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(
                option::LOCATION_PATH,
                Bytes::copy_from_slice(seg.as_bytes()),
            );
        }
        self
    }

    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        self.payload = payload.into();
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Finish into an encodable [`Message`].
    pub fn into_message(self) -> Message {
        Message {
            version: 1,
            mtype: self.mtype,
            token: self.token,
            message_id: self.message_id,
            code: self.code,
            options: self.options,
            payload: self.payload,
            transport: self.transport,
        }
    }
}
