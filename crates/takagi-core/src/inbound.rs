//! Parsed inbound request
//!
//! [`Inbound`] wraps a decoded request [`Message`] together with the peer
//! address and exposes the request helpers handlers and middleware work
//! with: method queries, Accept/Content-Format access, query parameters,
//! and URI reconstruction from options.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::message::{decode_uint, method, option, Code, Message, MessageType, Transport};
use crate::DEFAULT_PORT;

/// A parsed request plus its network origin.
#[derive(Debug, Clone)]
pub struct Inbound {
    message: Message,
    peer: Option<SocketAddr>,
}

impl Inbound {
    pub fn new(message: Message, peer: Option<SocketAddr>) -> Self {
        Self { message, peer }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn transport(&self) -> Transport {
        self.message.transport
    }

    pub fn code(&self) -> Code {
        self.message.code
    }

    pub fn mtype(&self) -> Option<MessageType> {
        self.message.mtype
    }

    pub fn token(&self) -> &Bytes {
        &self.message.token
    }

    pub fn message_id(&self) -> Option<u16> {
        self.message.message_id
    }

    /// Method name from the request code (`GET`, `POST`, ...).
    pub fn method(&self) -> &'static str {
        match self.message.code.0 {
            method::GET => "GET",
            method::POST => "POST",
            method::PUT => "PUT",
            method::DELETE => "DELETE",
            method::FETCH => "FETCH",
            method::PATCH => "PATCH",
            method::IPATCH => "iPATCH",
            _ => "UNKNOWN",
        }
    }

    pub fn is_get(&self) -> bool {
        self.message.code.0 == method::GET
    }

    pub fn is_post(&self) -> bool {
        self.message.code.0 == method::POST
    }

    pub fn is_put(&self) -> bool {
        self.message.code.0 == method::PUT
    }

    pub fn is_delete(&self) -> bool {
        self.message.code.0 == method::DELETE
    }

    /// A GET carrying an Observe option.
    pub fn is_observe(&self) -> bool {
        self.is_get() && self.message.has_option(option::OBSERVE)
    }

    /// Observe=0, registering a subscription.
    pub fn observe_register(&self) -> bool {
        self.is_observe() && self.message.uint_option(option::OBSERVE) == Some(0)
    }

    /// Observe=1, cancelling a subscription.
    pub fn observe_deregister(&self) -> bool {
        self.is_observe() && self.message.uint_option(option::OBSERVE) == Some(1)
    }

    /// The Accept option as a content-format code.
    pub fn accept(&self) -> Option<u16> {
        self.message.uint_option(option::ACCEPT).map(|v| v as u16)
    }

    /// Whether the request accepts the given content format. A request
    /// without an Accept option accepts everything.
    pub fn accepts(&self, format: u16) -> bool {
        match self.accept() {
            Some(accepted) => accepted == format,
            None => true,
        }
    }

    pub fn content_format(&self) -> Option<u16> {
        self.message
            .uint_option(option::CONTENT_FORMAT)
            .map(|v| v as u16)
    }

    /// Normalized request path from the Uri-Path options.
    pub fn path(&self) -> String {
        self.message.path()
    }

    /// Query parameters from repeated Uri-Query options. A query without
    /// `=` maps to the empty string.
    pub fn query_params(&self) -> HashMap<String, String> {
        let mut params = HashMap::new();
        for raw in self.message.option_values(option::URI_QUERY) {
            let text = String::from_utf8_lossy(raw);
            match text.split_once('=') {
                Some((k, v)) => params.insert(k.to_string(), v.to_string()),
                None => params.insert(text.to_string(), String::new()),
            };
        }
        params
    }

    /// First value of an arbitrary option.
    pub fn option(&self, number: u16) -> Option<&Bytes> {
        self.message.option(number)
    }

    pub fn has_option(&self, number: u16) -> bool {
        self.message.has_option(number)
    }

    pub fn uint_option(&self, number: u16) -> Option<u64> {
        self.message.uint_option(number)
    }

    pub fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    /// Payload parsed as JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_slice(&self.message.payload).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Payload as UTF-8 text.
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.message.payload.to_vec())
            .map_err(|e| Error::Decode(e.to_string()))
    }

    /// Reconstruct the request URI from Uri-Host, Uri-Port, Uri-Path and
    /// Uri-Query options, falling back to the peer address for the host.
    pub fn uri(&self) -> String {
        let scheme = match self.transport() {
            Transport::Udp => "coap",
            Transport::Tcp => "coap+tcp",
        };

        let host = self
            .message
            .option(option::URI_HOST)
            .map(|b| String::from_utf8_lossy(b).to_string())
            .or_else(|| self.peer.map(|p| p.ip().to_string()))
            .unwrap_or_else(|| "localhost".to_string());

        let port = self
            .message
            .option(option::URI_PORT)
            .map(|b| decode_uint(b) as u16)
            .unwrap_or(DEFAULT_PORT);

        let mut uri = format!("{scheme}://{host}");
        if port != DEFAULT_PORT {
            uri.push_str(&format!(":{port}"));
        }
        uri.push_str(&self.path());

        let queries = self.message.option_values(option::URI_QUERY);
        if !queries.is_empty() {
            let joined: Vec<String> = queries
                .iter()
                .map(|q| String::from_utf8_lossy(q).to_string())
                .collect();
            uri.push('?');
            uri.push_str(&joined.join("&"));
        }
        uri
    }
}
