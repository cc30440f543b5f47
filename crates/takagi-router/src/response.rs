//! Response construction and content-format negotiation
//!
//! Handlers receive a [`Context`]: the parsed request, extracted path
//! parameters, and typed response helpers bound to the route's allowed
//! content formats. Negotiation order: a forced format wins (or 4.15 when
//! unregistered), then the request's Accept option (4.06 when unsupported
//! or not allowed), then the first allowed format the serializer supports,
//! then JSON.

use serde_json::{json, Value};
use std::sync::Arc;

use takagi_core::message::{code, content_format, option};
use takagi_core::{ContentCodecs, Inbound, Outbound};

use crate::route::Params;

/// Early exit from a handler.
#[derive(Debug)]
pub enum Abort {
    /// Surface this response and skip the rest of the handler.
    Halt(Outbound),
    /// Handler failure, converted to 5.00 at the middleware boundary.
    Error(String),
}

impl From<takagi_core::Error> for Abort {
    fn from(e: takagi_core::Error) -> Self {
        Abort::Error(e.to_string())
    }
}

/// What a handler returns.
pub type HandlerResult = std::result::Result<Outbound, Abort>;

/// Abort the handler and surface the given response.
pub fn halt<T>(response: Outbound) -> std::result::Result<T, Abort> {
    Err(Abort::Halt(response))
}

/// Outcome of content-format negotiation.
fn negotiate(
    request: &Inbound,
    allowed: &[u16],
    force: Option<u16>,
    codecs: &ContentCodecs,
) -> std::result::Result<u16, u8> {
    if let Some(forced) = force {
        if !codecs.supports(forced) {
            return Err(code::UNSUPPORTED_CONTENT_FORMAT);
        }
        return Ok(forced);
    }

    if let Some(accept) = request.accept() {
        if codecs.supports(accept) && allowed.contains(&accept) {
            return Ok(accept);
        }
        return Err(code::NOT_ACCEPTABLE);
    }

    Ok(allowed
        .iter()
        .copied()
        .find(|f| codecs.supports(*f))
        .unwrap_or(content_format::JSON))
}

/// Per-dispatch handler context: request, path parameters, and response
/// helpers bound to the route's negotiation settings.
pub struct Context {
    request: Inbound,
    params: Params,
    codecs: Arc<ContentCodecs>,
    allowed: Vec<u16>,
    force: Option<u16>,
}

impl Context {
    pub fn new(
        request: Inbound,
        params: Params,
        codecs: Arc<ContentCodecs>,
        allowed: Vec<u16>,
        force: Option<u16>,
    ) -> Self {
        Self {
            request,
            params,
            codecs,
            allowed,
            force,
        }
    }

    pub fn request(&self) -> &Inbound {
        &self.request
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// A captured path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn codecs(&self) -> &Arc<ContentCodecs> {
        &self.codecs
    }

    // =========================================================================
    // Negotiated responses
    // =========================================================================

    /// Respond with a payload object, negotiating the content format
    /// against the route's allowed list and the request's Accept option.
    pub fn respond(&self, response_code: u8, payload: &Value) -> HandlerResult {
        let format = match negotiate(&self.request, &self.allowed, self.force, &self.codecs) {
            Ok(format) => format,
            Err(error_code) => {
                return Ok(Outbound::for_request(&self.request).with_code(error_code));
            }
        };

        let bytes = self.codecs.encode(format, payload)?;
        let mut out = Outbound::for_request(&self.request).with_code(response_code);
        if !out.has_option(option::CONTENT_FORMAT) {
            out.set_content_format(format);
        }
        out.set_payload(bytes);
        Ok(out)
    }

    /// Respond with pre-encoded bytes in an explicit content format,
    /// bypassing negotiation and payload encoding.
    pub fn raw(&self, response_code: u8, format: u16, bytes: impl Into<bytes::Bytes>) -> HandlerResult {
        let mut out = Outbound::for_request(&self.request).with_code(response_code);
        out.set_content_format(format);
        out.set_payload(bytes.into());
        Ok(out)
    }

    /// `2.05 Content` with a JSON payload.
    pub fn json(&self, payload: Value) -> HandlerResult {
        let bytes = self.codecs.encode(content_format::JSON, &payload)?;
        let mut out = Outbound::for_request(&self.request).with_code(code::CONTENT);
        out.set_content_format(content_format::JSON);
        out.set_payload(bytes);
        Ok(out)
    }

    /// `2.05 Content` with an `application/link-format` payload.
    pub fn link_format(&self, body: String) -> HandlerResult {
        self.raw(code::CONTENT, content_format::LINK_FORMAT, body.into_bytes())
    }

    pub fn content(&self, payload: &Value) -> HandlerResult {
        self.respond(code::CONTENT, payload)
    }

    pub fn created(&self, payload: &Value) -> HandlerResult {
        self.respond(code::CREATED, payload)
    }

    /// `2.01 Created` carrying the new resource's Location-Path.
    pub fn created_at(&self, location: &str, payload: &Value) -> HandlerResult {
        Ok(self
            .respond(code::CREATED, payload)?
            .with_location_path(location))
    }

    pub fn changed(&self, payload: &Value) -> HandlerResult {
        self.respond(code::CHANGED, payload)
    }

    pub fn deleted(&self, payload: &Value) -> HandlerResult {
        self.respond(code::DELETED, payload)
    }

    pub fn valid(&self, payload: &Value) -> HandlerResult {
        self.respond(code::VALID, payload)
    }

    // =========================================================================
    // Error responses
    // =========================================================================

    /// Error response with a `{"error": message}` JSON body.
    pub fn error(&self, response_code: u8, message: &str) -> HandlerResult {
        let body = json!({ "error": message });
        let bytes = self.codecs.encode(content_format::JSON, &body)?;
        let mut out = Outbound::for_request(&self.request).with_code(response_code);
        out.set_content_format(content_format::JSON);
        out.set_payload(bytes);
        Ok(out)
    }

    pub fn bad_request(&self, message: &str) -> HandlerResult {
        self.error(code::BAD_REQUEST, message)
    }

    pub fn unauthorized(&self, message: &str) -> HandlerResult {
        self.error(code::UNAUTHORIZED, message)
    }

    pub fn forbidden(&self, message: &str) -> HandlerResult {
        self.error(code::FORBIDDEN, message)
    }

    pub fn not_found(&self, message: &str) -> HandlerResult {
        self.error(code::NOT_FOUND, message)
    }

    pub fn method_not_allowed(&self, message: &str) -> HandlerResult {
        self.error(code::METHOD_NOT_ALLOWED, message)
    }

    pub fn not_acceptable(&self, message: &str) -> HandlerResult {
        self.error(code::NOT_ACCEPTABLE, message)
    }

    pub fn unsupported_content_format(&self, message: &str) -> HandlerResult {
        self.error(code::UNSUPPORTED_CONTENT_FORMAT, message)
    }

    pub fn internal_server_error(&self) -> HandlerResult {
        self.error(code::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

/// Build the stock `4.04 Not Found` response for a request.
pub fn not_found_response(request: &Inbound, codecs: &ContentCodecs) -> Outbound {
    error_response(request, codecs, code::NOT_FOUND, "Not Found")
}

/// Build the stock `5.00` response for a request.
pub fn internal_error_response(request: &Inbound, codecs: &ContentCodecs) -> Outbound {
    error_response(request, codecs, code::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

fn error_response(
    request: &Inbound,
    codecs: &ContentCodecs,
    response_code: u8,
    message: &str,
) -> Outbound {
    let mut out = Outbound::for_request(request).with_code(response_code);
    if let Ok(bytes) = codecs.encode(content_format::JSON, &json!({ "error": message })) {
        out.set_content_format(content_format::JSON);
        out.set_payload(bytes);
    }
    out
}
