//! Content-format negotiation through full route dispatch, plus the
//! response helper surface.

use bytes::Bytes;
use serde_json::{json, Value};
use std::sync::Arc;
use takagi_core::message::{code, content_format, method, option};
use takagi_core::{ContentCodecs, Inbound, Message, MessageType};
use takagi_router::{LinkAttrs, RouteOptions, Router};

fn router_with_sensor(allowed: Vec<u16>, force: Option<u16>) -> Arc<Router> {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    let options = RouteOptions {
        attrs: LinkAttrs::default(),
        allowed_formats: allowed,
        force_format: force,
    };
    router
        .route("GET", "/sensor", options, |ctx| {
            ctx.content(&json!({ "temp": 21 }))
        })
        .unwrap();
    router
}

fn get_sensor(accept: Option<u16>) -> Inbound {
    let mut msg = Message::request(MessageType::Con, method::GET).with_message_id(1);
    msg.set_path("/sensor");
    if let Some(a) = accept {
        msg.set_uint_option(option::ACCEPT, a as u64);
    }
    Inbound::new(msg, None)
}

// Accept=60 against a route allowing only {50} is 4.06.
#[test]
fn test_accept_outside_allowed_is_not_acceptable() {
    let router = router_with_sensor(vec![content_format::JSON], None);
    let out = router.dispatch(get_sensor(Some(content_format::CBOR)));
    assert_eq!(out.code().0, code::NOT_ACCEPTABLE);
}

// No Accept against a route allowing {60, 50} picks 60.
#[test]
fn test_no_accept_picks_first_allowed() {
    let router = router_with_sensor(vec![content_format::CBOR, content_format::JSON], None);
    let out = router.dispatch(get_sensor(None));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(out.content_format(), Some(content_format::CBOR));

    // The payload really is CBOR.
    let codecs = ContentCodecs::with_defaults();
    let decoded = codecs
        .decode(content_format::CBOR, out.payload())
        .unwrap();
    assert_eq!(decoded, json!({ "temp": 21 }));
}

// Accept=50 against a route allowing {50} uses 50.
#[test]
fn test_accept_inside_allowed_is_used() {
    let router = router_with_sensor(vec![content_format::JSON], None);
    let out = router.dispatch(get_sensor(Some(content_format::JSON)));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(out.content_format(), Some(content_format::JSON));
}

// A force format overrides the Accept option entirely.
#[test]
fn test_force_overrides_accept() {
    let router = router_with_sensor(
        vec![content_format::JSON],
        Some(content_format::TEXT_PLAIN),
    );
    let out = router.dispatch(get_sensor(Some(content_format::JSON)));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(out.content_format(), Some(content_format::TEXT_PLAIN));
}

// Forcing a format the serializer does not know is 4.15.
#[test]
fn test_force_unknown_is_unsupported() {
    let router = router_with_sensor(vec![content_format::JSON], Some(9999));
    let out = router.dispatch(get_sensor(None));
    assert_eq!(out.code().0, code::UNSUPPORTED_CONTENT_FORMAT);
}

// Allowed formats the serializer cannot encode fall back to JSON.
#[test]
fn test_unsupported_allowed_falls_back_to_json() {
    let router = router_with_sensor(vec![4711], None);
    let out = router.dispatch(get_sensor(None));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(out.content_format(), Some(content_format::JSON));
}

#[test]
fn test_created_at_sets_location() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router
        .post("/devices", |ctx| {
            ctx.created_at("/devices/42", &json!({ "id": 42 }))
        })
        .unwrap();

    let mut msg = Message::request(MessageType::Con, method::POST).with_message_id(9);
    msg.set_path("/devices");
    let out = router
        .dispatch(Inbound::new(msg, None))
        .into_message();

    assert_eq!(out.code.0, code::CREATED);
    let segments: Vec<&[u8]> = out
        .option_values(option::LOCATION_PATH)
        .iter()
        .map(|b| b.as_ref())
        .collect();
    assert_eq!(segments, vec![b"devices".as_ref(), b"42".as_ref()]);
}

#[test]
fn test_error_helpers_produce_error_bodies() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router.get("/locked", |ctx| ctx.forbidden("locked out")).unwrap();
    router.get("/login", |ctx| ctx.unauthorized("token expired")).unwrap();
    router.get("/odd", |ctx| ctx.bad_request("no such unit")).unwrap();

    for (path, expected_code, message) in [
        ("/locked", code::FORBIDDEN, "locked out"),
        ("/login", code::UNAUTHORIZED, "token expired"),
        ("/odd", code::BAD_REQUEST, "no such unit"),
    ] {
        let mut msg = Message::request(MessageType::Con, method::GET).with_message_id(1);
        msg.set_path(path);
        let out = router.dispatch(Inbound::new(msg, None));
        assert_eq!(out.code().0, expected_code, "{path}");
        let body: Value = serde_json::from_slice(out.payload()).unwrap();
        assert_eq!(body, json!({ "error": message }), "{path}");
    }
}

#[test]
fn test_request_body_reaches_handler() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router
        .put("/config/:key", |ctx| {
            let body = ctx.request().json()?;
            ctx.changed(&json!({
                "key": ctx.param("key"),
                "value": body["value"],
            }))
        })
        .unwrap();

    let mut msg = Message::request(MessageType::Con, method::PUT).with_message_id(2);
    msg.set_path("/config/interval");
    let msg = msg.with_payload(Bytes::from(
        serde_json::to_vec(&json!({ "value": 30 })).unwrap(),
    ));

    let out = router.dispatch(Inbound::new(msg, None));
    assert_eq!(out.code().0, code::CHANGED);
    let body: Value = serde_json::from_slice(out.payload()).unwrap();
    assert_eq!(body, json!({ "key": "interval", "value": 30 }));
}
