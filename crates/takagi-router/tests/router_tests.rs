//! Router tests: path matching precedence, parameter extraction,
//! duplicate registration, and dispatch behavior.

use serde_json::{json, Value};
use std::sync::Arc;
use takagi_core::message::{code, method};
use takagi_core::{ContentCodecs, Inbound, Message, MessageType};
use takagi_router::{Router, RouterError};

fn request(method_code: u8, path: &str) -> Inbound {
    let mut msg = Message::request(MessageType::Con, method_code).with_message_id(1);
    msg.set_path(path);
    Inbound::new(msg, None)
}

fn body(out: &takagi_core::Outbound) -> Value {
    serde_json::from_slice(out.payload()).unwrap()
}

#[test]
fn test_static_route_wins_over_parametric() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router.get("/x", |ctx| ctx.json(json!({ "route": "static" }))).unwrap();
    router
        .get("/:y", |ctx| {
            ctx.json(json!({ "route": "param", "y": ctx.param("y") }))
        })
        .unwrap();

    let out = router.dispatch(request(method::GET, "/x"));
    assert_eq!(body(&out), json!({ "route": "static" }));

    let out = router.dispatch(request(method::GET, "/z"));
    assert_eq!(body(&out), json!({ "route": "param", "y": "z" }));
}

#[test]
fn test_multi_param_extraction() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router
        .get("/users/:id/posts/:pid", |ctx| {
            ctx.json(json!({ "id": ctx.param("id"), "pid": ctx.param("pid") }))
        })
        .unwrap();

    let out = router.dispatch(request(method::GET, "/users/7/posts/42"));
    assert_eq!(body(&out), json!({ "id": "7", "pid": "42" }));
}

#[test]
fn test_slash_normalization() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router.get("/a/b", |ctx| ctx.json(json!({ "hit": true }))).unwrap();

    let out = router.dispatch(request(method::GET, "/a//b"));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(body(&out), json!({ "hit": true }));
}

#[test]
fn test_parametric_tie_break_is_lexicographic() {
    // Registered in both orders, the same pattern must win.
    for reversed in [false, true] {
        let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
        let register: Vec<&str> = if reversed {
            vec!["/items/:b", "/items/:a"]
        } else {
            vec!["/items/:a", "/items/:b"]
        };
        for pattern in register {
            let name = pattern.trim_start_matches("/items/:").to_string();
            router
                .route("GET", pattern, Default::default(), move |ctx| {
                    ctx.json(json!({ "matched": name.clone() }))
                })
                .unwrap();
        }

        let out = router.dispatch(request(method::GET, "/items/7"));
        assert_eq!(body(&out), json!({ "matched": "a" }), "reversed={reversed}");
    }
}

#[test]
fn test_duplicate_route_rejected() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router.get("/dup", |ctx| ctx.json(json!(1))).unwrap();

    let result = router.get("/dup", |ctx| ctx.json(json!(2)));
    assert!(matches!(
        result,
        Err(RouterError::DuplicateRoute { .. })
    ));
}

#[test]
fn test_method_mismatch_is_404() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router.get("/only-get", |ctx| ctx.json(json!(1))).unwrap();

    let out = router.dispatch(request(method::POST, "/only-get"));
    assert_eq!(out.code().0, code::NOT_FOUND);
}

#[test]
fn test_builtin_ping() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    let out = router.dispatch(request(method::GET, "/ping"));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(body(&out), json!({ "message": "Pong" }));
}

#[test]
fn test_builtin_echo() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));

    let mut msg = Message::request(MessageType::Con, method::POST).with_message_id(3);
    msg.set_path("/echo");
    let msg = msg.with_payload(serde_json::to_vec(&json!({ "message": "hi" })).unwrap());

    let out = router.dispatch(Inbound::new(msg, None));
    assert_eq!(out.code().0, code::CONTENT);
    assert_eq!(body(&out), json!({ "echo": "hi" }));
}

#[test]
fn test_handler_error_becomes_500() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router
        .get("/fail", |_| {
            Err(takagi_router::Abort::Error("sensor offline".into()))
        })
        .unwrap();

    let out = router.dispatch(request(method::GET, "/fail"));
    assert_eq!(out.code().0, code::INTERNAL_SERVER_ERROR);
    assert_eq!(body(&out), json!({ "error": "Internal Server Error" }));
}

#[test]
fn test_halt_surfaces_response() {
    let router = Router::new(Arc::new(ContentCodecs::with_defaults()));
    router
        .get("/guarded", |ctx| {
            takagi_router::halt(
                takagi_core::Outbound::for_request(ctx.request()).with_code(code::FORBIDDEN),
            )?;
            ctx.json(json!({ "secret": true }))
        })
        .unwrap();

    let out = router.dispatch(request(method::GET, "/guarded"));
    assert_eq!(out.code().0, code::FORBIDDEN);
    assert!(out.payload().is_empty());
}
