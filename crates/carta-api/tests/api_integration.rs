//! API integration tests.
//!
//! Tests the complete request flow: HTTP → routes → catalog → store.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use carta_api::config::Config;
use carta_api::server::{Server, ServerBuilder};

const TEST_JWT_SECRET: &str = "test-jwt-secret";

fn debug_server() -> Server {
    ServerBuilder::new().debug(true).build()
}

fn prod_server() -> Server {
    let config = Config {
        debug: false,
        auth: carta_api::config::AuthConfig {
            hs256_secret: Some(TEST_JWT_SECRET.to_string()),
            ..carta_api::config::AuthConfig::default()
        },
        ..Config::default()
    };
    ServerBuilder::new().config(config).build()
}

fn sha(c: char) -> String {
    c.to_string().repeat(128)
}

fn record(name: &str, sha512: &str, locations: Value) -> Value {
    json!({
        "logical_name": name,
        "checksum": {"sha512": sha512},
        "file_size": 1024,
        "locations": locations,
    })
}

#[tokio::test]
async fn health_and_ready_respond() -> Result<()> {
    let server = debug_server();
    let (status, body) = helpers::get_json(&server, "/health").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("status"), Some(&json!("ok")));

    let (status, body) = helpers::get_json(&server, "/ready").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("ready"), Some(&json!(true)));
    Ok(())
}

#[tokio::test]
async fn create_then_get_roundtrip() -> Result<()> {
    let server = debug_server();

    let posted = record(
        "/a/b.dat",
        &sha('a'),
        json!([{"site": "WIPAC", "path": "/a/b.dat"}]),
    );
    let (status, body) = helpers::post_json(&server, "/api/files", posted.clone()).await?;
    assert_eq!(status, StatusCode::CREATED);
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    let (status, stored) = helpers::get_json(&server, &format!("/api/files/{uuid}")).await?;
    assert_eq!(status, StatusCode::OK);
    for (key, value) in posted.as_object().unwrap() {
        assert_eq!(stored.get(key), Some(value), "field {key} changed");
    }
    assert!(stored.get("meta_modify_date").is_some());
    assert!(stored.get("_links").is_some());
    Ok(())
}

#[tokio::test]
async fn replica_lifecycle_matches_protocol() -> Result<()> {
    let server = debug_server();

    // First POST: creation.
    let (status, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('1'), json!([{"site": "X", "path": "/a/b.dat"}])),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    // Same file-version, one new location: 200 against the same record.
    let (status, body) = helpers::post_json(
        &server,
        "/api/files",
        record(
            "/a/b.dat",
            &sha('1'),
            json!([{"site": "Y", "path": "/tape/b.dat"}]),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.get("uuid").and_then(Value::as_str), Some(uuid.as_str()));

    let (_, stored) = helpers::get_json(&server, &format!("/api/files/{uuid}")).await?;
    assert_eq!(stored.get("locations").unwrap().as_array().unwrap().len(), 2);

    // Only known locations: 409 replica already recorded.
    let (status, body) = helpers::post_json(
        &server,
        "/api/files",
        record(
            "/a/b.dat",
            &sha('1'),
            json!([{"site": "Y", "path": "/tape/b.dat"}]),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body.pointer("/conflict/uuid").and_then(Value::as_str),
        Some(uuid.as_str())
    );
    Ok(())
}

#[tokio::test]
async fn same_name_different_checksum_conflicts_with_reference() -> Result<()> {
    let server = debug_server();

    let (_, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('1'), json!([{"site": "X", "path": "/a/b.dat"}])),
    )
    .await?;
    let first_uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    let (status, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('2'), json!([{"site": "Y", "path": "/other"}])),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body.pointer("/conflict/uuid").and_then(Value::as_str),
        Some(first_uuid.as_str()),
        "conflict must reference the blocking record"
    );
    assert_eq!(
        body.pointer("/conflict/file").and_then(Value::as_str),
        Some(format!("/api/files/{first_uuid}").as_str())
    );
    Ok(())
}

#[tokio::test]
async fn malformed_checksum_is_a_400_naming_the_field() -> Result<()> {
    let server = debug_server();

    let (status, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", "not-hex", json!([{"site": "X", "path": "/p"}])),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body.get("message").and_then(Value::as_str).unwrap();
    assert!(message.contains("sha512"), "message was: {message}");
    Ok(())
}

#[tokio::test]
async fn missing_mandatory_field_is_named() -> Result<()> {
    let server = debug_server();

    let mut posted = record("/a/b.dat", &sha('a'), json!([{"site": "X", "path": "/p"}]));
    posted.as_object_mut().unwrap().remove("file_size");

    let (status, body) = helpers::post_json(&server, "/api/files", posted).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body.get("message").and_then(Value::as_str).unwrap();
    assert!(message.contains("file_size"), "message was: {message}");
    Ok(())
}

#[tokio::test]
async fn etag_flow_rejects_stale_put_and_keeps_patch_result() -> Result<()> {
    let server = debug_server();

    let (_, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('a'), json!([{"site": "X", "path": "/a/b.dat"}])),
    )
    .await?;
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    // Capture the fingerprint before the concurrent modification.
    let (etag, _) = helpers::get_with_etag(&server, &format!("/api/files/{uuid}")).await?;
    let stale = etag.expect("ETag on GET");

    // A concurrent PATCH succeeds and moves the fingerprint.
    let (status, _) = helpers::send_json(
        &server,
        Method::PATCH,
        &format!("/api/files/{uuid}"),
        json!({"processing_level": "L2"}),
        &[],
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // The stale PUT must lose without clobbering the patch.
    let replacement = record(
        "/a/b.dat",
        &sha('a'),
        json!([{"site": "X", "path": "/a/b.dat"}]),
    );
    let (status, body) = helpers::send_json(
        &server,
        Method::PUT,
        &format!("/api/files/{uuid}"),
        replacement,
        &[(header::IF_MATCH.as_str(), stale.as_str())],
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body.pointer("/conflict/uuid").and_then(Value::as_str),
        Some(uuid.as_str())
    );

    let (_, stored) = helpers::get_json(&server, &format!("/api/files/{uuid}")).await?;
    assert_eq!(stored.get("processing_level"), Some(&json!("L2")));
    Ok(())
}

#[tokio::test]
async fn matching_etag_allows_conditional_put() -> Result<()> {
    let server = debug_server();

    let (_, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('a'), json!([{"site": "X", "path": "/a/b.dat"}])),
    )
    .await?;
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    let (etag, _) = helpers::get_with_etag(&server, &format!("/api/files/{uuid}")).await?;
    let current = etag.expect("ETag on GET");

    let mut replacement = record(
        "/a/b.dat",
        &sha('a'),
        json!([{"site": "X", "path": "/a/b.dat"}]),
    );
    replacement
        .as_object_mut()
        .unwrap()
        .insert("file_size".into(), json!(2048));

    let (status, updated) = helpers::send_json(
        &server,
        Method::PUT,
        &format!("/api/files/{uuid}"),
        replacement,
        &[(header::IF_MATCH.as_str(), current.as_str())],
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated.get("file_size"), Some(&json!(2048)));
    Ok(())
}

#[tokio::test]
async fn forbidden_field_patch_is_rejected() -> Result<()> {
    let server = debug_server();

    let (_, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('a'), json!([{"site": "X", "path": "/a/b.dat"}])),
    )
    .await?;
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    let (status, body) = helpers::send_json(
        &server,
        Method::PATCH,
        &format!("/api/files/{uuid}"),
        json!({"logical_name": "/renamed.dat"}),
        &[],
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body.get("message").and_then(Value::as_str).unwrap();
    assert!(message.contains("logical_name"), "message was: {message}");

    let (_, stored) = helpers::get_json(&server, &format!("/api/files/{uuid}")).await?;
    assert_eq!(stored.get("logical_name"), Some(&json!("/a/b.dat")));
    Ok(())
}

#[tokio::test]
async fn shortcut_queries_select_by_run_and_event_range() -> Result<()> {
    let server = debug_server();

    let mut in_range = record(
        "/runs/in.dat",
        &sha('a'),
        json!([{"site": "X", "path": "/runs/in.dat"}]),
    );
    in_range.as_object_mut().unwrap().insert(
        "run".into(),
        json!({"run_number": 12345, "first_event": 100, "last_event": 500}),
    );
    helpers::post_json(&server, "/api/files", in_range).await?;

    let mut out_of_range = record(
        "/runs/out.dat",
        &sha('b'),
        json!([{"site": "X", "path": "/runs/out.dat"}]),
    );
    out_of_range.as_object_mut().unwrap().insert(
        "run".into(),
        json!({"run_number": 12345, "first_event": 1000, "last_event": 2000}),
    );
    helpers::post_json(&server, "/api/files", out_of_range).await?;

    let (status, body) =
        helpers::get_json(&server, "/api/files?run_number=12345&event_id=400").await?;
    assert_eq!(status, StatusCode::OK);
    let files = body.get("files").unwrap().as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].get("logical_name"), Some(&json!("/runs/in.dat")));
    Ok(())
}

#[tokio::test]
async fn pagination_is_clamped_and_bad_limits_rejected() -> Result<()> {
    let config = Config {
        debug: true,
        query: carta_api::config::QueryConfig { max_page_size: 5 },
        ..Config::default()
    };
    let server = ServerBuilder::new().config(config).build();

    for i in 0..7u8 {
        helpers::post_json(
            &server,
            "/api/files",
            record(
                &format!("/bulk/{i}.dat"),
                &sha(char::from(b'a' + i)),
                json!([{"site": "X", "path": format!("/bulk/{i}.dat")}]),
            ),
        )
        .await?;
    }

    let (status, body) = helpers::get_json(&server, "/api/files?limit=999999999").await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("files").unwrap().as_array().unwrap().len() <= 5);

    for bad in ["0", "-1"] {
        let (status, _) = helpers::get_json(&server, &format!("/api/files?limit={bad}")).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST, "limit={bad}");
    }
    Ok(())
}

#[tokio::test]
async fn default_listing_excludes_archived_locations() -> Result<()> {
    let server = debug_server();

    helpers::post_json(
        &server,
        "/api/files",
        record(
            "/live.dat",
            &sha('a'),
            json!([{"site": "X", "path": "/live.dat"}]),
        ),
    )
    .await?;
    helpers::post_json(
        &server,
        "/api/files",
        record(
            "/archived.dat",
            &sha('b'),
            json!([{"site": "Y", "path": "/archived.dat", "archive": true}]),
        ),
    )
    .await?;

    let (_, body) = helpers::get_json(&server, "/api/files").await?;
    let names: Vec<&str> = body
        .get("files")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f.get("logical_name").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["/live.dat"]);

    let query = urlencoding_encode(r#"{"locations.archive": true}"#);
    let (_, body) = helpers::get_json(&server, &format!("/api/files?query={query}")).await?;
    let names: Vec<&str> = body
        .get("files")
        .unwrap()
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|f| f.get("logical_name").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["/archived.dat"]);
    Ok(())
}

#[tokio::test]
async fn keys_projection_limits_returned_fields() -> Result<()> {
    let server = debug_server();

    helpers::post_json(
        &server,
        "/api/files",
        record("/a.dat", &sha('a'), json!([{"site": "X", "path": "/a.dat"}])),
    )
    .await?;

    let (_, body) = helpers::get_json(&server, "/api/files?keys=uuid%7Clogical_name").await?;
    let files = body.get("files").unwrap().as_array().unwrap();
    assert_eq!(files.len(), 1);
    let file = files[0].as_object().unwrap();
    assert_eq!(file.len(), 2);
    assert!(file.contains_key("uuid"));
    assert!(file.contains_key("logical_name"));
    Ok(())
}

#[tokio::test]
async fn delete_twice_returns_404() -> Result<()> {
    let server = debug_server();

    let (_, body) = helpers::post_json(
        &server,
        "/api/files",
        record("/a/b.dat", &sha('a'), json!([{"site": "X", "path": "/a/b.dat"}])),
    )
    .await?;
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    let (status, _) = helpers::send_empty(
        &server,
        Method::DELETE,
        &format!("/api/files/{uuid}"),
    )
    .await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = helpers::send_empty(
        &server,
        Method::DELETE,
        &format!("/api/files/{uuid}"),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn collections_lifecycle() -> Result<()> {
    let server = debug_server();

    let mut l2 = record("/c/l2.dat", &sha('a'), json!([{"site": "X", "path": "/c/l2.dat"}]));
    l2.as_object_mut()
        .unwrap()
        .insert("processing_level".into(), json!("L2"));
    helpers::post_json(&server, "/api/files", l2).await?;

    let mut l3 = record("/c/l3.dat", &sha('b'), json!([{"site": "X", "path": "/c/l3.dat"}]));
    l3.as_object_mut()
        .unwrap()
        .insert("processing_level".into(), json!("L3"));
    helpers::post_json(&server, "/api/files", l3).await?;

    let (status, body) = helpers::post_json(
        &server,
        "/api/collections",
        json!({
            "collection_name": "level2",
            "query": {"processing_level": "L2"},
        }),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let uuid = body.get("uuid").and_then(Value::as_str).unwrap().to_string();

    // Duplicate name: conflict carrying the holder.
    let (status, body) = helpers::post_json(
        &server,
        "/api/collections",
        json!({"collection_name": "level2"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body.pointer("/conflict/uuid").and_then(Value::as_str),
        Some(uuid.as_str())
    );

    let (status, body) =
        helpers::get_json(&server, &format!("/api/collections/{uuid}/files")).await?;
    assert_eq!(status, StatusCode::OK);
    let files = body.get("files").unwrap().as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].get("logical_name"), Some(&json!("/c/l2.dat")));
    Ok(())
}

#[tokio::test]
async fn production_mode_requires_auth_for_mutations() -> Result<()> {
    let server = prod_server();

    // Unauthenticated mutation: rejected.
    let (status, _) = helpers::post_json(
        &server,
        "/api/files",
        record("/a.dat", &sha('a'), json!([{"site": "X", "path": "/a.dat"}])),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Unauthenticated read: allowed by default.
    let (status, _) = helpers::get_json(&server, "/api/files").await?;
    assert_eq!(status, StatusCode::OK);

    // Authenticated mutation: accepted.
    let token = helpers::make_token(TEST_JWT_SECRET, "icecube-user");
    let (status, _) = helpers::send_json(
        &server,
        Method::POST,
        "/api/files",
        record("/a.dat", &sha('a'), json!([{"site": "X", "path": "/a.dat"}])),
        &[("authorization", &format!("Bearer {token}"))],
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    // A garbage token is rejected.
    let (status, _) = helpers::send_json(
        &server,
        Method::POST,
        "/api/files",
        record("/b.dat", &sha('b'), json!([{"site": "X", "path": "/b.dat"}])),
        &[("authorization", "Bearer not-a-token")],
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

/// Minimal percent-encoding for query strings in tests.
fn urlencoding_encode(raw: &str) -> String {
    let mut out = String::new();
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

mod helpers {
    use super::*;
    use carta_api::server::Server;

    pub fn make_token(secret: &str, subject: &str) -> String {
        use jsonwebtoken::{EncodingKey, Header, encode};

        #[derive(serde::Serialize)]
        struct Claims {
            sub: String,
            exp: i64,
            #[serde(rename = "type")]
            token_type: String,
        }

        encode(
            &Header::default(),
            &Claims {
                sub: subject.to_string(),
                exp: chrono::Utc::now().timestamp() + 3600,
                token_type: "user".to_string(),
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("encode test token")
    }

    fn make_request(
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> Result<Request<Body>> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Subject", "test-user")
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).context("serialize request body")?),
            None => Body::empty(),
        };

        builder.body(body).context("build request")
    }

    async fn send(server: &Server, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = server
            .test_router()
            .oneshot(request)
            .await
            .map_err(|err| -> anyhow::Error { match err {} })?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .context("read response body")?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).with_context(|| {
                format!(
                    "parse JSON response (status={status}): {}",
                    String::from_utf8_lossy(&bytes)
                )
            })?
        };
        Ok((status, json))
    }

    pub async fn get_json(server: &Server, uri: &str) -> Result<(StatusCode, Value)> {
        send(server, make_request(Method::GET, uri, None, &[])?).await
    }

    /// GET returning the `ETag` header alongside the body.
    pub async fn get_with_etag(server: &Server, uri: &str) -> Result<(Option<String>, Value)> {
        let response = server
            .test_router()
            .oneshot(make_request(Method::GET, uri, None, &[])?)
            .await
            .map_err(|err| -> anyhow::Error { match err {} })?;
        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .context("read response body")?;
        let json = serde_json::from_slice(&bytes).context("parse JSON response")?;
        Ok((etag, json))
    }

    pub async fn post_json(
        server: &Server,
        uri: &str,
        body: Value,
    ) -> Result<(StatusCode, Value)> {
        send(server, make_request(Method::POST, uri, Some(body), &[])?).await
    }

    pub async fn send_json(
        server: &Server,
        method: Method,
        uri: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> Result<(StatusCode, Value)> {
        send(server, make_request(method, uri, Some(body), headers)?).await
    }

    pub async fn send_empty(
        server: &Server,
        method: Method,
        uri: &str,
    ) -> Result<(StatusCode, Value)> {
        send(server, make_request(method, uri, None, &[])?).await
    }
}
