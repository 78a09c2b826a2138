use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use futures::stream;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tapline::{
    AllowList, BodyDirection, Field, FieldSet, HttpTapLayer, LogSink, Record, TapConfig, REDACTED,
};

/// Test sink that collects every record it receives for verification.
#[derive(Debug, Clone)]
struct TestSink {
    enabled: bool,
    records: Arc<Mutex<Vec<Record>>>,
}

impl TestSink {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn records(&self) -> Vec<Record> {
        self.records.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Record) -> bool) -> usize {
        self.records().iter().filter(|r| pred(r)).count()
    }

    async fn wait_for(&self, expected: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.records.lock().unwrap().len() >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl LogSink for TestSink {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn emit(&self, record: Record) {
        self.records.lock().unwrap().push(record);
    }
}

// Test server handlers

async fn hello_handler() -> impl IntoResponse {
    "Hello, World!"
}

async fn items_handler() -> impl IntoResponse {
    "three items"
}

async fn echo_handler(body: String) -> impl IntoResponse {
    format!("Echo: {body}")
}

async fn alphabet_handler() -> impl IntoResponse {
    "abcdefghijklmnopqrstuvwxy" // 25 ASCII bytes
}

async fn streaming_handler() -> impl IntoResponse {
    let chunks = stream::iter(vec![
        Ok::<_, std::convert::Infallible>(Bytes::from("chunk1")),
        Ok(Bytes::from("chunk2")),
        Ok(Bytes::from("chunk3")),
    ]);
    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn nothing_handler() -> impl IntoResponse {
    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::empty())
        .unwrap()
}

fn create_test_app(config: TapConfig, primary: TestSink, secondary: TestSink) -> Router {
    Router::new()
        .route("/hello", get(hello_handler))
        .route("/items", get(items_handler))
        .route("/echo", post(echo_handler))
        .route("/alphabet", get(alphabet_handler))
        .route("/streaming", get(streaming_handler))
        .route("/nothing", get(nothing_handler))
        .layer(HttpTapLayer::new(Arc::new(config), primary, secondary))
}

fn is_request_fields(record: &Record) -> bool {
    matches!(record, Record::RequestFields(_))
}

fn is_response_fields(record: &Record) -> bool {
    matches!(record, Record::ResponseFields(_))
}

fn body_text(record: &Record, wanted: BodyDirection) -> Option<&str> {
    match record {
        Record::BodyText { direction, text } if *direction == wanted => Some(text),
        _ => None,
    }
}

#[tokio::test]
async fn both_sinks_disabled_is_a_pass_through() {
    let primary = TestSink::new(false);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::ALL,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary.clone());
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.post("/echo").text("untouched").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "Echo: untouched");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(primary.records().is_empty());
    assert!(secondary.records().is_empty());
}

#[tokio::test]
async fn only_selected_fields_are_emitted() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::REQUEST_METHOD | FieldSet::REQUEST_PATH,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary.clone());
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.get("/items").add_query_param("x", "1").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(primary.wait_for(2, Duration::from_secs(1)).await);
    let records = primary.records();

    let Record::RequestFields(list) = &records[0] else {
        panic!("expected a request fields record first, got {records:?}");
    };
    assert_eq!(
        list.to_vec(),
        vec![
            Field::new("Method", Some("GET".into())),
            Field::new("Path", Some("/items".into())),
        ]
    );

    // Query was not selected, no body was wanted: no warning, no body text.
    assert_eq!(primary.count(|r| matches!(r, Record::Warning(_))), 0);
    assert_eq!(primary.count(|r| matches!(r, Record::BodyText { .. })), 0);
    assert!(secondary.records().is_empty());
}

#[tokio::test]
async fn headers_outside_the_allow_list_are_redacted() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::REQUEST_HEADERS,
        request_headers: AllowList::new().with("Content-Type"),
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server
        .post("/echo")
        .text("hi")
        .add_header("x-secret", "abc")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(primary.wait_for(1, Duration::from_secs(1)).await);
    let records = primary.records();
    let Record::RequestFields(list) = &records[0] else {
        panic!("expected request fields, got {records:?}");
    };

    let value_of = |name: &str| -> Option<String> {
        list.iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.clone())
    };
    assert!(value_of("content-type")
        .is_some_and(|v| v.starts_with("text/plain") && v != REDACTED));
    assert_eq!(value_of("x-secret").as_deref(), Some(REDACTED));
}

#[tokio::test]
async fn request_body_is_captured_and_decoded() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::REQUEST_METHOD | FieldSet::REQUEST_BODY,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.post("/echo").text("hello tap").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "Echo: hello tap");

    assert!(primary.wait_for(3, Duration::from_secs(1)).await);
    let captured: Vec<_> = primary
        .records()
        .iter()
        .filter_map(|r| body_text(r, BodyDirection::Request).map(str::to_owned))
        .collect();
    assert_eq!(captured, ["hello tap"]);
}

#[tokio::test]
async fn response_capture_respects_the_limit_without_touching_the_response() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::RESPONSE_STATUS_CODE | FieldSet::RESPONSE_BODY,
        response_body_limit: 10,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.get("/alphabet").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    // The client still gets every byte.
    assert_eq!(response.text(), "abcdefghijklmnopqrstuvwxy");

    assert!(primary.wait_for(2, Duration::from_secs(1)).await);
    let captured: Vec<_> = primary
        .records()
        .iter()
        .filter_map(|r| body_text(r, BodyDirection::Response).map(str::to_owned))
        .collect();
    assert_eq!(captured, ["abcdefghij"]);
}

#[tokio::test]
async fn unresolvable_media_type_warns_and_skips_the_body() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::REQUEST_METHOD | FieldSet::REQUEST_BODY,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server
        .post("/echo")
        .bytes(Bytes::from("binary"))
        .content_type("application/octet-stream")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(primary.wait_for(3, Duration::from_secs(1)).await);
    assert_eq!(primary.count(|r| matches!(r, Record::Warning(_))), 1);
    assert_eq!(
        primary.count(|r| body_text(r, BodyDirection::Request).is_some()),
        0
    );
}

#[tokio::test]
async fn secondary_only_requests_never_warn_about_bodies() {
    let primary = TestSink::new(false);
    let secondary = TestSink::new(true);
    let config = TapConfig {
        fields: FieldSet::REQUEST_METHOD | FieldSet::REQUEST_BODY,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary.clone());
    let server = axum_test::TestServer::new(app).unwrap();

    // The secondary sink never takes bodies, so an unresolvable media type
    // is not a condition worth warning about on a secondary-only request.
    let response = server
        .post("/echo")
        .bytes(Bytes::from("binary"))
        .content_type("application/octet-stream")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(secondary.wait_for(1, Duration::from_secs(1)).await);
    assert_eq!(secondary.count(|r| matches!(r, Record::Warning(_))), 0);
    assert_eq!(secondary.count(|r| matches!(r, Record::BodyText { .. })), 0);
    assert!(primary.records().is_empty());
}

#[tokio::test]
async fn response_fields_are_emitted_exactly_once_for_streaming_responses() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::RESPONSE,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.get("/streaming").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.text(), "chunk1chunk2chunk3");

    assert!(primary.wait_for(2, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(primary.count(is_response_fields), 1);
    let captured: Vec<_> = primary
        .records()
        .iter()
        .filter_map(|r| body_text(r, BodyDirection::Response).map(str::to_owned))
        .collect();
    assert_eq!(captured, ["chunk1chunk2chunk3"]);
}

#[tokio::test]
async fn empty_captured_response_body_emits_no_body_record() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::RESPONSE,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.get("/nothing").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().is_empty());

    assert!(primary.wait_for(1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(primary.count(is_response_fields), 1);
    assert_eq!(primary.count(|r| matches!(r, Record::BodyText { .. })), 0);
}

#[tokio::test]
async fn secondary_sink_gets_one_combined_record() {
    let primary = TestSink::new(false);
    let secondary = TestSink::new(true);
    let config = TapConfig {
        fields: FieldSet::ALL,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary.clone());
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.get("/hello").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(secondary.wait_for(1, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let records = secondary.records();
    assert_eq!(records.len(), 1);
    let Record::ExtendedFields(list) = &records[0] else {
        panic!("expected one extended record, got {records:?}");
    };

    let names: Vec<_> = list.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(&names[..4], ["Timestamp", "ClientIp", "ServerIp", "ServerPort"]);
    let value_of = |name: &str| -> Option<String> {
        list.iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.clone())
    };
    assert_eq!(value_of("Method").as_deref(), Some("GET"));
    assert_eq!(value_of("Path").as_deref(), Some("/hello"));
    assert_eq!(value_of("StatusCode").as_deref(), Some("200"));
    // Bodies never reach the secondary sink.
    assert!(list.iter().all(|f| f.name != "RequestBody" && f.name != "ResponseBody"));
    assert!(primary.records().is_empty());
}

#[tokio::test]
async fn concurrent_requests_do_not_mix_captures() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::REQUEST_BODY,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = Arc::new(axum_test::TestServer::new(app).unwrap());

    let futures: Vec<_> = (0..5)
        .map(|i| {
            let server = server.clone();
            async move { server.post("/echo").text(format!("Request {i}")).await }
        })
        .collect();
    let responses = futures::future::join_all(futures).await;

    for (i, response) in responses.iter().enumerate() {
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), format!("Echo: Request {i}"));
    }

    assert!(primary.wait_for(5, Duration::from_secs(2)).await);
    let mut captured: Vec<_> = primary
        .records()
        .iter()
        .filter_map(|r| body_text(r, BodyDirection::Request).map(str::to_owned))
        .collect();
    captured.sort();
    let expected: Vec<_> = (0..5).map(|i| format!("Request {i}")).collect();
    assert_eq!(captured, expected);
}

#[tokio::test]
async fn pre_body_request_record_precedes_response_record() {
    let primary = TestSink::new(true);
    let secondary = TestSink::new(false);
    let config = TapConfig {
        fields: FieldSet::REQUEST_LINE | FieldSet::RESPONSE_STATUS_CODE,
        ..TapConfig::default()
    };
    let app = create_test_app(config, primary.clone(), secondary);
    let server = axum_test::TestServer::new(app).unwrap();

    let response = server.get("/hello").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    assert!(primary.wait_for(2, Duration::from_secs(1)).await);
    let records = primary.records();
    assert!(is_request_fields(&records[0]));
    assert!(is_response_fields(&records[1]));

    let Record::ResponseFields(list) = &records[1] else {
        unreachable!();
    };
    assert_eq!(list.to_vec(), vec![Field::new("StatusCode", Some("200".into()))]);
}
