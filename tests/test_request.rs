use streamproxy::http::headers::Headers;
use streamproxy::http::request::{Method, Request, RequestBuilder};

fn request(version: &str, headers: &[(&str, &str)]) -> Request {
    Request {
        method: Method::GET,
        path: "/stream".to_string(),
        version: version.to_string(),
        headers: headers.iter().copied().collect(),
        body: vec![],
    }
}

#[test]
fn test_request_header_retrieval() {
    let req = request(
        "HTTP/1.1",
        &[("Host", "localhost:5173"), ("Accept", "multipart/x-mixed-replace")],
    );

    assert_eq!(req.header("Host"), Some("localhost:5173"));
    assert_eq!(req.header("accept"), Some("multipart/x-mixed-replace"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_request_content_length_parsing() {
    let req = request("HTTP/1.1", &[("Content-Length", "42")]);
    assert_eq!(req.content_length(), 42);
}

#[test]
fn test_request_content_length_missing_or_invalid() {
    assert_eq!(request("HTTP/1.1", &[]).content_length(), 0);
    assert_eq!(
        request("HTTP/1.1", &[("Content-Length", "not-a-number")]).content_length(),
        0
    );
}

#[test]
fn test_request_keep_alive_http11_default() {
    assert!(request("HTTP/1.1", &[]).keep_alive());
}

#[test]
fn test_request_keep_alive_close() {
    assert!(!request("HTTP/1.1", &[("Connection", "close")]).keep_alive());
    assert!(!request("HTTP/1.1", &[("connection", "Close")]).keep_alive());
}

#[test]
fn test_request_keep_alive_http10() {
    assert!(!request("HTTP/1.0", &[]).keep_alive());
    assert!(request("HTTP/1.0", &[("Connection", "Keep-Alive")]).keep_alive());
}

#[test]
fn test_request_method_from_string() {
    assert_eq!(Method::from_str("GET"), Some(Method::GET));
    assert_eq!(Method::from_str("POST"), Some(Method::POST));
    assert_eq!(Method::from_str("INVALID"), None);
    assert_eq!(Method::from_str("get"), None); // Case-sensitive
}

#[test]
fn test_request_method_display() {
    assert_eq!(Method::GET.to_string(), "GET");
    assert_eq!(Method::OPTIONS.as_str(), "OPTIONS");
}

#[test]
fn test_request_builder_defaults_version() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .path("/stream")
        .header("Host", "localhost")
        .build()
        .unwrap();

    assert_eq!(req.version, "HTTP/1.1");
    assert_eq!(req.header("host"), Some("localhost"));
    assert!(req.body.is_empty());
}

#[test]
fn test_request_builder_requires_method_and_path() {
    assert!(RequestBuilder::new().path("/").build().is_err());
    assert!(RequestBuilder::new().method(Method::GET).build().is_err());
}

#[test]
fn test_request_builder_keeps_repeated_headers() {
    let req = RequestBuilder::new()
        .method(Method::GET)
        .path("/")
        .header("Cookie", "a=1")
        .header("Cookie", "b=2")
        .build()
        .unwrap();

    let cookies: Vec<&str> = req.headers.get_all("cookie").collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);
    assert_eq!(req.headers, Headers::from_iter([("Cookie", "a=1"), ("Cookie", "b=2")]));
}
