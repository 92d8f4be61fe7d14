use streamproxy::http::response::{Response, ResponseBuilder, StatusCode};
use streamproxy::http::writer::{serialize_head, serialize_response};
use streamproxy::http::headers::Headers;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::Ok.as_u16(), 200);
    assert_eq!(StatusCode::BadRequest.as_u16(), 400);
    assert_eq!(StatusCode::NotFound.as_u16(), 404);
    assert_eq!(StatusCode::BadGateway.as_u16(), 502);
    assert_eq!(StatusCode::GatewayTimeout.as_u16(), 504);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::BadGateway.reason_phrase(), "Bad Gateway");
    assert_eq!(StatusCode::GatewayTimeout.reason_phrase(), "Gateway Timeout");
}

#[test]
fn test_response_builder_auto_content_length() {
    let body = b"This is the body".to_vec();
    let response = ResponseBuilder::new(StatusCode::Ok).body(body.clone()).build();

    assert_eq!(
        response.headers.get("Content-Length").unwrap(),
        body.len().to_string()
    );
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("content-length", "999")
        .body(b"test".to_vec())
        .build();

    assert_eq!(response.headers.len(), 1);
    assert_eq!(response.headers.get("Content-Length").unwrap(), "999");
}

#[test]
fn test_response_builder_header_replaces() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .header("Content-Type", "text/html")
        .build();

    assert_eq!(response.headers.len(), 2); // 1 custom + Content-Length
    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/html");
}

#[test]
fn test_response_not_found_helper() {
    let response = Response::not_found();

    assert_eq!(response.status, StatusCode::NotFound);
    assert_eq!(response.body, b"404 Not Found\n".to_vec());
}

#[test]
fn test_response_gateway_error_carries_diagnostic() {
    let response = Response::gateway_error(StatusCode::BadGateway, "connection refused");

    assert_eq!(response.status, StatusCode::BadGateway);
    let body = String::from_utf8(response.body).unwrap();
    assert!(body.starts_with("502 Bad Gateway\n"));
    assert!(body.contains("connection refused"));
    assert_eq!(
        response.headers.get("Content-Type").unwrap(),
        "text/plain; charset=utf-8"
    );
}

#[test]
fn test_serialize_response() {
    let response = Response::ok("hi");
    let bytes = serialize_response(&response);

    assert_eq!(bytes, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi".to_vec());
}

#[test]
fn test_serialize_head_keeps_header_order() {
    let headers: Headers = [("Set-Cookie", "a=1"), ("X-Mode", "live"), ("Set-Cookie", "b=2")]
        .into_iter()
        .collect();
    let bytes = serialize_head(206, "Partial Content", &headers);

    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "HTTP/1.1 206 Partial Content\r\nSet-Cookie: a=1\r\nX-Mode: live\r\nSet-Cookie: b=2\r\n\r\n"
    );
}
