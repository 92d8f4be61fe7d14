use crate::http::request::Request;
use crate::http::response::Response;

/// Handles requests that no proxy rule matched.
pub trait Fallback: Send + Sync {
    fn respond(&self, request: &Request) -> Response;
}

/// Answers every unmatched request with `404 Not Found`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Fallback for NotFound {
    fn respond(&self, _request: &Request) -> Response {
        Response::not_found()
    }
}
