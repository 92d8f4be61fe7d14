//! HTTP/1.1 protocol handling.
//!
//! - **`connection`**: per-client state machine
//! - **`parser`**: parses incoming requests from byte buffers
//! - **`request`** / **`response`**: message types and builders
//! - **`headers`**: ordered, case-insensitive header map
//! - **`writer`**: serializes responses onto a stream
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received (malformed → 400, then Closed)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Match proxy rules
//!        └──────┬───────────┘
//!               ├─ Rule matched → proxy session streams the response → Closed
//!               │
//!               │ No match: fallback response
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
