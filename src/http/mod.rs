//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request-id and trace layers)
//!     → upgrade? → websocket.rs (tunnel to the target)
//!     → ingress.rs (target URL from the path)
//!     → cache hit? → response.rs (cached shape)
//!     → upstream dispatcher
//!     → mime.rs (content type, cache policy, rewrite decision)
//!     → rewrite stream → Client
//! ```

pub mod ingress;
pub mod mime;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer, STATUS_PATH};
