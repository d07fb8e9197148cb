//! HTTP interface module.
//!
//! The live listener serves the WebSocket channel, annotation REST
//! endpoints and health. The control listener serves the queue protocol.

pub mod handlers;
pub mod routes;

pub use handlers::{
    HealthResponse, RevertResponse, SubmitRequest, SubmitResponse, ANNOTATION_ID_HEADER,
};
pub use routes::{create_control_router, create_live_router};
