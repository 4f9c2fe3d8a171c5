pub mod config;
pub mod consumer;
pub mod error;
pub mod relay;
pub mod request;
pub mod router;
pub mod sse;
pub mod upstream;
pub mod widget;
