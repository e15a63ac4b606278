//! Host-facing request contract and the stdio bridge.

pub mod contract;
pub mod handler;
pub mod stdio;

pub use contract::{Request, RequestEnvelope, ResponseEnvelope};
pub use handler::RequestHandler;
pub use stdio::{run_stdio, run_stdio_bridge};
