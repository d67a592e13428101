pub mod assembler;
pub mod backend;
pub mod cancel;
pub mod fallback;
pub mod library;
pub mod request;
pub mod setup;
pub mod stream;
pub mod telemetry;
pub mod transport;
pub mod workflow;
