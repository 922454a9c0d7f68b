//! Exchange boundary: REST transport, typed payloads, signing, and the Gate.

pub mod client;
pub mod gate;
pub mod model;
pub mod signer;

pub use client::{ApiResponse, RestClient};
pub use gate::{Gate, SignedTransport};
pub use signer::Credentials;
