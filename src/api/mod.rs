pub mod backend;
pub mod client;
pub mod types;

pub use backend::ChainBackend;
pub use client::ApiClient;
pub use types::*;
