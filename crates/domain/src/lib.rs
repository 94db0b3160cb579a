pub mod cancel;
pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod stream;
pub mod tool;

pub use cancel::CancelToken;
pub use capability::LlmCapabilities;
pub use config::Config;
pub use error::Error;
