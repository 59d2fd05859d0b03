pub mod config;
pub mod error;
pub mod events;

pub use config::ServerConfig;
pub use error::ServerError;
pub use events::{ChangeEvent, ChangeKind, Frame};
