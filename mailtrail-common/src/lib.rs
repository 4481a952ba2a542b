pub mod audit;
pub mod caller;
pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod message;
pub mod status;

pub use error::{ConfigError, MessageError};
pub use message::{Mailbox, MessageView, OutgoingMessage, SentMessage};
pub use status::DeliveryStatus;
pub use tracing;
