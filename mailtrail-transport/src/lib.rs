pub mod capture;
pub mod error;
pub mod mailer;
pub mod memory;
pub mod smtp;
pub mod transport;

pub use capture::{CaptureTransport, CapturedFailure, FailureSlot};
pub use error::{Result, TransportError};
pub use mailer::{
    AfterSendEvent, BeforeSendEvent, MailEventListener, Mailer, MailerHandle, MailerIntrospection,
};
pub use memory::MemoryTransport;
pub use smtp::{Credentials, SmtpOptions, SmtpTimeouts, SmtpTransport};
pub use transport::Transport;
