//! SMTP relay transport.
//!
//! One session per message: connect (with implicit TLS on port 465),
//! `EHLO`, `STARTTLS` when the endpoint asks for it, `AUTH PLAIN` when
//! credentials are configured, then the usual envelope and `DATA`.

pub mod auth;
pub mod client;
pub mod response;
pub mod timeouts;
pub mod transport;

pub use auth::Credentials;
pub use response::Response;
pub use timeouts::SmtpTimeouts;
pub use transport::{SmtpOptions, SmtpTransport, dot_stuff};
