//! Configuration types shared across mailtrail crates.
//!
//! ## Modules
//!
//! - [`mailjet`]: SMTP relay credentials, the derived `mailjet_enabled`
//!   flag, and the sources they can be loaded from

pub mod mailjet;

pub use mailjet::{
    Encryption, MailjetSettings, RonSettingsFile, SettingsSource, SmtpEndpoint, mailjet_enabled,
};
