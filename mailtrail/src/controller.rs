use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use mailtrail_common::{
    OutgoingMessage,
    audit::{self, AuditConfig},
    config::MailjetSettings,
    internal, logging,
};
use mailtrail_store::StoreConfig;
use mailtrail_tracker::{DeliveryScope, TrackerConfig};
use mailtrail_transport::{Mailer, SmtpOptions, SmtpTransport, Transport};
use serde::Deserialize;

/// The `Mailtrail(...)` configuration document
#[derive(Debug, Default, Deserialize)]
pub struct Mailtrail {
    #[serde(default)]
    pub mailjet: MailjetSettings,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub smtp: SmtpOptions,
}

/// What happened to one message file
#[derive(Debug)]
pub struct SendOutcome {
    pub file: PathBuf,
    /// The Message-ID on success, the error otherwise
    pub result: Result<String, String>,
}

impl SendOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(message_id) => write!(f, "{}: sent {message_id}", self.file.display()),
            Err(err) => write!(f, "{}: failed: {err}", self.file.display()),
        }
    }
}

impl Mailtrail {
    /// Parse a configuration document
    ///
    /// # Errors
    ///
    /// If `content` is not a valid document
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        ron::from_str(content).context("Invalid mailtrail configuration")
    }

    /// Read and parse the configuration document at `path`
    ///
    /// # Errors
    ///
    /// If the file cannot be read or is not a valid document
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        Self::from_ron(&content)
    }

    /// Install process-wide logging and audit settings
    pub fn init(&self) {
        logging::init();
        audit::init(self.audit.clone());
    }

    /// A fresh execution scope backed by the configured store
    ///
    /// # Errors
    ///
    /// If the store cannot be opened
    pub fn scope(&self) -> anyhow::Result<DeliveryScope> {
        let gateway = self
            .store
            .clone()
            .into_gateway()
            .context("Failed to open the delivery store")?;

        Ok(DeliveryScope::new(
            gateway,
            Arc::new(self.mailjet.clone()),
            self.tracker.clone(),
        ))
    }

    /// The relay transport described by the settings
    ///
    /// # Errors
    ///
    /// If no relay server is configured
    pub fn smtp_transport(&self) -> anyhow::Result<SmtpTransport> {
        SmtpTransport::from_settings(&self.mailjet, self.smtp.clone())
            .context("Cannot build the SMTP transport")
    }

    /// Send every file in `files` through the configured relay
    ///
    /// # Errors
    ///
    /// If the store or the transport cannot be set up; per-message failures
    /// are reported in the outcomes instead
    pub async fn send_files(&self, files: &[PathBuf]) -> anyhow::Result<Vec<SendOutcome>> {
        let transport = self.smtp_transport()?;
        self.send_files_via(transport, files).await
    }

    /// Send every file in `files` through `transport`, all in one tracked scope
    ///
    /// # Errors
    ///
    /// If the store cannot be opened
    pub async fn send_files_via<T>(
        &self,
        transport: T,
        files: &[PathBuf],
    ) -> anyhow::Result<Vec<SendOutcome>>
    where
        T: Transport + 'static,
    {
        let scope = self.scope()?;
        let mailer = Mailer::new(scope.instrument(transport)).with_listener(scope.tracker());

        internal!(
            level = INFO,
            "Sending {} message(s) via {}",
            files.len(),
            mailer.transport().describe()
        );

        let outcomes = scope
            .run(async {
                let mut outcomes = Vec::with_capacity(files.len());
                for file in files {
                    let result = Self::send_file(&mailer, file).await;
                    outcomes.push(SendOutcome {
                        file: file.clone(),
                        result,
                    });
                }
                outcomes
            })
            .await;

        Ok(outcomes)
    }

    async fn send_file(mailer: &Mailer, file: &Path) -> Result<String, String> {
        let raw = tokio::fs::read(file)
            .await
            .map_err(|err| format!("cannot read message: {err}"))?;
        let message = OutgoingMessage::from_rfc822(&raw).map_err(|err| err.to_string())?;

        mailer
            .send(&message)
            .await
            .map(|sent| sent.message_id().to_string())
            .map_err(|err| format!("{}: {err}", err.kind()))
    }

    /// Describe the relay settings, one fact per line
    #[must_use]
    pub fn check(&self) -> Vec<String> {
        let mut report = vec![format!(
            "mailjet enabled: {}",
            if self.mailjet.is_configured() { "yes" } else { "no" }
        )];

        for (field, value) in [
            ("smtpServer", &self.mailjet.smtp_server),
            ("smtpUsername", &self.mailjet.smtp_username),
            ("smtpPassword", &self.mailjet.smtp_password),
        ] {
            if value.is_empty() {
                report.push(format!("missing: {field}"));
            }
        }

        if let Some(endpoint) = self.mailjet.endpoint() {
            let encryption = endpoint
                .encryption
                .map_or_else(|| "none".to_string(), |encryption| encryption.to_string());
            report.push(format!("endpoint: {}", endpoint.address()));
            report.push(format!("encryption: {encryption}"));
        }

        report
    }
}
