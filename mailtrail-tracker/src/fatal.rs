//! Fatal errors seen during an execution context.
//!
//! The reconciler falls back to the last fatal error when no transport
//! failure was captured. Fatal errors are reported explicitly through
//! [`TrackingContext::record_fatal`](crate::TrackingContext::record_fatal),
//! or come from panics: [`install_panic_hook`] chains a hook in front of the
//! existing one that remembers the last panic on each thread.

use std::{
    any::Any,
    cell::RefCell,
    fmt,
    panic::{self, PanicHookInfo},
    sync::Once,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalKind {
    Error,
    Parse,
    Core,
    Compile,
    Warning,
    Notice,
    Deprecated,
}

impl FatalKind {
    /// Whether errors of this kind can explain a send that never concluded
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Notice | Self::Deprecated)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Error => "Fatal error",
            Self::Parse => "Parse error",
            Self::Core => "Core error",
            Self::Compile => "Compile error",
            Self::Warning => "Warning",
            Self::Notice => "Notice",
            Self::Deprecated => "Deprecated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalError {
    pub kind: FatalKind,
    pub message: String,
    pub file: String,
    pub line: u32,
}

impl FatalError {
    #[must_use]
    pub fn new(
        kind: FatalKind,
        message: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            file: file.into(),
            line,
        }
    }

    /// Build from a caught panic payload when the hook did not see it.
    #[must_use]
    pub fn from_panic_payload(payload: &(dyn Any + Send)) -> Self {
        Self::new(FatalKind::Error, payload_message(payload), "<unknown>", 0)
    }

    fn from_hook(info: &PanicHookInfo<'_>) -> Self {
        let (file, line) = info
            .location()
            .map_or(("<unknown>", 0), |location| (location.file(), location.line()));

        Self::new(FatalKind::Error, payload_message(info.payload()), file, line)
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} in {} on line {}",
            self.kind.label(),
            self.message,
            self.file,
            self.line
        )
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_string())
}

thread_local! {
    static LAST_PANIC: RefCell<Option<FatalError>> = const { RefCell::new(None) };
}

/// Install the panic-recording hook. Only the first call has an effect.
pub fn install_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let fatal = FatalError::from_hook(info);
            let _ = LAST_PANIC.try_with(|last| {
                if let Ok(mut last) = last.try_borrow_mut() {
                    *last = Some(fatal);
                }
            });
            previous(info);
        }));
    });
}

/// Take the last panic recorded on this thread.
#[must_use]
pub fn take_last_panic() -> Option<FatalError> {
    LAST_PANIC
        .try_with(|last| last.try_borrow_mut().ok().and_then(|mut last| last.take()))
        .ok()
        .flatten()
}
