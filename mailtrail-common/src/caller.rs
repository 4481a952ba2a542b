//! Caller identification.
//!
//! Walks a call stack looking for the first frame that belongs to
//! application code, skipping the async runtime, the mail subsystem and
//! mailtrail's own crates. The result is a coarse origin label attached to
//! audit events; it is never used for correlation.

use std::{backtrace::Backtrace, fmt};

/// Returned when no frame can be attributed.
pub const UNKNOWN_CALLER: &str = "System/Unknown";

/// Crates whose frames are never reported as the caller.
const SKIPPED_CRATES: &[&str] = &[
    "std",
    "core",
    "alloc",
    "tokio",
    "futures",
    "futures_util",
    "futures_core",
    "async_trait",
    "mailtrail",
    "mailtrail_common",
    "mailtrail_store",
    "mailtrail_transport",
    "mailtrail_tracker",
];

/// A single stack frame, split into its declaring path and function name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `crate::module::Type`, absent for free functions at crate root
    pub class: Option<String>,
    pub function: String,
}

impl Frame {
    #[must_use]
    pub fn new(class: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            function: function.into(),
        }
    }

    /// Split a demangled symbol such as
    /// `<app::jobs::Invoices as app::Job>::run::{{closure}}`.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Self {
        let mut symbol = symbol.trim();
        while let Some(stripped) = symbol.strip_suffix("::{{closure}}") {
            symbol = stripped;
        }

        if let Some(rest) = symbol.strip_prefix('<')
            && let Some((qualified, function)) = rest.rsplit_once(">::")
        {
            let class = qualified
                .split_once(" as ")
                .map_or(qualified, |(class, _)| class);
            return Self::new(class, function);
        }

        match symbol.rsplit_once("::") {
            Some((class, function)) => Self::new(class, function),
            None => Self {
                class: None,
                function: symbol.to_string(),
            },
        }
    }

    fn crate_name(&self) -> Option<&str> {
        self.class
            .as_deref()
            .map(|class| class.split("::").next().unwrap_or(class))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class {
            Some(class) => write!(f, "{class}::{}", self.function),
            None => f.write_str(&self.function),
        }
    }
}

/// Identify the originating call site.
///
/// Returns `class::function` for the first application frame. Failing
/// that, frames of mailtrail's own tooling are recognised by name and
/// given a descriptive label. Otherwise [`UNKNOWN_CALLER`].
#[must_use]
pub fn identify_caller(frames: &[Frame]) -> String {
    let application = frames.iter().find(|frame| {
        frame
            .crate_name()
            .is_some_and(|name| !SKIPPED_CRATES.contains(&name))
    });

    if let Some(frame) = application {
        return frame.to_string();
    }

    for frame in frames {
        let Some(class) = frame.class.as_deref() else {
            continue;
        };

        if class.contains("::controller") {
            return format!("mailtrail controller::{}", frame.function);
        }

        if frame.crate_name() == Some("mailtrail") {
            return format!("mailtrail CLI::{}", frame.function);
        }
    }

    UNKNOWN_CALLER.to_string()
}

/// Parse the rendered form of a [`Backtrace`] into frames.
#[must_use]
pub fn parse_backtrace(rendered: &str) -> Vec<Frame> {
    rendered
        .lines()
        .filter_map(|line| {
            let (index, symbol) = line.trim().split_once(": ")?;
            index.parse::<usize>().ok()?;
            Some(Frame::from_symbol(symbol))
        })
        .collect()
}

/// Capture the current call stack.
///
/// Empty when the binary was built without symbols.
#[must_use]
pub fn capture_frames() -> Vec<Frame> {
    parse_backtrace(&Backtrace::force_capture().to_string())
}
