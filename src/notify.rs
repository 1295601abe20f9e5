//! User-facing notifications
//!
//! The status panel and toast widgets live outside the core; the loop only
//! talks to this trait. The console implementation renders through `tracing`,
//! which is also the fallback behavior when no fancier sink is available.

/// Severity of a toast notification
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
	Success,
	Info,
	Warning,
	Error,
}

/// Sink for toasts and status-line updates
pub trait Notify: Send + Sync {
	/// A transient, severity-tagged message
	fn toast(&self, severity: Severity, message: &str);
	/// The current loop phase, shown in place of the previous status
	fn status(&self, message: &str);
}

/// Console rendition of the panel: everything goes through `tracing`
pub struct ConsoleNotifier;

impl Notify for ConsoleNotifier {
	fn toast(&self, severity: Severity, message: &str) {
		match severity {
			Severity::Success => tracing::info!(target: "toast", "✔ {message}"),
			Severity::Info => tracing::info!(target: "toast", "{message}"),
			Severity::Warning => tracing::warn!(target: "toast", "{message}"),
			Severity::Error => tracing::error!(target: "toast", "{message}"),
		}
	}

	fn status(&self, message: &str) {
		tracing::info!(target: "status", "{message}");
	}
}
