use render_protocol::{Notifier, Severity};

/// Reports user-facing messages through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str, title: &str, severity: Severity) {
        match severity {
            Severity::Info => log::info!("[{title}] {message}"),
            Severity::Warning => log::warn!("[{title}] {message}"),
            Severity::Error => log::error!("[{title}] {message}"),
        }
    }
}
