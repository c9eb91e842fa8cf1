//! User-facing notifications
//!
//! The connection manager never talks to the user directly; it reports through
//! a [`Notifier`] handed to it at construction.

use colored::*;
use serde::{Deserialize, Serialize};

/// How loud a transient notice is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// Sink for connection lifecycle notices
pub trait Notifier: Send + Sync {
    /// Transient notice
    fn notify(&self, message: &str, severity: Severity);

    /// Terminal failure. `context_id` is the session the channel was bound to,
    /// `user_initiated` tells a deliberate teardown from an abandonment.
    fn panic(&self, message: &str, context_id: Option<&str>, user_initiated: bool);
}

/// Prints notices to the terminal and mirrors them into the log
#[derive(Debug, Default, Clone)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        let time = chrono::Local::now().format("%H:%M:%S");
        let badge = match severity {
            Severity::Success => "✓".green(),
            Severity::Info => "•".bright_blue(),
            Severity::Warning => "⚠".yellow(),
            Severity::Error => "✗".red(),
        };
        println!("{} {} {}", time.to_string().bright_black(), badge, message);

        match severity {
            Severity::Error => tracing::error!(%message, "notification"),
            Severity::Warning => tracing::warn!(%message, "notification"),
            _ => tracing::debug!(%message, "notification"),
        }
    }

    fn panic(&self, message: &str, context_id: Option<&str>, user_initiated: bool) {
        let context = context_id.unwrap_or("-");
        if user_initiated {
            println!(
                "{} {} (session {})",
                "■".bright_white(),
                message.bright_white(),
                context.bright_yellow()
            );
        } else {
            eprintln!(
                "{} {} (session {})",
                "✗".red().bold(),
                message.red().bold(),
                context.bright_yellow()
            );
        }
        if user_initiated {
            tracing::info!(%message, context, "channel closed by user");
        } else {
            tracing::error!(%message, context, "terminal notification");
        }
    }
}
