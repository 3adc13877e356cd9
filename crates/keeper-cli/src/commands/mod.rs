//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - App handles, init, migrations and the error log
//! - `ingest` - Ingest, extract and scan commands
//! - `queue` - Upload queue commands and the watch loop
//! - `receipts` - Receipt list/show/edit/delete/reextract
//! - `settings` - Settings get/set/list

pub mod core;
pub mod ingest;
pub mod queue;
pub mod receipts;
pub mod settings;

// Re-export command functions for main.rs
pub use core::*;
pub use ingest::*;
pub use queue::*;
pub use receipts::*;
pub use settings::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
