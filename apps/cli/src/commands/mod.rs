//! Command implementations for the abllama CLI.

pub mod generate;
pub mod train;

use abllama_abstraction::CancellationToken;
use colored::Colorize;

/// Returns a token that is cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Cancellation requested, stopping at the next step...", "⚠".yellow());
            cancel.cancel();
        }
    });
    token
}
