use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    terminal,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` when the user presses `q` or Ctrl-C.
///
/// Raw mode is enabled for the duration and restored once the token is
/// cancelled, whichever side cancelled it. The crossterm calls block, so
/// this runs on a blocking thread.
pub async fn input_handler(token: CancellationToken) {
    let result = tokio::task::spawn_blocking(move || {
        if terminal::enable_raw_mode().is_err() {
            info!("Failed to enable raw mode. Input handling will be disabled.");
            return;
        }

        while !token.is_cancelled() {
            if let Ok(true) = event::poll(Duration::from_millis(100))
                && let Ok(Event::Key(key)) = event::read()
                && is_quit_key(&key)
            {
                info!("Cancellation requested, stopping download");
                token.cancel();
            }
        }

        if terminal::disable_raw_mode().is_err() {
            info!("Failed to disable raw mode.");
        }
    })
    .await;

    if let Err(e) = result {
        warn!(error = %e, "Input handler task failed");
    }
}

// Raw mode swallows SIGINT, so Ctrl-C arrives as a key event.
fn is_quit_key(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') => key.modifiers == KeyModifiers::NONE,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Cancel `token` on Ctrl-C.
pub async fn ctrl_c_handler(token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => {
                    info!("Ctrl-C received, stopping download");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            }
        }
    }
}
