//! Helpers for spawning external tools (ffmpeg and friends).
//!
//! Child processes never open a console window on Windows, and their output
//! can be captured for later diagnostics.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
mod capture;

#[cfg(feature = "tokio")]
pub use capture::{CapturedOutput, run_captured, tokio_command};
