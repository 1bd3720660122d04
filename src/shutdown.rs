//! SIGINT-driven shutdown.
//!
//! A dedicated thread waits for SIGINT. Nothing runs inside the signal
//! handler itself: the thread asks the operator for confirmation and, if
//! confirmed, posts a shutdown request that the accept loop acts on.

use crate::console;
use crate::server::ShutdownHandle;
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use std::io;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

const CONFIRM_QUESTION: &str = "Are you sure to shutdown the server? [y/N] ";

/// How an interrupt is confirmed before shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Ask on the terminal
    Prompt,
    /// Shut down on the first interrupt
    Skip,
}

/// Decide whether an interrupt should shut the server down.
pub fn should_shut_down<F>(confirmation: Confirmation, ask: F) -> bool
where
    F: FnOnce(&str) -> io::Result<String>,
{
    match confirmation {
        Confirmation::Skip => true,
        Confirmation::Prompt => match ask(CONFIRM_QUESTION) {
            Ok(answer) => console::is_affirmative(&answer),
            Err(e) => {
                error!(error = %e, "Unable to read the answer");
                false
            }
        },
    }
}

/// Install the SIGINT handler and start the thread serving it.
pub fn watch(shutdown: ShutdownHandle, confirmation: Confirmation) -> io::Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT])?;

    thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                if should_shut_down(confirmation, console::prompt) {
                    shutdown.request();
                    break;
                }
                info!("Shutdown cancelled");
            }
        })
}
