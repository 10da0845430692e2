//! Process termination handling.
//!
//! The session knows nothing about signals. A binary that should stop
//! scanning, drop the link and exit on Ctrl-C spawns
//! [`disconnect_on_termination`] next to its main loop.

use std::sync::Arc;

use log::{info, warn};

use crate::backend::BleCentral;
use crate::session::FrameSession;

/// Resolve when the process receives SIGINT, SIGQUIT or SIGTERM (Ctrl-C
/// elsewhere). Returns the signal's name.
pub async fn termination_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
            _ = terminate.recv() => "SIGTERM",
        };
        Ok(name)
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl-C")
    }
}

/// Wait for a termination signal, tear `session` down, then exit the process.
pub async fn disconnect_on_termination<C: BleCentral>(session: Arc<FrameSession<C>>) {
    match termination_signal().await {
        Ok(name) => info!("Caught {name}; disconnecting"),
        Err(e) => {
            warn!("Could not install signal handlers: {e}");
            return;
        }
    }
    session.disconnect().await;
    std::process::exit(0);
}
