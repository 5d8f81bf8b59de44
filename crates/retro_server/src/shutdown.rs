//! Maps process termination signals onto the emulator's stop sequence.

use std::io;
use tracing::info;

/// Waits until the process is asked to terminate.
///
/// On unix both SIGINT and SIGTERM count; on windows a Ctrl+C event does.
/// Returns once the first signal arrives so the caller can stop the
/// service factory and dispose every server instance.
pub async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = interrupt.recv() => info!("interrupt signal received, stopping services"),
            _ = terminate.recv() => info!("terminate signal received, stopping services"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received, stopping services");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn waits_until_a_signal_arrives() {
        // No signal is delivered here, so the wait must still be pending
        // when the timeout fires.
        let outcome = timeout(Duration::from_millis(20), wait_for_signal()).await;
        assert!(outcome.is_err());
    }
}
