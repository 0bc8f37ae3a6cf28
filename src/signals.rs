use std::io;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Ignore SIGINT and SIGTERM in the current process.
///
/// Execution contexts call this so that a terminal Ctrl-C or a stray SIGTERM
/// cannot abort a run halfway; they shut down only through their stop channel.
/// SIGKILL cannot be ignored and still ends the process.
pub fn ignore_termination_signals() -> io::Result<()> {
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: installing SIG_IGN does not run any code in signal context.
        let previous = unsafe { libc::signal(signum, libc::SIG_IGN) };
        if previous == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Cancel a token on the first SIGINT or SIGTERM sent to the controlling process.
///
/// Used by the CLI to leave its wait and stop the worker cleanly. Execution
/// contexts never call this; they ignore both signals. Must be called from
/// within a tokio runtime.
pub fn install_shutdown_handler() -> io::Result<CancellationToken> {
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let cancel = token.clone();

    tokio::spawn(async move {
        let received = tokio::select! {
            _ = terminate.recv() => "SIGTERM",
            _ = interrupt.recv() => "SIGINT",
        };
        tracing::info!(signal = received, "shutdown requested; stopping worker");
        cancel.cancel();
    });

    Ok(token)
}
