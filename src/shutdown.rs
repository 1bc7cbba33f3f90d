//! Interrupt handling.
//!
//! The pipeline is synchronous, so signals are watched from a dedicated
//! thread running a small tokio runtime. The first SIGINT / SIGTERM / SIGHUP
//! cancels the returned token; the pipeline and the challenge wait check it
//! cooperatively. A second signal force-exits with 130.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use tokio_util::sync::CancellationToken;

pub fn install_signal_handler() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the signal runtime")?;

    std::thread::Builder::new()
        .name("signals".into())
        .spawn(move || {
            rt.block_on(async move {
                if let Err(e) = listen(handler_token).await {
                    tracing::warn!("signal handling unavailable: {:#}", e);
                }
            })
        })
        .context("failed to spawn the signal thread")?;
    Ok(token)
}

async fn listen(token: CancellationToken) -> anyhow::Result<()> {
    let count = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let (mut sigterm, mut sighup) = {
        use tokio::signal::unix::{SignalKind, signal};
        (
            signal(SignalKind::terminate()).context("failed to register SIGTERM handler")?,
            signal(SignalKind::hangup()).context("failed to register SIGHUP handler")?,
        )
    };

    loop {
        #[cfg(unix)]
        {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r.context("failed to listen for Ctrl+C")?,
                _ = sigterm.recv() => {}
                _ = sighup.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
        }

        let prev = count.fetch_add(1, Ordering::SeqCst);
        if prev == 0 {
            tracing::warn!("interrupt received, stopping after the current step");
            tracing::warn!("press Ctrl+C again to force exit");
            token.cancel();
        } else {
            tracing::warn!("force exit requested");
            std::process::exit(130);
        }
    }
}
