//! Stop signalling for spawned tasks.
//!
//! Every long-running task owns a per-task `watch<bool>` receiver and also
//! observes the engine-wide one. A value of `true`, or a dropped sender, means
//! "stop".

use tokio::sync::watch;

/// Resolves once `rx` reads `true` or its sender is gone.
pub async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// A fresh, not-yet-signalled stop channel.
pub fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}
