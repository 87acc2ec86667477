use tokio::sync::watch;
use tracing::{info, warn};

/// Cloneable handle that resolves once shutdown has been requested
#[derive(Clone)]
pub struct Shutdown {
    receiver: watch::Receiver<bool>,
}

/// Owner side of a [`Shutdown`]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

impl Shutdown {
    pub fn channel() -> (ShutdownTrigger, Shutdown) {
        let (sender, receiver) = watch::channel(false);
        (ShutdownTrigger { sender }, Shutdown { receiver })
    }

    pub fn is_requested(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is requested
    pub async fn requested(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                // Trigger dropped without firing: nothing can request shutdown anymore
                std::future::pending::<()>().await;
            }
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.sender.send(true);
    }
}

/// A shutdown handle that fires on SIGINT or SIGTERM
pub fn on_signal() -> Shutdown {
    let (trigger, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });
    shutdown
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            }
        }
        Err(e) => {
            warn!("Could not register SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
    }
}
