//! Front-end event stream
//!
//! Adapts a push-mode session to an async stream of bridge maps
//! (`eventType`, `processName`, `processId`, `timestampMs`). `listen` starts
//! the session, `cancel` stops it and runs the blocking cleanup off the
//! async executor.

use crate::models::{EventRecord, MonitorError};
use crate::monitor::{EventCallback, MonitorController, UserData};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type BridgeMap = serde_json::Map<String, serde_json::Value>;

/// Stream handler over one monitor
#[derive(Clone)]
pub struct ProcessEventStream {
    controller: Arc<MonitorController>,
}

impl ProcessEventStream {
    pub fn new(controller: Arc<MonitorController>) -> Self {
        Self { controller }
    }

    /// Start a push session forwarding every event into a channel of `buffer`
    /// slots. Events that find the channel full are dropped and logged.
    pub fn listen(&self, buffer: usize) -> Result<mpsc::Receiver<BridgeMap>, MonitorError> {
        let (tx, rx) = mpsc::channel(buffer.max(1));

        let callback: EventCallback =
            Arc::new(move |record: &EventRecord, _user_data: Option<&UserData>| {
                match tx.try_send(record.to_bridge_map()) {
                    Ok(()) => Ok(()),
                    Err(TrySendError::Full(_)) => {
                        anyhow::bail!("Event stream is full, dropping event")
                    }
                    Err(TrySendError::Closed(_)) => anyhow::bail!("Event stream listener is gone"),
                }
            });

        self.controller.initialize();
        self.controller.start_with_callback(Some(callback), None)?;
        log::info!("Event stream listening");
        Ok(rx)
    }

    /// Stop the session and wait for its resources to be released
    pub async fn cancel(&self) {
        self.controller.stop();

        let controller = Arc::clone(&self.controller);
        if let Err(e) = tokio::task::spawn_blocking(move || controller.cleanup()).await {
            log::error!("Event stream cleanup failed: {}", e);
        }
        log::info!("Event stream cancelled");
    }

    pub fn is_listening(&self) -> bool {
        self.controller.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfiguration;
    use crate::monitor::{ManualSource, RawInstance};
    use std::time::Duration;

    fn stream() -> (ManualSource, ProcessEventStream) {
        let source = ManualSource::new();
        let mut config = MonitorConfiguration::default();
        config.monitor.poll_interval_ms = 5;
        config.monitor.stop_grace_ms = 10;
        let controller = Arc::new(MonitorController::new(Arc::new(source.clone()), config));
        (source, ProcessEventStream::new(controller))
    }

    #[tokio::test]
    async fn test_listen_forwards_bridge_maps() {
        let (source, stream) = stream();
        let mut rx = stream.listen(8).unwrap();
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));

        source.emit(RawInstance::creation("notepad.exe", 4321));
        let map = rx.recv().await.unwrap();
        assert_eq!(map["eventType"], "start");
        assert_eq!(map["processName"], "notepad.exe");
        assert_eq!(map["processId"], 4321);

        stream.cancel().await;
        assert!(!stream.is_listening());
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (source, stream) = stream();
        let mut rx = stream.listen(1).unwrap();
        assert!(source.wait_for_registrations(2, Duration::from_secs(5)));

        source.emit(RawInstance::creation("a.exe", 1));
        source.emit(RawInstance::creation("b.exe", 2));

        assert_eq!(rx.recv().await.unwrap()["processName"], "a.exe");
        assert!(rx.try_recv().is_err());

        stream.cancel().await;
    }
}
