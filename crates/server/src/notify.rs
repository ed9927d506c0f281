use hearth_core::progress::{ProgressNotifier, ProgressUpdate};
use tokio::sync::broadcast;
use tracing::debug;

/// Buffered updates per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// Fans turn progress out to any number of subscribers over a broadcast
/// channel. Sending is best-effort: with no subscriber attached the update
/// is simply dropped, and a slow subscriber loses the oldest updates first.
#[derive(Clone, Debug)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<ProgressUpdate>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier for BroadcastNotifier {
    fn notify(&self, update: ProgressUpdate) {
        if self.sender.send(update).is_err() {
            debug!(
                event_name = "system.progress.no_subscribers",
                "progress update dropped: nobody is listening"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use hearth_core::progress::{ProgressNotifier, ProgressStage, ProgressUpdate};

    use super::BroadcastNotifier;

    fn update(stage: ProgressStage) -> ProgressUpdate {
        ProgressUpdate { user_id: "U-alice".to_string(), turn_id: "t-1".to_string(), stage }
    }

    #[tokio::test]
    async fn subscribers_see_updates_in_order() {
        let notifier = BroadcastNotifier::new();
        let mut receiver = notifier.subscribe();

        notifier.notify(update(ProgressStage::ToolFinished {
            tool: "contact.create".to_string(),
            index: 1,
            total: 1,
        }));
        notifier.notify(update(ProgressStage::AnswerReady));

        let first = receiver.recv().await.expect("first update");
        assert!(
            matches!(first.stage, ProgressStage::ToolFinished { ref tool, .. } if tool == "contact.create")
        );
        let second = receiver.recv().await.expect("second update");
        assert_eq!(second.stage, ProgressStage::AnswerReady);
    }

    #[test]
    fn notifying_without_subscribers_is_harmless() {
        let notifier = BroadcastNotifier::new();
        assert_eq!(notifier.subscriber_count(), 0);
        notifier.notify(update(ProgressStage::AnswerReady));
    }
}
