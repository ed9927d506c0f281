use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Intermediate turn progress fanned out to an optional delivery channel.
/// Best-effort: losing an update never affects the final answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub user_id: String,
    pub turn_id: String,
    pub stage: ProgressStage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum ProgressStage {
    EnrichmentReady { subject: String },
    ToolFinished { tool: String, index: usize, total: usize },
    AnswerReady,
}

pub trait ProgressNotifier: Send + Sync {
    fn notify(&self, update: ProgressUpdate);
}

/// Discards every update. The default when no delivery channel is wired.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgressNotifier;

impl ProgressNotifier for NoopProgressNotifier {
    fn notify(&self, _update: ProgressUpdate) {}
}

#[derive(Clone, Default)]
pub struct InMemoryProgressNotifier {
    updates: Arc<Mutex<Vec<ProgressUpdate>>>,
}

impl InMemoryProgressNotifier {
    pub fn updates(&self) -> Vec<ProgressUpdate> {
        match self.updates.lock() {
            Ok(updates) => updates.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressNotifier for InMemoryProgressNotifier {
    fn notify(&self, update: ProgressUpdate) {
        match self.updates.lock() {
            Ok(mut updates) => updates.push(update),
            Err(poisoned) => poisoned.into_inner().push(update),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        InMemoryProgressNotifier, ProgressNotifier, ProgressStage, ProgressUpdate,
    };

    #[test]
    fn in_memory_notifier_keeps_updates_in_order() {
        let notifier = InMemoryProgressNotifier::default();
        notifier.notify(ProgressUpdate {
            user_id: "U1".to_string(),
            turn_id: "t-1".to_string(),
            stage: ProgressStage::ToolFinished { tool: "contact.create".to_string(), index: 1, total: 2 },
        });
        notifier.notify(ProgressUpdate {
            user_id: "U1".to_string(),
            turn_id: "t-1".to_string(),
            stage: ProgressStage::AnswerReady,
        });

        let updates = notifier.updates();
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0].stage, ProgressStage::ToolFinished { ref tool, .. } if tool == "contact.create"));
        assert_eq!(updates[1].stage, ProgressStage::AnswerReady);
    }
}
