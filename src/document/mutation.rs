//! Structural mutation records and insertion subscriptions

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use super::NodeId;

/// One childList change under `target`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// Records delivered together at one flush
pub type MutationBatch = Vec<MutationRecord>;

/// Document-side end of a subscription. Records are matched against
/// `subtree` when the mutation happens and held here until the next flush.
pub(crate) struct ObserverSlot {
    pub subtree: NodeId,
    pub sender: Sender<MutationBatch>,
    pub queued: MutationBatch,
}

/// Receiving end of [`DocumentQuery::observe_insertions`](super::DocumentQuery::observe_insertions).
///
/// Dropping the subscription (or calling [`Subscription::disconnect`]) cancels
/// it; the document forgets the slot on its next flush.
#[derive(Debug)]
pub struct Subscription {
    subtree: NodeId,
    receiver: Option<Receiver<MutationBatch>>,
}

impl Subscription {
    pub(crate) fn channel(subtree: NodeId) -> (ObserverSlot, Self) {
        let (sender, receiver) = mpsc::channel();
        (
            ObserverSlot {
                subtree,
                sender,
                queued: Vec::new(),
            },
            Self {
                subtree,
                receiver: Some(receiver),
            },
        )
    }

    pub fn subtree(&self) -> NodeId {
        self.subtree
    }

    pub fn is_connected(&self) -> bool {
        self.receiver.is_some()
    }

    /// Next delivered batch, if one is waiting
    pub fn try_next(&mut self) -> Option<MutationBatch> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(batch) => Some(batch),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.receiver = None;
                None
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.receiver = None;
    }
}
