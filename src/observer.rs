//! Rescan triggering on structural document changes
//!
//! Only insertions matter: a batch is relevant when any node it adds is a
//! tracked media element or contains one. Removals are ignored, so assets for
//! removed elements stay in the last snapshot until some later insertion
//! triggers a rescan. Batches are not coalesced; every relevant batch costs
//! one rescan.

use tracing::{debug, info};

use crate::document::{DocumentQuery, MutationBatch, NodeId, Subscription};
use crate::types::MediaKind;

pub struct ChangeObserver {
    subscription: Subscription,
}

impl ChangeObserver {
    /// Start observing insertions anywhere under `subtree`
    pub fn observe(doc: &mut impl DocumentQuery, subtree: NodeId) -> Self {
        Self {
            subscription: doc.observe_insertions(subtree),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.subscription.is_connected()
    }

    pub fn disconnect(&mut self) {
        self.subscription.disconnect();
        info!(subtree = %self.subscription.subtree(), "Stopped observing document changes");
    }

    /// Handle every batch delivered since the last call, invoking `on_rescan`
    /// once per relevant batch. Returns how many rescans were triggered.
    pub fn process_pending(&mut self, doc: &impl DocumentQuery, mut on_rescan: impl FnMut()) -> usize {
        let mut rescans = 0;
        while let Some(batch) = self.subscription.try_next() {
            if is_relevant(doc, &batch) {
                info!(records = batch.len(), "New media elements detected, rescanning");
                on_rescan();
                rescans += 1;
            } else {
                debug!(records = batch.len(), "Ignoring mutation batch without media");
            }
        }
        rescans
    }
}

/// True when the batch inserted a media element, directly or nested
pub fn is_relevant(doc: &impl DocumentQuery, batch: &MutationBatch) -> bool {
    batch
        .iter()
        .flat_map(|record| record.added.iter().copied())
        .any(|node| adds_media(doc, node))
}

fn adds_media(doc: &impl DocumentQuery, node: NodeId) -> bool {
    let Some(element) = doc.element(node) else {
        return false;
    };
    if MediaKind::from_tag(element.tag()).is_some() {
        return true;
    }
    MediaKind::ALL
        .into_iter()
        .any(|kind| !doc.query_within(node, kind.tag()).is_empty())
}
