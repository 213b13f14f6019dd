//! Wires the document, scanner, change observer, state store and poller to a
//! presenter, and runs the event loop that drives them.

use anyhow::{Context, Result};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::commands::PanelCommand;
use crate::document::html::append_fragment;
use crate::document::{Document, DocumentQuery};
use crate::observer::ChangeObserver;
use crate::persistence::StateStore;
use crate::poller::{AnnouncementPoller, PollOutcome};
use crate::presenter::Presenter;
use crate::scanner::{AssetScanner, AssetSnapshot};

/// Application context. Owns every component; nothing is global.
pub struct Suite<P: Presenter> {
    document: Document,
    scanner: AssetScanner,
    observer: ChangeObserver,
    store: Arc<Mutex<StateStore>>,
    poller: AnnouncementPoller,
    presenter: P,
    last_snapshot: AssetSnapshot,
}

impl<P: Presenter> Suite<P> {
    /// Observation of the document body starts here, before any scan
    pub fn new(
        mut document: Document,
        store: Arc<Mutex<StateStore>>,
        poller: AnnouncementPoller,
        presenter: P,
    ) -> Self {
        let body = document.body();
        let observer = ChangeObserver::observe(&mut document, body);
        Self {
            document,
            scanner: AssetScanner::new(),
            observer,
            store,
            poller,
            presenter,
            last_snapshot: AssetSnapshot::default(),
        }
    }

    fn store(&self) -> MutexGuard<'_, StateStore> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn last_snapshot(&self) -> &AssetSnapshot {
        &self.last_snapshot
    }

    /// Seed the presenter from persisted state, scan once and start polling
    pub fn start(&mut self) {
        info!("Initializing media audit suite");
        let (minimized, announcements) = {
            let store = self.store();
            (store.state().is_minimized, store.state().announcements.clone())
        };

        self.presenter.set_minimized(minimized);
        self.refresh_assets();
        if !announcements.is_empty() {
            self.presenter.show_announcements(&announcements);
        }
        self.poller.start();
        info!("Suite initialized");
    }

    /// Scan now and push the snapshot to the presenter
    pub fn refresh_assets(&mut self) -> &AssetSnapshot {
        let snapshot = self.scanner.scan(&self.document);
        self.presenter.show_assets(&snapshot);
        self.last_snapshot = snapshot;
        &self.last_snapshot
    }

    /// Deliver queued mutations and rescan once per relevant batch. Returns
    /// the number of rescans.
    pub fn idle(&mut self) -> usize {
        self.document.flush_mutations();
        let Self {
            document,
            scanner,
            observer,
            presenter,
            last_snapshot,
            ..
        } = self;
        let document: &Document = document;
        observer.process_pending(document, || {
            let snapshot = scanner.scan(document);
            presenter.show_assets(&snapshot);
            *last_snapshot = snapshot;
        })
    }

    pub fn handle_command(&mut self, command: PanelCommand) -> Result<ControlFlow<()>> {
        match command {
            PanelCommand::ToggleMinimized => {
                let minimized = self.store().toggle_minimized();
                self.presenter.set_minimized(minimized);
            }
            PanelCommand::Rescan => {
                self.refresh_assets();
            }
            PanelCommand::Insert(path) => {
                let markup = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read fragment {}", path.display()))?;
                let body = self.document.body();
                let added = append_fragment(&mut self.document, body, &markup)?;
                info!(path = %path.display(), nodes = added.len(), "Inserted fragment");
            }
            PanelCommand::Remove { kind, ordinal } => {
                let node = self
                    .document
                    .query_all(kind.tag())
                    .get(ordinal)
                    .copied()
                    .with_context(|| format!("No {kind} element at position {ordinal}"))?;
                let parent = self
                    .document
                    .parent(node)
                    .with_context(|| format!("{kind} {ordinal} has no parent"))?;
                self.document.remove_child(parent, node)?;
                info!(kind = %kind, ordinal = ordinal, "Removed element; snapshot kept until next rescan");
            }
            PanelCommand::Quit => return Ok(ControlFlow::Break(())),
        }
        Ok(ControlFlow::Continue(()))
    }

    pub fn handle_outcome(&mut self, outcome: PollOutcome) {
        match outcome {
            PollOutcome::Updated(announcements) => {
                self.presenter.show_announcements(&announcements);
            }
            other => debug!(outcome = ?other, "Announcements unchanged"),
        }
    }

    /// Run until `Quit`, the command channel closes, or Ctrl-C
    pub async fn run(mut self, mut commands: UnboundedReceiver<PanelCommand>) -> Result<()> {
        let mut outcomes = self.poller.subscribe();
        self.start();

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        info!("Command channel closed");
                        break;
                    };
                    match self.handle_command(command) {
                        Ok(ControlFlow::Break(())) => break,
                        Ok(ControlFlow::Continue(())) => {}
                        Err(e) => error!(error = ?e, "Command failed"),
                    }
                }
                outcome = outcomes.recv() => match outcome {
                    Ok(outcome) => self.handle_outcome(outcome),
                    Err(RecvError::Lagged(missed)) => warn!(missed = missed, "Missed poll outcomes"),
                    Err(RecvError::Closed) => break,
                },
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    info!("Interrupted");
                    break;
                }
            }
            self.idle();
        }

        self.poller.stop();
        self.observer.disconnect();
        info!("Suite stopped");
        Ok(())
    }
}
