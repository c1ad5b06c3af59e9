//! Host-side registration: installing, waiting and active worker slots.

use std::sync::Arc;

use reqwest::Url;
use tokio::sync::{Mutex, broadcast};

use crate::activate::ActivationReport;
use crate::clients::{ClientHandle, ClientId, Clients};
use crate::error::{Error, Result};
use crate::provision::ProvisionReport;
use crate::worker::{Message, OfflineWorker, WorkerId, WorkerState};

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications observed by pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A new worker started installing.
    UpdateFound { worker: WorkerId },
    /// A worker moved to a new lifecycle state.
    StateChanged { worker: WorkerId, state: WorkerState },
}

/// What [`Registration::register`] did with a new worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    pub provision: ProvisionReport,
    /// Present when the worker activated right away; `None` means it is waiting.
    pub activation: Option<ActivationReport>,
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<OfflineWorker>>,
    waiting: Option<Arc<OfflineWorker>>,
    active: Option<Arc<OfflineWorker>>,
}

/// Tracks worker versions for one scope and drives their transitions.
pub struct Registration {
    clients: Clients,
    slots: Mutex<Slots>,
    // Serialises install and activation so only one transition runs at a time.
    lifecycle: Mutex<()>,
    events: broadcast::Sender<RegistrationEvent>,
}

impl Default for Registration {
    fn default() -> Self {
        Self::new()
    }
}

impl Registration {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            clients: Clients::new(),
            slots: Mutex::new(Slots::default()),
            lifecycle: Mutex::new(()),
            events,
        }
    }

    #[must_use]
    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistrationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_state(&self, worker: &OfflineWorker) {
        self.emit(RegistrationEvent::StateChanged {
            worker: worker.id(),
            state: worker.state(),
        });
    }

    pub async fn installing(&self) -> Option<Arc<OfflineWorker>> {
        self.slots.lock().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineWorker>> {
        self.slots.lock().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<Arc<OfflineWorker>> {
        self.slots.lock().await.active.clone()
    }

    /// Installs `worker`, then activates it unless pages of the current
    /// version are still open.
    ///
    /// A worker that fails to install becomes redundant and the previous
    /// version stays in charge.
    ///
    /// # Errors
    ///
    /// Returns the install error, or a lifecycle error if activation was
    /// attempted out of order.
    pub async fn register(&self, worker: OfflineWorker) -> Result<RegisterOutcome> {
        let _lifecycle = self.lifecycle.lock().await;
        let worker = Arc::new(worker);

        self.slots.lock().await.installing = Some(Arc::clone(&worker));
        self.emit(RegistrationEvent::UpdateFound { worker: worker.id() });

        let installed = worker.install().await;
        self.slots.lock().await.installing = None;
        let provision = match installed {
            Ok(report) => report,
            Err(e) => {
                self.emit_state(&worker);
                return Err(e);
            }
        };

        let replaced = self.slots.lock().await.waiting.replace(Arc::clone(&worker));
        if let Some(replaced) = replaced {
            log::info!("{} replaced by a newer waiting worker", replaced.version());
            replaced.make_redundant();
            self.emit_state(&replaced);
        }
        self.emit_state(&worker);

        let activation = self.activate_waiting_locked().await?;
        if activation.is_none() {
            log::info!(
                "{} installed and waiting for open pages to close",
                worker.version()
            );
        }
        Ok(RegisterOutcome {
            provision,
            activation,
        })
    }

    /// Activates the waiting worker if nothing holds it back.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the waiting worker is not installed.
    pub async fn try_activate_waiting(&self) -> Result<Option<ActivationReport>> {
        let _lifecycle = self.lifecycle.lock().await;
        self.activate_waiting_locked().await
    }

    async fn activate_waiting_locked(&self) -> Result<Option<ActivationReport>> {
        let (waiting, previous) = {
            let slots = self.slots.lock().await;
            (slots.waiting.clone(), slots.active.clone())
        };
        let Some(waiting) = waiting else {
            return Ok(None);
        };

        if let Some(previous) = &previous {
            let open = self.clients.count_controlled_by(previous.id()).await;
            if open > 0 && !waiting.skip_waiting_requested() {
                log::debug!(
                    "{} waits on {open} page(s) controlled by {}",
                    waiting.version(),
                    previous.version()
                );
                return Ok(None);
            }
        }

        {
            let mut slots = self.slots.lock().await;
            slots.waiting = None;
            slots.active = Some(Arc::clone(&waiting));
        }
        if let Some(previous) = previous {
            previous.make_redundant();
            self.emit_state(&previous);
        }

        self.emit(RegistrationEvent::StateChanged {
            worker: waiting.id(),
            state: WorkerState::Activating,
        });
        let report = waiting.activate(&self.clients).await?;
        self.emit_state(&waiting);
        log::info!(
            "{} active: deleted {} stale partition(s), claimed {} page(s)",
            waiting.version(),
            report.purge.deleted.len(),
            report.claimed
        );
        Ok(Some(report))
    }

    /// Delivers `message` to the waiting worker and applies its effect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoWaitingWorker`] when no worker is waiting.
    pub async fn post_message(&self, message: Message) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let waiting = self.waiting().await.ok_or(Error::NoWaitingWorker)?;
        waiting.handle_message(message);
        self.activate_waiting_locked().await?;
        Ok(())
    }

    /// Registers a page load, controlled by the active worker if there is one.
    pub async fn connect(&self, url: Url) -> ClientHandle {
        let controller = self.active().await.map(|w| w.id());
        self.clients.connect(url, controller).await
    }

    /// Forgets a closed page; the last page of the old version closing lets
    /// a waiting worker activate.
    ///
    /// # Errors
    ///
    /// Same as [`Registration::try_activate_waiting`].
    pub async fn close_client(&self, id: ClientId) -> Result<Option<ActivationReport>> {
        self.clients.disconnect(id).await;
        self.try_activate_waiting().await
    }
}
