//! Open pages and which worker version controls each of them.

use reqwest::Url;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::worker::WorkerId;

/// Identifies one open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", &self.0.simple().to_string()[..8])
    }
}

/// Notifications delivered to a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The page is now served by a different worker.
    ControllerChange { controller: WorkerId },
}

/// A page's end of the connection: its id and its event stream.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: ClientId,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
}

struct ClientSlot {
    id: ClientId,
    url: Url,
    controller: Option<WorkerId>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

/// Registry of open pages.
#[derive(Default)]
pub struct Clients {
    slots: Mutex<Vec<ClientSlot>>,
}

impl Clients {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a page load. A page loaded while a worker is active starts
    /// out controlled by it and gets no controller-change for that.
    pub async fn connect(&self, url: Url, controller: Option<WorkerId>) -> ClientHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ClientId::new();
        self.slots.lock().await.push(ClientSlot {
            id,
            url,
            controller,
            events: tx,
        });
        ClientHandle { id, events: rx }
    }

    /// Forgets a closed page. Returns whether it was known.
    pub async fn disconnect(&self, id: ClientId) -> bool {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|s| s.id != id);
        slots.len() != before
    }

    /// Makes `worker` the controller of every open page and tells each page
    /// whose controller changed. Returns the number of pages notified.
    pub async fn claim(&self, worker: WorkerId) -> usize {
        let mut slots = self.slots.lock().await;
        let mut changed = 0;
        for slot in slots.iter_mut() {
            if slot.controller == Some(worker) {
                continue;
            }
            slot.controller = Some(worker);
            changed += 1;
            if slot
                .events
                .send(ClientEvent::ControllerChange { controller: worker })
                .is_err()
            {
                log::debug!("{} at {} stopped listening", slot.id, slot.url);
            }
        }
        changed
    }

    /// The worker controlling page `id`, if any.
    pub async fn controller_of(&self, id: ClientId) -> Option<WorkerId> {
        self.slots
            .lock()
            .await
            .iter()
            .find(|s| s.id == id)
            .and_then(|s| s.controller)
    }

    /// Number of pages currently served by `worker`.
    pub async fn count_controlled_by(&self, worker: WorkerId) -> usize {
        self.slots
            .lock()
            .await
            .iter()
            .filter(|s| s.controller == Some(worker))
            .count()
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::url;

    #[tokio::test]
    async fn claim_notifies_each_changed_client_once() {
        let clients = Clients::new();
        let old = WorkerId::new();
        let new = WorkerId::new();
        let mut a = clients.connect(url("/"), Some(old)).await;
        let mut b = clients.connect(url("/tools/calculator.html"), None).await;

        assert_eq!(clients.claim(new).await, 2);
        assert_eq!(
            a.events.try_recv().unwrap(),
            ClientEvent::ControllerChange { controller: new }
        );
        assert_eq!(
            b.events.try_recv().unwrap(),
            ClientEvent::ControllerChange { controller: new }
        );

        // Claiming again changes nothing.
        assert_eq!(clients.claim(new).await, 0);
        assert!(a.events.try_recv().is_err());
        assert_eq!(clients.controller_of(a.id).await, Some(new));
        assert_eq!(clients.count_controlled_by(new).await, 2);
        assert_eq!(clients.count_controlled_by(old).await, 0);
    }

    #[tokio::test]
    async fn claim_tolerates_closed_receivers() {
        let clients = Clients::new();
        let handle = clients.connect(url("/"), None).await;
        drop(handle.events);
        assert_eq!(clients.claim(WorkerId::new()).await, 1);
    }

    #[tokio::test]
    async fn disconnect_removes_client() {
        let clients = Clients::new();
        let handle = clients.connect(url("/"), None).await;
        assert_eq!(clients.len().await, 1);
        assert!(clients.disconnect(handle.id).await);
        assert!(!clients.disconnect(handle.id).await);
        assert!(clients.is_empty().await);
    }
}
