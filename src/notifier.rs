//! Page-side update prompt and the reload that follows an update.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, broadcast, mpsc};

use crate::clients::ClientEvent;
use crate::error::Result;
use crate::registration::{Registration, RegistrationEvent};
use crate::worker::{Message, WorkerId, WorkerState};

/// Hooks for the page's user interface.
///
/// All methods have default no-op implementations.
pub trait NotifierHooks: Send + Sync {
    /// A new version is waiting; show a persistent prompt offering to apply it.
    fn on_update_available(&self, _worker: WorkerId) {}

    /// The user closed the prompt without applying the update.
    fn on_update_dismissed(&self) {}

    /// Reload the page so it runs against the new version.
    fn reload(&self) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl NotifierHooks for NoHooks {}

/// Watches one page's registration for waiting updates.
pub struct UpdateNotifier<H: NotifierHooks = NoHooks> {
    registration: Arc<Registration>,
    hooks: H,
    prompted_for: Mutex<Option<WorkerId>>,
    refreshing: AtomicBool,
}

impl<H: NotifierHooks> UpdateNotifier<H> {
    pub fn new(registration: Arc<Registration>, hooks: H) -> Self {
        Self {
            registration,
            hooks,
            prompted_for: Mutex::new(None),
            refreshing: AtomicBool::new(false),
        }
    }

    pub const fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Prompts if a worker is already waiting. Returns whether one is.
    pub async fn check_waiting(&self) -> bool {
        match self.registration.waiting().await {
            Some(waiting) => {
                self.prompt(waiting.id()).await;
                true
            }
            None => false,
        }
    }

    pub async fn on_registration_event(&self, event: RegistrationEvent) {
        let RegistrationEvent::StateChanged {
            worker,
            state: WorkerState::Installed,
        } = event
        else {
            return;
        };
        // A first install has nothing to replace; neither does a worker that
        // already took over.
        let replaces_active = self
            .registration
            .active()
            .await
            .is_some_and(|active| active.id() != worker);
        if replaces_active {
            self.prompt(worker).await;
        }
    }

    async fn prompt(&self, worker: WorkerId) {
        let mut prompted = self.prompted_for.lock().await;
        if *prompted == Some(worker) {
            return;
        }
        *prompted = Some(worker);
        log::info!("Update available: {worker}");
        self.hooks.on_update_available(worker);
    }

    /// The user accepted the update: tell the waiting worker to skip waiting.
    pub async fn apply_update(&self) -> Result<()> {
        self.registration.post_message(Message::SkipWaiting).await
    }

    /// The user dismissed the prompt. Nothing is posted.
    pub fn dismiss(&self) {
        self.hooks.on_update_dismissed();
    }

    /// Reloads once. Returns `false` if a reload already happened.
    pub fn on_controller_change(&self) -> bool {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return false;
        }
        log::info!("Controller changed, reloading");
        self.hooks.reload();
        true
    }

    /// Processes events until either stream closes.
    pub async fn run(
        &self,
        mut client_events: mpsc::UnboundedReceiver<ClientEvent>,
        mut registration_events: broadcast::Receiver<RegistrationEvent>,
    ) {
        self.check_waiting().await;
        loop {
            tokio::select! {
                event = client_events.recv() => match event {
                    Some(ClientEvent::ControllerChange { .. }) => {
                        self.on_controller_change();
                    }
                    None => break,
                },
                event = registration_events.recv() => match event {
                    Ok(event) => self.on_registration_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {skipped} registration events");
                        self.check_waiting().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::cache::{CacheStorage, MemoryCacheStorage};
    use crate::config::CacheConfig;
    use crate::network::Network;
    use crate::testing::{MockNetwork, origin, url};
    use crate::worker::OfflineWorker;

    #[derive(Default)]
    struct CountingHooks {
        prompts: AtomicUsize,
        dismissals: AtomicUsize,
        reloads: AtomicUsize,
    }

    impl NotifierHooks for CountingHooks {
        fn on_update_available(&self, _worker: WorkerId) {
            self.prompts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_update_dismissed(&self) {
            self.dismissals.fetch_add(1, Ordering::SeqCst);
        }

        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingHooks {
        fn prompts(&self) -> usize {
            self.prompts.load(Ordering::SeqCst)
        }

        fn reloads(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }
    }

    struct Site {
        registration: Arc<Registration>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    }

    impl Site {
        fn new() -> Self {
            Self {
                registration: Arc::new(Registration::new()),
                storage: Arc::new(MemoryCacheStorage::new()),
                network: Arc::new(MockNetwork::new().with_page("/", 200, "home")),
            }
        }

        async fn deploy(&self, version: &str) {
            let config = CacheConfig::default()
                .with_version(version)
                .with_critical_assets(["/"]);
            let worker = OfflineWorker::new(
                config,
                origin(),
                Arc::clone(&self.storage),
                Arc::clone(&self.network),
            )
            .unwrap();
            self.registration.register(worker).await.unwrap();
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn skip_waiting_reloads_each_tab_exactly_once() {
        let site = Site::new();
        site.deploy("v4").await;

        let mut tabs = Vec::new();
        for path in ["/", "/tools/calculator.html"] {
            let page = site.registration.connect(url(path)).await;
            let notifier = Arc::new(UpdateNotifier::new(
                Arc::clone(&site.registration),
                CountingHooks::default(),
            ));
            let events = site.registration.subscribe();
            let runner = Arc::clone(&notifier);
            tokio::spawn(async move { runner.run(page.events, events).await });
            tabs.push(notifier);
        }

        site.deploy("v5").await;
        assert_eq!(site.registration.waiting().await.unwrap().version(), "v5");
        wait_until(|| tabs.iter().all(|t| t.hooks().prompts() == 1)).await;

        tabs[0].apply_update().await.unwrap();
        wait_until(|| tabs.iter().all(|t| t.hooks().reloads() == 1)).await;

        // A duplicated controller-change must not reload again.
        for tab in &tabs {
            assert!(!tab.on_controller_change());
        }
        site.registration.clients().claim(WorkerId::new()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        for tab in &tabs {
            assert_eq!(tab.hooks().reloads(), 1);
            assert_eq!(tab.hooks().prompts(), 1);
        }

        let active = site.registration.active().await.unwrap();
        assert_eq!(active.version(), "v5");
        assert_eq!(active.state(), WorkerState::Activated);
    }

    #[tokio::test]
    async fn prompts_when_attaching_with_a_waiting_worker() {
        let site = Site::new();
        site.deploy("v4").await;
        let _page = site.registration.connect(url("/")).await;
        site.deploy("v5").await;

        let notifier = UpdateNotifier::new(Arc::clone(&site.registration), CountingHooks::default());
        assert!(notifier.check_waiting().await);
        assert!(notifier.check_waiting().await);
        assert_eq!(notifier.hooks().prompts(), 1);
    }

    #[tokio::test]
    async fn first_install_does_not_prompt() {
        let site = Site::new();
        let notifier = Arc::new(UpdateNotifier::new(
            Arc::clone(&site.registration),
            CountingHooks::default(),
        ));
        let mut events = site.registration.subscribe();
        site.deploy("v4").await;

        while let Ok(event) = events.try_recv() {
            notifier.on_registration_event(event).await;
        }
        assert_eq!(notifier.hooks().prompts(), 0);
        assert!(!notifier.check_waiting().await);
    }

    #[tokio::test]
    async fn dismiss_posts_nothing() {
        let site = Site::new();
        site.deploy("v4").await;
        let _page = site.registration.connect(url("/")).await;
        site.deploy("v5").await;

        let notifier = UpdateNotifier::new(Arc::clone(&site.registration), CountingHooks::default());
        notifier.check_waiting().await;
        notifier.dismiss();

        assert_eq!(notifier.hooks().dismissals.load(Ordering::SeqCst), 1);
        assert_eq!(site.registration.waiting().await.unwrap().version(), "v5");
        assert_eq!(site.registration.active().await.unwrap().version(), "v4");
    }
}
