//! Registration: owns the intermediary instances for one scope
//!
//! A registration tracks at most one installing, one waiting and one active
//! instance, plus the pages (clients) it may control. Updating it with a new
//! manifest drives the new instance through install and activate; the
//! instance it replaces becomes redundant only once activation succeeds.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use url::Url;

use super::interceptor::{InterceptedResponse, Interceptor};
use super::lifecycle::{
    self, ActivationReport, LifecycleError, LifecycleState, LifecycleTask, Worker, WorkerId,
};
use super::AssetManifest;
use crate::network::{Network, NetworkError, Request};
use crate::store::{Generation, GenerationInfo, SnapshotStore, StoreError};

/// Identifier of a page using the registration
pub type ClientId = u64;

/// A page that issues requests through the registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Instance currently controlling this page
    pub controller: Option<WorkerId>,
}

/// Outcome of [`Registration::update`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The active instance already serves this exact manifest
    UpToDate { version: String },
    /// A new instance installed and took control
    Activated {
        worker: WorkerId,
        installed: GenerationInfo,
        activation: ActivationReport,
    },
}

#[derive(Debug, Default)]
struct Slots {
    installing: Option<Worker>,
    waiting: Option<Worker>,
    active: Option<Worker>,
    redundant: Vec<Worker>,
}

impl Slots {
    fn retire(&mut self, mut worker: Worker) {
        tracing::info!(worker = worker.id, version = %worker.version, "instance redundant");
        worker.state = LifecycleState::Redundant;
        self.redundant.push(worker);
    }

    /// Takes `id` out of whichever pending slot holds it
    fn take_pending(&mut self, id: WorkerId) -> Option<Worker> {
        if self.installing.as_ref().is_some_and(|w| w.id == id) {
            return self.installing.take();
        }
        if self.waiting.as_ref().is_some_and(|w| w.id == id) {
            return self.waiting.take();
        }
        None
    }

    fn find(&self, id: WorkerId) -> Option<&Worker> {
        self.installing
            .iter()
            .chain(self.waiting.iter())
            .chain(self.active.iter())
            .chain(self.redundant.iter())
            .find(|w| w.id == id)
    }
}

/// The network intermediary for one scope
pub struct Registration {
    scope: Url,
    store: Arc<dyn SnapshotStore>,
    network: Arc<dyn Network>,
    interceptor: Interceptor,
    next_worker: AtomicU64,
    slots: Mutex<Slots>,
    // Held while pre-empting an install and while committing one
    install_gate: Mutex<()>,
    clients: Mutex<BTreeMap<ClientId, Client>>,
    next_client: AtomicU64,
}

impl Registration {
    /// Creates a registration with no instances
    pub fn new(scope: Url, store: Arc<dyn SnapshotStore>, network: Arc<dyn Network>) -> Self {
        let interceptor = Interceptor::new(store.clone(), network.clone());
        Self {
            scope,
            store,
            network,
            interceptor,
            next_worker: AtomicU64::new(1),
            slots: Mutex::new(Slots::default()),
            install_gate: Mutex::new(()),
            clients: Mutex::new(BTreeMap::new()),
            next_client: AtomicU64::new(1),
        }
    }

    /// Creates a registration whose active instance serves the store's current generation
    ///
    /// This is how a fresh process picks up the state a previous one left
    /// behind: whatever generation is current keeps serving until an update
    /// replaces it.
    pub async fn restore(
        scope: Url,
        store: Arc<dyn SnapshotStore>,
        network: Arc<dyn Network>,
    ) -> Result<Self, StoreError> {
        let registration = Self::new(scope, store, network);
        if let Some(current) = registration.store.current().await? {
            let info = registration
                .store
                .generations()
                .await?
                .into_iter()
                .find(|g| g.name == current);
            if let Some(info) = info {
                let mut worker = Worker::new(registration.allocate_worker(), info.name, info.fingerprint);
                worker.state = LifecycleState::Active;
                tracing::debug!(worker = worker.id, version = %worker.version, "restored active instance");
                registration.slots.lock().await.active = Some(worker);
            }
        }
        Ok(registration)
    }

    fn allocate_worker(&self) -> WorkerId {
        self.next_worker.fetch_add(1, Ordering::Relaxed)
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        self.store.clone()
    }

    fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }

    /// The instance currently serving controlled pages
    pub async fn active(&self) -> Option<Worker> {
        self.slots.lock().await.active.clone()
    }

    /// Lifecycle state of any instance this registration has created
    pub async fn state_of(&self, id: WorkerId) -> Option<LifecycleState> {
        self.slots.lock().await.find(id).map(|w| w.state)
    }

    /// Installs and activates `manifest` if it differs from the active one
    ///
    /// With `force`, an unchanged manifest is installed and activated again.
    /// A failed install leaves the active instance and its generation
    /// untouched.
    pub async fn update(
        &self,
        manifest: AssetManifest,
        force: bool,
    ) -> Result<UpdateOutcome, LifecycleError> {
        let fingerprint = manifest.fingerprint();
        let version = manifest.version.clone();

        let worker_id = {
            let _gate = self.install_gate.lock().await;
            let mut slots = self.slots.lock().await;
            if !force && slots.active.as_ref().is_some_and(|w| w.fingerprint == fingerprint) {
                tracing::debug!(%version, "manifest unchanged");
                return Ok(UpdateOutcome::UpToDate { version });
            }
            let worker = Worker::new(self.allocate_worker(), version.clone(), fingerprint);
            let id = worker.id;
            tracing::info!(worker = id, %version, "installing");
            if let Some(previous) = slots.installing.replace(worker) {
                slots.retire(previous);
            }
            id
        };

        let fetch = LifecycleTask::spawn(lifecycle::fetch_candidate(
            self.network.clone(),
            self.scope.clone(),
            manifest,
        ));
        let committed = match fetch.settled().await {
            Ok(candidate) => self.commit_if_installing(worker_id, candidate).await,
            Err(e) => Err(e),
        };
        let installed = match committed {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!(worker = worker_id, %version, error = %e, "install failed");
                let mut slots = self.slots.lock().await;
                if let Some(worker) = slots.take_pending(worker_id) {
                    slots.retire(worker);
                }
                return Err(e);
            }
        };

        // Installed. Waiting is skipped: go straight on to activation.
        {
            let mut slots = self.slots.lock().await;
            let Some(mut worker) = slots.take_pending(worker_id) else {
                return Err(LifecycleError::Superseded(version));
            };
            worker.state = LifecycleState::Waiting;
            if let Some(previous) = slots.waiting.replace(worker) {
                slots.retire(previous);
            }
        }

        let activate = LifecycleTask::spawn(lifecycle::activate(self.store.clone(), version.clone()));
        let activation = match activate.settled().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(worker = worker_id, %version, error = %e, "activation failed");
                let mut slots = self.slots.lock().await;
                if let Some(worker) = slots.take_pending(worker_id) {
                    slots.retire(worker);
                }
                return Err(e);
            }
        };

        {
            let mut slots = self.slots.lock().await;
            let Some(mut worker) = slots.take_pending(worker_id) else {
                return Err(LifecycleError::Superseded(version));
            };
            worker.state = LifecycleState::Active;
            if let Some(previous) = slots.active.replace(worker) {
                slots.retire(previous);
            }
        }
        self.claim(worker_id).await;

        Ok(UpdateOutcome::Activated {
            worker: worker_id,
            installed,
            activation,
        })
    }

    /// Commits `candidate` unless a newer update pre-empted `worker`
    ///
    /// A pre-empted install never reaches the store, so it cannot leave a
    /// generation behind that no activation will clean up.
    async fn commit_if_installing(
        &self,
        worker: WorkerId,
        candidate: Generation,
    ) -> Result<GenerationInfo, LifecycleError> {
        let _gate = self.install_gate.lock().await;
        let installing = self
            .slots
            .lock()
            .await
            .installing
            .as_ref()
            .is_some_and(|w| w.id == worker);
        if !installing {
            tracing::info!(worker, generation = %candidate.name, "superseded before commit; candidate dropped");
            return Err(LifecycleError::Superseded(candidate.name));
        }
        let info = self.store.commit(candidate).await?;
        tracing::info!(worker, generation = %info.name, entries = info.entries, "app shell cached");
        Ok(info)
    }

    /// Opens a page; it starts out controlled if an instance is already active
    pub async fn open_client(&self, url: Url) -> ClientId {
        let controller = if self.in_scope(&url) {
            self.active().await.map(|w| w.id)
        } else {
            None
        };
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        self.clients.lock().await.insert(
            id,
            Client {
                id,
                url,
                controller,
            },
        );
        id
    }

    pub async fn client(&self, id: ClientId) -> Option<Client> {
        self.clients.lock().await.get(&id).cloned()
    }

    /// Takes control of every open page in scope without waiting for a reload
    async fn claim(&self, worker: WorkerId) {
        let mut clients = self.clients.lock().await;
        let mut claimed = 0;
        for client in clients.values_mut() {
            if self.in_scope(&client.url) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        tracing::debug!(worker, claimed, "claimed clients");
    }

    /// Handles a request issued by page `client`
    ///
    /// Requests from controlled pages go through the interceptor; anything
    /// else is sent to the network as if no intermediary existed.
    pub async fn handle_fetch(
        &self,
        client: ClientId,
        request: &Request,
    ) -> Result<InterceptedResponse, NetworkError> {
        let controller = self
            .clients
            .lock()
            .await
            .get(&client)
            .and_then(|c| c.controller);
        let active = self.active().await.map(|w| w.id);

        if controller.is_some() && controller == active {
            tracing::debug!(client, url = %request.url, "intercepting fetch");
            self.interceptor.respond(request).await
        } else {
            self.interceptor.forward(request).await
        }
    }
}
