//! Hub service: wiring, background tasks, serving and shutdown.

use crate::authn::{AuthnStore, Authenticator, JwtAuthenticator};
use crate::domain::{HubConfig, HubError, HubStats};
use crate::router::{Router, RouterTimeouts};
use crate::sessions::{SessionLimits, SessionManager};
use crate::subscriptions::SubscriptionRegistry;
use crate::transport::{build_router, AppState, FormsDecorator};
use hub_digitwin::{spawn_flusher, DigitwinStore};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Upper bound on waiting for background tasks at shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// The assembled hub.
pub struct HubService {
    config: Arc<HubConfig>,
    router: Arc<Router>,
    authenticator: Arc<JwtAuthenticator>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl HubService {
    /// Wire every component over an opened digital twin store.
    pub fn new(config: HubConfig, digitwin: DigitwinStore) -> Result<Self, HubError> {
        config.validate()?;
        let config = Arc::new(config);

        let authenticator = Arc::new(build_authenticator(&config)?);

        let stats = Arc::new(HubStats::default());
        let sessions = Arc::new(SessionManager::new(
            SessionLimits {
                channel_capacity: config.limits.channel_capacity,
                max_frame_size: config.limits.max_frame_size,
                reconnect_grace: config.timeouts.reconnect_grace,
                session_idle: config.timeouts.session_idle,
            },
            Arc::clone(&stats),
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        sessions.add_listener(subscriptions.clone());

        let router = Router::new(
            Arc::new(digitwin),
            sessions,
            subscriptions,
            stats,
            RouterTimeouts {
                request: config.timeouts.request,
                dispatch: config.timeouts.dispatch,
                record_lifetime: config.action_lifetime(),
            },
        )
        .with_decorator(Arc::new(FormsDecorator::new(config.public_url())));

        Ok(Self {
            config,
            router: Arc::new(router),
            authenticator,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    pub fn config(&self) -> &Arc<HubConfig> {
        &self.config
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn authenticator(&self) -> &Arc<JwtAuthenticator> {
        &self.authenticator
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The HTTP application.
    pub fn app(&self) -> axum::Router {
        let authenticator: Arc<dyn Authenticator> = self.authenticator.clone();
        build_router(AppState {
            router: Arc::clone(&self.router),
            authenticator,
            config: Arc::clone(&self.config),
        })
    }

    /// Start the session reaper, the action record sweep and the digitwin
    /// flusher.
    pub fn spawn_background(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        let gc_interval = self.config.timeouts.gc_interval;
        self.tasks.push(
            Arc::clone(self.router.sessions()).spawn_reaper(gc_interval, self.shutdown.clone()),
        );
        self.tasks.push(
            Arc::clone(self.router.actions()).spawn_gc(gc_interval, self.shutdown.clone()),
        );
        self.tasks.push(spawn_flusher(
            Arc::clone(self.router.digitwin()),
            self.config.storage.flush_interval,
            self.shutdown.clone(),
        ));
    }

    /// Stop pushing: close every session so writer loops end, then signal
    /// the background tasks.
    pub fn begin_shutdown(&self) {
        let closed = self.router.sessions().close_all();
        info!(sessions = closed, "shutting down");
        self.shutdown.cancel();
    }

    /// Wait for the background tasks, bounded by [`SHUTDOWN_TIMEOUT`]. The
    /// flusher writes its final batch here.
    pub async fn finish(mut self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut self.tasks);
        let joined = tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await;
        if joined.is_err() {
            warn!("background tasks did not stop in time");
        }
        info!("hub stopped");
    }

    /// Serve plain HTTP on `listener` until `signal` resolves.
    pub async fn serve<F>(mut self, listener: TcpListener, signal: F) -> Result<(), HubError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_background();
        let addr = listener
            .local_addr()
            .map_err(|e| HubError::Bind(e.to_string()))?;
        info!(addr = %addr, public_url = %self.config.public_url(), "hub listening");

        let sessions = Arc::clone(self.router.sessions());
        let token = self.shutdown.clone();
        let app = self.app();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = signal => {}
                _ = token.cancelled() => {}
            }
            sessions.close_all();
        })
        .await
        .map_err(|e| HubError::Internal(e.to_string()));

        self.begin_shutdown();
        self.finish().await;
        result
    }
}

fn build_authenticator(config: &HubConfig) -> Result<JwtAuthenticator, HubError> {
    let authn = &config.authn;
    let store = match &authn.clients_file {
        Some(path) => AuthnStore::open(path).map_err(|e| HubError::ClientStore(e.to_string()))?,
        None => AuthnStore::new(),
    };
    for seed in &authn.clients {
        let display_name = seed.display_name.as_deref().unwrap_or(&seed.client_id);
        store.upsert_client(&seed.client_id, display_name, seed.role, &seed.password);
    }
    info!(clients = store.len(), "client store loaded");
    let store = Arc::new(store);

    match &authn.signing_secret {
        Some(secret) => {
            let secret = hex::decode(secret).map_err(|e| HubError::Internal(e.to_string()))?;
            Ok(JwtAuthenticator::new(
                store,
                &secret,
                authn.consumer_token_validity,
                authn.agent_token_validity,
            ))
        }
        None => {
            info!("no signing secret configured, tokens expire with this process");
            Ok(JwtAuthenticator::ephemeral(
                store,
                authn.consumer_token_validity,
                authn.agent_token_validity,
            ))
        }
    }
}
