//! Hub Gateway - the message-routing plane of the IoT hub.
//!
//! Consumers and agents connect over one HTTPS endpoint. Consumers read the
//! digital twin, write properties, invoke actions and subscribe to events;
//! agents publish TDs, events and property values and answer forwarded
//! requests. Push traffic flows back over SSE or WebSocket channels bound
//! to the caller's session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                             HUB GATEWAY                             │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐                     │
//! │  │    REST    │  │    /sse    │  │    /ws     │                     │
//! │  └─────┬──────┘  └─────┬──────┘  └─────┬──────┘                     │
//! │        │               │               │                            │
//! │  ┌─────┴───────────────┴───────────────┴──────┐                     │
//! │  │               Middleware Stack             │                     │
//! │  │   CatchPanic → CORS → Tracing → Auth       │                     │
//! │  └────────────────────┬───────────────────────┘                     │
//! │                       │                                             │
//! │  ┌────────────────────┴───────────────────────┐   ┌──────────────┐  │
//! │  │                  Router                    │──►│ Subscription │  │
//! │  │  serve │ apply + notify │ forward + reply  │   │   Registry   │  │
//! │  └───────┬─────────────────────────┬──────────┘   └──────────────┘  │
//! │          │                         │                                │
//! │  ┌───────┴────────┐        ┌───────┴────────┐                       │
//! │  │    Digitwin    │        │ SessionManager │                       │
//! │  │ (write-behind) │        │ push channels  │                       │
//! │  └────────────────┘        └────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use hub_gateway::{HubConfig, HubService};
//! use hub_digitwin::{DigitwinConfig, DigitwinStore};
//!
//! let hub = HubService::new(HubConfig::default(), DigitwinStore::in_memory(DigitwinConfig::default()))?;
//! let listener = tokio::net::TcpListener::bind(hub.config().bind_addr()).await?;
//! hub.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod authn;
pub mod domain;
pub mod middleware;
pub mod router;
pub mod service;
pub mod sessions;
pub mod subscriptions;
pub mod transport;

pub use authn::{Authenticator, AuthnStore, JwtAuthenticator, Role};
pub use domain::{ApiError, ApiResult, ErrorKind, HubConfig, HubError, RequestId, SessionId};
pub use router::{InvokeMode, InvokeReply, Router};
pub use service::HubService;
pub use sessions::{Session, SessionManager};
pub use subscriptions::SubscriptionRegistry;
pub use transport::{build_router, AppState};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
