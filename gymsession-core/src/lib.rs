//! # Gymsession Core
//!
//! Authentication session layer for the gym client.
//!
//! This crate provides:
//! - The in-memory session (user + credentials) and its restoration at start
//! - Durable persistence of the session in a secure local store
//! - A request pipeline that attaches the access token and classifies failures
//! - Single-flight credential renewal with FIFO replay of queued requests
//! - The [`SessionContext`] façade and a typed [`GymApi`] over the business endpoints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gymsession_core::{GymApi, SessionConfig, SessionContext, create_store};
//!
//! async fn load_groups() -> Result<Vec<String>, gymsession_core::SessionError> {
//!     let context = SessionContext::connect(SessionConfig::default(), create_store(true).into())?;
//!     context.restore().await?;
//!     GymApi::new(context)?.groups().await
//! }
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod credential_store;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod renewal;
pub mod request;
pub mod session;
pub mod store;
pub mod transport;

// Re-export commonly used types at crate root
pub use model::{
    ActiveSession,
    Credentials,
    RestorationStatus,
    Session,
    User,
    UserPatch,
};

pub use store::{
    Secret,
    SecretStore,
    StoreError,
    MemoryStore,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringStore;

pub use error::{SessionError, GENERIC_MESSAGE};

pub use config::SessionConfig;

pub use credential_store::{CredentialStore, DEFAULT_SESSION_KEY};

pub use request::{ApiResponse, Method, RequestDescriptor};

pub use transport::{HttpTransport, Transport, TransportError};

pub use session::SessionModel;

pub use pipeline::RequestPipeline;

pub use renewal::RenewalCoordinator;

pub use context::SessionContext;

pub use api::{Exercise, GymApi, ProfileUpdate};
