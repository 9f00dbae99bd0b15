//! CRM Rust Client
//!
//! A Rust client library for the WhatsApp CRM REST backend, with bearer-token
//! authentication, single-flight token refresh with request replay, and
//! session supervision.

pub mod auth_client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod refresh;
pub mod session;
pub mod storage;
pub mod supervisor;
pub mod token_store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth_client::{ApiClient, Navigator, TracingNavigator};
pub use config::ClientConfig;
pub use error::{ApiError, ClientError, Result};
pub use session::{SessionState, SessionStore};
pub use storage::{FileStorage, MemoryStorage, NoopStorage, Storage, StorageEvent};
pub use supervisor::{ActivitySink, SessionSupervisor};
pub use token_store::TokenStore;
pub use transport::{ApiRequest, ReqwestTransport, Transport};
pub use types::{ApiResponse, LoginRequest, LogoutReason, TokenPair, UserInfo};
