//! # porter-core
//!
//! Offline trust core for porter entry-control devices: verifies scanned
//! authorizations against the enrolled organization key, records every
//! decision durably, and synchronizes with the organization backend when
//! connectivity allows.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Scanning shell                           │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐       │
//! │  │              PayloadVerifier                      │       │
//! │  │   (key presence, signature, window, revocation)  │       │
//! │  └──────────────────────────────────────────────────┘       │
//! │          │                │                 │                │
//! │          ▼                ▼                 ▼                │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   KeyStore   │  │  EventQueue  │  │ Revocation   │      │
//! │  │ (encrypted)  │  │ (JSON lines) │  │ Cache (enc.) │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           ▲                 ▲                │
//! │                           │                 │                │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              SyncOrchestrator                     │      │
//! │  │      (push events, pull revocation delta)        │      │
//! │  └──────────────────────────────────────────────────┘      │
//! │                           │                                  │
//! │                           ▼                                  │
//! │  ┌──────────────────────────────────────────────────┐      │
//! │  │              BackendTransport                     │      │
//! │  │              (reqwest, JSON)                      │      │
//! │  └──────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Properties
//!
//! - **Offline-first**: scans decide locally; the backend is never on the
//!   scan path
//! - **Fail-closed key**: unreadable key state denies every scan
//! - **Fail-open revocation**: unreadable revocation state admits
//!   (revocations are additive advice, not the trust root)
//! - **At-least-once events**: queued scans survive restarts and are
//!   deduplicated by the backend via `event_uid`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

pub mod config;
pub mod error;
pub mod queue;
pub mod revocation;
pub mod sync;
pub mod transport;
pub mod verifier;

pub use config::CoreConfig;
pub use error::{CoreError, TransportError};
pub use queue::{
    AccessEvent, EventQueue, FileEventQueue, MemoryEventQueue, PendingEvent, ScanOutcome,
};
pub use revocation::{
    FileRevocationCache, MemoryRevocationCache, RevocationCache, RevocationRecord,
};
pub use sync::{SyncOrchestrator, SyncReport, SyncState};
pub use transport::{BackendTransport, HttpTransport, RevocationDelta};
pub use verifier::{AccessDecision, DenialReason, PayloadVerifier};
