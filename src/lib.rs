//! # Conciliación Core
//!
//! Reconciliation engine matching a bank statement ("extracto") against the
//! internal ledger ("sistema") for one account and month.
//!
//! ## Features
//!
//! - **Similarity scoring**: date decay, signed value tolerance and description similarity
//! - **Candidate matching**: deterministic greedy one-to-one assignment
//! - **Match classification**: SIN_MATCH, PROBABLE, OK, MANUAL and IGNORADO states
//! - **Manual overrides**: link, unlink, ignore, approve and create missing movements
//! - **Anomaly detection**: one sistema record linked to several statement lines
//! - **Period closing**: six integrity checks gating an irreversible lock
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use conciliacion_core::{Conciliador, Periodo};
//! use conciliacion_core::utils::MemoryStore;
//!
//! // Load records into any RecordStore implementation, then:
//! let conciliador = Conciliador::new(MemoryStore::new());
//! let periodo = Periodo::new(1, 2024, 3);
//! // let set = conciliador.ejecutar_matching(&periodo).await?;
//! ```

pub mod config;
pub mod matching;
pub mod reconciliation;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use matching::*;
pub use reconciliation::*;
pub use traits::*;
pub use types::*;
