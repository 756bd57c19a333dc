//! # Reconciliation Core
//!
//! A payment reconciliation library for property management, matching
//! incoming rent payments to open charges.
//!
//! ## Features
//!
//! - **Normalization**: Bank file rows, cash book entries and synced bank transactions become one canonical payment record
//! - **Tabular import**: Uploads with unknown column layouts are stored and queried by their original headers
//! - **Multi-signal scoring**: IBAN, name, amount, date and memo evidence combine into an explainable score
//! - **Resolution**: Per-source confidence thresholds with explicit ambiguity handling
//! - **Allocation**: Atomic, reversible matches with partial payment and overpayment tolerance
//! - **Storage abstraction**: Database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use reconciliation_core::{BatchOptions, ChargeScope, MemoryStorage, Reconciler};
//!
//! # async fn run() -> reconciliation_core::ReconResult<()> {
//! let mut reconciler = Reconciler::new(MemoryStorage::new());
//! reconciler
//!     .import_delimited("march", "Datum;Betrag;Name\n04.03.2024;500,00;Anna Schmidt\n")
//!     .await?;
//! let result = reconciler
//!     .reconcile_upload("march", &ChargeScope::all(), &BatchOptions::default())
//!     .await?;
//! println!("matched {} of {}", result.matched, result.processed);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod import;
pub mod normalize;
pub mod reconciliation;
pub mod scoring;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use import::{ImportedRow, ParsedTable, TabularImporter};
pub use normalize::{LedgerEntry, NormalizedBatch, Normalizer, PaymentInput, SyncedTransaction};
pub use reconciliation::{
    AttemptLogger, BatchOptions, BatchResult, CandidateResolver, IngestReport, MatchApplier,
    MatchDetail, Reconciler, Resolution, SourceSummary,
};
pub use scoring::{ScoreCard, ScoringWeights, SignalScorer};
pub use traits::*;
pub use types::*;
pub use utils::{MemoryStorage, StrictPaymentValidator};
