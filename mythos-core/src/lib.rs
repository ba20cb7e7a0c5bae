//! Agent orchestration and state reconciliation for AI-narrated campaigns.
//!
//! This crate provides:
//! - A classifier that picks the specialist roles a participant's input needs
//! - Nine specialists that answer concurrently with role-specific context
//! - A reconciler that merges their proposals into one narrative and one
//!   conflict-free write batch, plus a yes/no oracle with random twists
//! - A path-addressable world store boundary with an in-memory implementation
//!
//! # Quick Start
//!
//! ```ignore
//! use mythos_core::{ApiKey, ClaudeCompletion, MemoryStore, Orchestrator, PlayerId, SessionId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::load_json("campaigns.json").await?);
//!     let completion = Arc::new(ClaudeCompletion::new(claude::Claude::new("")));
//!     let orchestrator = Orchestrator::new(store.clone(), completion);
//!
//!     let turn = orchestrator
//!         .process_input(
//!             &SessionId::from("S1"),
//!             &PlayerId::from("u1"),
//!             &ApiKey::from(std::env::var("ANTHROPIC_API_KEY")?),
//!             "I push open the tavern door",
//!         )
//!         .await?;
//!     println!("{}", turn.narrative);
//!
//!     store.save_json("campaigns.json").await?;
//!     Ok(())
//! }
//! ```

pub mod chaos;
pub mod compiler;
pub mod completion;
pub mod config;
pub mod context;
pub mod director;
pub mod error;
pub mod ids;
pub mod orchestrator;
pub mod path;
pub mod proposal;
pub mod role;
pub mod session;
pub mod setup;
pub mod specialists;
pub mod store;
pub mod testing;
pub mod transcript;

// Primary public API
pub use chaos::{ChaosFactor, DeterministicRng, OracleOutcome, SeededRng, ThreadRng};
pub use compiler::{Compiled, Compiler};
pub use completion::{ApiKey, ClaudeCompletion, CompletionError, TextCompletion};
pub use config::EngineConfig;
pub use director::{Classification, Director};
pub use error::{EngineError, Result, StoreError};
pub use ids::{generate_entity_id, EntityKind, PlayerId, SessionId};
pub use orchestrator::{Orchestrator, TurnResult};
pub use path::{ConflictPolicy, MutationBatch, StorePath};
pub use proposal::Proposal;
pub use role::Role;
pub use session::SessionSnapshot;
pub use setup::{SessionSetup, SetupRequest, SetupResult};
pub use store::{MemoryStore, WorldStore};
pub use testing::{ScriptedCompletion, SequenceRng, TestHarness};
pub use transcript::TranscriptEntry;
