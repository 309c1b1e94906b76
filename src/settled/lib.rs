//! # Settled Architecture
//!
//! Settled is a **UI-agnostic settings engine**. It owns one mutable settings
//! document per store instance, keeps it schema-valid, and persists it to a
//! pluggable backend as compact deltas. Saves are debounced, and at most one
//! is ever in flight.
//!
//! ## The Three-Layer Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Store Layer (store/)                                       │
//! │  - SettingsStore: live snapshot, debounced save pipeline,   │
//! │    draft transactions, undo/redo, listener notification     │
//! │  - The ONLY place with mutable state and timers             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Codec Layer (schema.rs, delta.rs, path.rs, value.rs)       │
//! │  - Pure functions: validate, diff, patch, deep-copy         │
//! │  - No state, no I/O, no awaits                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Backend Layer (backend/)                                   │
//! │  - Abstract SettingsBackend trait                           │
//! │  - FileBackend (production), MemoryBackend (in-process)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Principle: Mutations Are Synchronous, Persistence Is Not
//!
//! Every mutation entry point (`set`, `update`, draft operations) runs to
//! completion before returning; there is never a torn read of the live
//! snapshot. Persistence happens later, on a debounced timer, through a save
//! pipeline that guarantees at most one outbound write at a time and never
//! loses a mutation that lands mid-save.
//!
//! ## Testing Strategy
//!
//! 1. **Codec** (`schema.rs`, `delta.rs`, `path.rs`): thorough unit tests of
//!    the pure functions. This is where the lion's share of testing lives.
//! 2. **Backends** (`backend/`): unit tests against temp files and shared
//!    in-memory state.
//! 3. **Store** (`store/` + `tests/sync_flow.rs`): scenario tests on a
//!    paused Tokio clock covering debounce coalescing, the save guard,
//!    conflict surfacing, and draft isolation.
//!
//! ## Module Overview
//!
//! - [`store`]: the settings store, entry point for all operations
//! - [`schema`]: declared shapes, validation, defaulting
//! - [`delta`]: snapshot diffing and patch application
//! - [`path`]: dot-path codec for patch keys
//! - [`value`]: deep copy / deep merge over JSON-like values
//! - [`backend`]: persistence abstraction and implementations
//! - [`events`]: the event enum delivered to subscribers
//! - [`debounce`]: single-slot scheduled task
//! - [`config`]: store tuning knobs
//! - [`error`]: error types

pub mod backend;
pub mod config;
pub mod debounce;
pub mod delta;
pub mod error;
pub mod events;
pub mod path;
pub mod schema;
pub mod store;
pub mod value;
