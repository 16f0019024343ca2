//! # Trophyrack - achievement engine for collections of mini-games
//!
//! Trophyrack observes gameplay events emitted by independent game modules,
//! accumulates per-achievement progress, resolves cross-achievement and
//! feature dependencies, persists everything in a compact string form and
//! exposes claimable rewards to whatever presentation layer sits on top.
//!
//! ## Features
//!
//! - **Property stores**: named key → `i64` bags with change notification,
//!   throttled writes, silent batching and a checksummed compact format.
//! - **Scoped data**: game sessions (`OPEN → CLOSED`), per-type aggregates,
//!   global data and time keepers on top of the stores.
//! - **Achievements**: a forward-only state machine per achievement, driven
//!   by pluggable rules, gated by dependencies, with chained triggers.
//! - **Registry**: strict three phase bootstrap and persistence of every
//!   managed store through a pluggable backend.
//! - **Daily rotation**: randomized, seedable daily subset activation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trophyrack::dependency::FeatureFlags;
//! use trophyrack::persistence::JsonFileBackend;
//! use trophyrack::registry::AchievementRegistry;
//! use trophyrack::seeds;
//!
//! fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(JsonFileBackend::new("data/state.json"));
//!     let registry = AchievementRegistry::new(backend, Arc::new(FeatureFlags::new()));
//!     registry.bootstrap(seeds::blueprints(seeds::starter_seeds()))?;
//!
//!     let tinyhack = registry.game_data("tinyhack");
//!     tinyhack.instance.load(None)?;
//!     tinyhack.instance.increment("moves", 42, 0);
//!     tinyhack.instance.close(1)?;
//!
//!     for view in registry.list_achievements("tinyhack")? {
//!         println!("#{} {:?} {}", view.id, view.state, view.description);
//!     }
//!     registry.save_all()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`store`] - property stores, change events and the compact format
//! - [`scoped`] - game instance, aggregate, misc and timer data
//! - [`dependency`] - dependency predicates and their factory
//! - [`achievement`] - achievement state machine, rules and rewards
//! - [`rules`] - reusable achievement rules
//! - [`registry`] - holders, bootstrap and store persistence
//! - [`daily`] - daily reset and rotation
//! - [`persistence`] - backends for compacted stores
//! - [`seeds`] - JSON holder definitions
//! - [`config`] - configuration of the binary
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Game modules   │ ← increment / put_value / close
//! └─────────────────┘
//!          │ ChangeEvent
//! ┌─────────────────┐
//! │  Achievements   │ ← rules, dependencies, triggers
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │    Registry     │ ← bootstrap, persistence, rewards
//! └─────────────────┘
//! ```

pub mod achievement;
pub mod config;
pub mod daily;
pub mod dependency;
pub mod errors;
pub mod logutil;
pub mod metrics;
pub mod persistence;
pub mod registry;
pub mod rules;
pub mod scoped;
pub mod seeds;
pub mod store;
