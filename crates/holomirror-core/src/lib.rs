//! Broadcast decoupling layer for Holomirror.
//!
//! A worker publishes events once; any number of observers attach and get
//! a bounded replay of recent events followed by the live stream. Observers
//! never slow the worker down: a slow or broken observer only loses its
//! own membership.
//!
//! # Modules
//!
//! - [`mirror`] -- [`HolographicBuffer`], the per-worker multicast primitive
//! - [`history`] -- [`HistoryRing`], the bounded replay buffer
//! - [`connection`] -- the [`Connection`] capability and [`ChannelConnection`]
//! - [`worker`] -- the [`WorkerHandle`] seen by the gateway, plus [`ManualWorker`]
//! - [`metabolism`] -- periodic counter sampling published as events
//! - [`config`] -- YAML + environment configuration
//! - [`error`] -- connection and invocation errors

pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod metabolism;
pub mod mirror;
pub mod worker;

pub use config::{ConfigError, HolomirrorConfig, MetabolismConfig, MirrorConfig};
pub use connection::{ChannelConnection, Connection, Frame};
pub use error::{ConnectionError, InvokeError};
pub use history::HistoryRing;
pub use metabolism::{MetabolismExit, MetabolismSampler, spawn_metabolism_loop};
pub use mirror::{DrainReport, HolographicBuffer, RoundReport};
pub use worker::{ManualWorker, WorkerCounters, WorkerHandle};
