//! banksync Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `Account`, `Subscription`, `ChannelState`, `SchedulerState`
//! - **Port definitions** - Traits for adapters: `IBankProvider`, `ILedgerSync`,
//!   `IPortMapper`, `ICallbackChannel`
//! - **Backoff policy** - Escalating retry delays for the scheduler loop
//! - **Configuration** - Typed config with YAML loading and defaults
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no network I/O.
//! Ports define trait interfaces that adapter crates implement: the
//! banking-provider HTTP adapter, the UPnP port mapper, and the TCP
//! callback channel all live outside this crate.

pub mod backoff;
pub mod config;
pub mod domain;
pub mod ports;
