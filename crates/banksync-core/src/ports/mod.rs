//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the scheduler core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`IBankProvider`] - Banking-provider API (accounts, subscriptions, payments)
//! - [`ILedgerSync`] - Ledger-write collaborator (one synchronization pass)
//! - [`IPortMapper`] - NAT traversal (public IP discovery, port mappings)
//! - [`ICallbackChannel`] - Externally reachable notification endpoint

pub mod bank_provider;
pub mod callback_channel;
pub mod ledger_sync;
pub mod port_mapper;

pub use bank_provider::{IBankProvider, TransactionRecord};
pub use callback_channel::{Event, ICallbackChannel};
pub use ledger_sync::ILedgerSync;
pub use port_mapper::{IPortMapper, MappingHandle};
