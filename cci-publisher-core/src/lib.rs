#![doc = "cci-publisher-core: core logic library for cci-publisher."]

//! This crate holds the publishing pipeline for THREDDS catalogs: change
//! detection, catalog editing, NcML aggregation linking, dataset discovery
//! and reconciliation of deleted datasets.
//! Network clients and external tools live in the binary crate and plug in
//! through the traits in [`contract`].
//!
//! # Usage
//! Add this as a dependency for all shared catalog, state, discovery and sync code.

pub mod aggregation;
pub mod catalog;
pub mod config;
pub mod contract;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod state_store;
pub mod synchronise;
pub mod templates;
pub mod xml;
