//! Core data model and configuration types for graphvault.
//!
//! This crate provides the vocabulary shared by the storage engine and its
//! callers:
//! - [`TermId`]: opaque fixed-width term identifiers, with the reserved
//!   default-graph and union-graph markers
//! - [`Quad`], [`Triple`] and [`QuadPattern`] for facts and lookups
//! - [`config::StoreConfig`]: validated engine configuration

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod types;

pub use types::*;
