//! Shared types for the docset store.
//!
//! This crate holds everything the engine and executor agree on: the
//! document model ([`Document`], [`Meta`]), the wire envelope, the unified
//! [`Error`] taxonomy with its HTTP mapping, identifier and reserved-field
//! rules, and JSON path canonicalization. It executes no SQL and embeds no
//! interpreter.

pub mod error;
pub mod ident;
pub mod meta;
pub mod path;

pub use error::{Error, Result};
pub use meta::{Document, Envelope, Meta, QueryPage};
