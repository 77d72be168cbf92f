//! # Custody Testkit
//!
//! Testing utilities for Custody.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Parties with key pairs, and backends with those parties
//!   already registered
//! - **Generators**: Proptest strategies for keys, identifiers, payloads
//!   and blob meta
//!
//! ## Test Fixtures
//!
//! ```rust
//! use custody_core::Role;
//! use custody_testkit::fixtures::{memory_store_with, Party};
//!
//! let owner = Party::new(Role::Patient);
//! let reader = Party::new(Role::Researcher);
//! let store = memory_store_with(&[&owner, &reader]);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use custody_testkit::generators::{payload, private_key};
//!
//! proptest! {
//!     #[test]
//!     fn roundtrip(key in private_key(), data in payload(4096)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{memory_store_with, multi_party, sqlite_store_with, Party};
