//! Persistence core of a document-database object mapper.
//!
//! This crate turns managed entities into storage operations and back:
//!
//! - **Mapping metadata** ([`mapping`]) - Class and field mappings, loaded from code or [`config`]
//! - **Entities** ([`entity`]) - Accessor tables and shared entity handles
//! - **Criteria** ([`value`]) - Property-space values and query criteria
//! - **Persister** ([`persister`]) - Criteria compilation, guarded writes, batching and loading
//! - **Filters** ([`filter`]) - Discriminator and collaborator-supplied criteria
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Collaborators** ([`tracker`], [`hydrate`], [`collection`], [`repository`], [`builder`], [`convert`])
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmapper_core::{mapping::*, value::Criteria};
//!
//! let users = ClassMapping::new("User", "users")
//!     .with_field(FieldMapping::identifier("id"))
//!     .with_field(FieldMapping::new("name").stored_as("n"));
//!
//! let persister = manager.persister("User")?;
//! let query = persister.compile_query(&Criteria::new().with("name", "Ada"))?;
//! assert_eq!(query, bson::doc! { "n": "Ada" });
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_core;

pub mod backend;
pub mod builder;
pub mod collection;
pub mod config;
pub mod convert;
pub mod entity;
pub mod error;
pub mod filter;
pub mod hydrate;
pub mod mapping;
pub mod mutation;
pub mod persister;
pub mod repository;
pub mod store;
pub mod tracker;
pub mod value;
