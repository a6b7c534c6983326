//! MongoDB backend implementation for docmapper.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait.
//! Criteria, sorts and mutations reach it already compiled to storage space, so it
//! passes them to the driver unchanged and only translates results and errors.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmapper = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Error Classification
//!
//! Driver errors are mapped to [`StorageErrorKind`](docmapper_core::error::StorageErrorKind)s
//! by server error code: immutable-field violations (including the legacy
//! "Mod on _id not allowed" rejection), duplicate keys and malformed updates.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
