//! `tessera` is a Rust library for the control plane of fragment-based multidimensional arrays.
//!
//! An array is a directory-like prefix in a store holding a schema document, immutable timestamped *fragments* of cell data, and timestamped *metadata blocks*.
//! `tessera` manages:
//! - opening and closing arrays with point-in-time visibility over a timestamp window (time travel),
//! - merging fragments and metadata blocks (consolidation) without deleting the originals,
//! - reclaiming the space of superseded fragments and metadata blocks (vacuuming), and
//! - an embedded typed key-value metadata store attached to each array.
//!
//! ## Getting Started
//! ```rust
//! # use std::sync::Arc;
//! use tessera::array::{Array, ArraySchema, ArrayType, Attribute, Datatype, Dimension, EncryptionKey, QueryType};
//! use tessera::context::Context;
//!
//! let store = Arc::new(tessera::storage::store::MemoryStore::new());
//! let ctx = Arc::new(Context::new(store));
//!
//! let schema = ArraySchema::new(
//!     ArrayType::Sparse,
//!     vec![Dimension::new("x", 0, 99)?],
//!     vec![Attribute::new("a", Datatype::Int32)],
//! )?;
//! Array::create(&ctx, "/array", &schema, &EncryptionKey::none())?;
//!
//! let array = Array::new(&ctx, "/array", QueryType::Write)?;
//! array.put_metadata("k1", Datatype::Int32, 1, 42i32.to_le_bytes().to_vec())?;
//! array.write_fragment([(vec![3], 7i32.to_le_bytes().to_vec().into())])?;
//! array.close()?;
//!
//! let array = Array::new(&ctx, "/array", QueryType::Read)?;
//! let value = array.get_metadata("k1")?;
//! assert_eq!(value.value().as_ref(), 42i32.to_le_bytes());
//! assert_eq!(array.read_cells()?.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Storage
//! `tessera` issues logical operations against any store implementing the [`tessera_storage`] API.
//! An in-memory store is included in [`storage::store`] and a filesystem store is available with the `filesystem` feature.
//!
//! ## Logging
//! `tessera` logs information and warnings using the [`log`] crate.
//! A logging implementation must be enabled to capture logs.
//! See the [`log`] crate documentation for more details.
//!
//! ## Crate Features
//! #### Default
//!  - `filesystem`: Re-export [`tessera_filesystem`] as [`tessera::filesystem`](crate::filesystem).
//!
//! ## Licence
//! `tessera` is licensed under either of
//!  - the Apache License, Version 2.0 <http://www.apache.org/licenses/LICENSE-2.0> or
//!  - the MIT license <http://opensource.org/licenses/MIT>, at your option.
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::wildcard_enum_match_arm)]

mod activity;
pub mod array;
pub mod config;
pub mod consolidation;
pub mod context;
pub mod vacuum;

#[cfg(feature = "filesystem")]
pub use tessera_filesystem as filesystem;
pub use tessera_storage as storage;
