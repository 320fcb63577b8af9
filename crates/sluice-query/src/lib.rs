//! # sluice-query
//!
//! Core abstractions for querying heterogeneous data sources through one
//! result-stream interface.
//!
//! Backends reply in different shapes:
//! - SQL engines return flat row sets
//! - document stores return cursors made of named batches of documents
//! - command-style sources return a single composite reply
//!
//! Every driver turns its reply into a [`ResultStream`]: a pull-based,
//! resource-safe sequence of rows with a fixed [`Header`] and [`Meta`].
//!
//! ## Architecture
//!
//! - **Envelope**: wraps a source-defined value so it can be displayed,
//!   JSON-encoded and binary round-tripped ([`Envelope`], [`TypeRegistry`])
//! - **Sequences**: adapters from producer shapes to the pull protocol
//!   ([`next_single`], [`next_yield`], [`next_many`])
//! - **ResultStream**: the consumer-facing stream, built with [`ResultStreamBuilder`]
//! - **Adapter / Driver**: connection factory and live session; optional
//!   capabilities such as [`DatabaseSwitcher`] are discovered at runtime, never assumed
//! - **AdapterRegistry**: append-only table of adapters keyed by identifier
//!
//! ## Example
//!
//! ```rust
//! use sluice_query::{next_yield, Envelope, Meta, ResultStreamBuilder, Value};
//!
//! let batches = vec![vec![1, 2], vec![3]];
//! let mut stream = ResultStreamBuilder::new()
//!     .with_sequence(next_yield(move |emitter| {
//!         for batch in batches {
//!             for doc in batch {
//!                 emitter.emit(vec![Value::from(Envelope::new(doc))]);
//!             }
//!         }
//!         Ok(())
//!     }))
//!     .with_header(vec!["Reply".to_string()])
//!     .with_meta(Meta::schema_less())
//!     .build();
//!
//! let rows: Vec<_> = stream.rows().collect::<sluice_query::Result<_>>().unwrap();
//! assert_eq!(rows.len(), 3);
//! ```
//!
//! ## Backend Implementation
//!
//! To implement a new backend:
//!
//! 1. Create a struct that implements [`Driver`]
//! 2. Implement optional traits based on backend capabilities
//! 3. Create an [`Adapter`] implementation
//! 4. Register the adapter with an [`AdapterRegistry`], and any novel
//!    value types with the [`TypeRegistry`]
//!
//! Backend crates:
//! - `sluice-query-mongodb` - MongoDB implementation
//! - `sluice-query-sqlite` - SQLite implementation

pub mod builder;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod sequence;
pub mod stream;
pub mod traits;
pub mod types;

// Re-export commonly used items
pub use builder::ResultStreamBuilder;
pub use config::{load_connections, parse_connections, ConnectionParams};
pub use context::QueryContext;
pub use envelope::{Envelope, Reply, TypeRegistry};
pub use error::{DataError, Result};
pub use registry::AdapterRegistry;
pub use sequence::{next_many, next_single, next_yield, Emitter, Empty, Sequence, Single, Yielded};
pub use stream::{ResultStream, Rows};
pub use traits::{Adapter, DatabaseSwitcher, Driver};
pub use types::{Capability, Header, Meta, Row, SchemaType, Structure, StructureType, Value};

// Re-export external dependencies
pub use async_trait;
pub use tokio_util::sync::CancellationToken;
