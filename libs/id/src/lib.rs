//! # domino-id
//!
//! Identity for nodes of a lifecycle supervision tree.
//!
//! ## Design Principles
//!
//! - A node name is a human-readable kind tag plus a disambiguating instance id
//! - Names are immutable once issued and unique within the generator that issued them
//! - There is no process-global counter: callers own a [`NameGenerator`] and pass it
//!   to whatever constructs nodes
//! - Names support roundtrip serialization (parse → format → parse)
//!
//! ## Name Format
//!
//! Names are formatted as `{kind}_{instance}`, for example:
//! - `Gateway_1`
//! - `HttpListener_3`
//! - `db.connection_12`
//!
//! The instance is always the part after the last underscore, so kinds may
//! themselves contain underscores.

mod error;
mod generator;
mod types;

pub use error::IdError;
pub use generator::NameGenerator;
pub use types::NodeName;
