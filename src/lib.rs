//! Lazily loaded measurement samples, grouped into flat collections,
//! grid-ordered collections and dense multi-well plates.
//!
//! Every container is generic over a [`SampleReader`], which knows how to turn
//! a backing file into a payload and a metadata side table. Payloads are read
//! on demand; [`apply`] operations decide whether a freshly read payload is
//! kept.
//!
//! ```text
//!   files ──IdParser──▶ SampleCollection ──PositionParser──▶ OrderedCollection
//!     │
//!     └──IdParser + Grid──▶ Plate ──apply──▶ extracted GridTables
//! ```

pub mod apply;
pub mod collection;
pub mod config;
pub mod data;
pub mod error;
pub mod grid;
pub mod ordered;
pub mod parsers;
pub mod persist;
pub mod plate;
pub mod sample;

pub use apply::{ApplyOptions, ApplyOutput, ApplyTo, OutputFormat, Outputs, Target};
pub use collection::SampleCollection;
pub use config::{PlateConfig, SourceQuery};
pub use data::filter::{Criteria, FilterState, FilterSubject, FilterTarget, SampleAttr};
pub use data::loader::{write_parquet, TableReader};
pub use data::model::{EventTable, Meta, MetadataValue, Shaped};
pub use error::{Error, Result};
pub use grid::{Grid, GridTable, Position};
pub use ordered::OrderedCollection;
pub use parsers::{assign_ids, IdParser, PositionParser};
pub use plate::{Assignments, Plate};
pub use sample::{Assign, Sample, SampleId, SampleReader};
