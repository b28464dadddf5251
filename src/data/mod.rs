/// Data layer: payload types, file readers, and filter building blocks.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌─────────────┐
///   │   loader    │  TableReader: file → EventTable / Meta
///   └─────────────┘
///        │
///        ▼
///   ┌─────────────┐
///   │   model     │  EventTable, MetadataValue, Meta
///   └─────────────┘
///        │
///        ▼
///   ┌─────────────┐
///   │   filter    │  criteria and value sets → selected sample IDs
///   └─────────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
