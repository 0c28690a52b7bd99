//! Region planning for logical dump imports.
//!
//! A dump directory is classified by the [`loader`], each table's data files are
//! cut into independently parseable [`region`]s, regions are grouped into import
//! engines, and the [`parser`] family turns region bytes into row tuples.

pub mod config;
pub mod error;
pub mod loader;
pub mod parser;
pub mod region;

pub use config::{Config, CsvConfig};
pub use error::{Error, Result};
pub use loader::{DataFile, DatabaseMeta, MyDumpLoader, SourceFormat, TableMeta};
pub use region::{
    allocate_engine_ids, make_table_regions, RegionOptions, RegionReader, TableRegion,
};
