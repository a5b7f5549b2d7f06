//! # debrief-index
//!
//! Finds the playable sessions inside an archive of recorded logs.
//!
//! ```text
//!   <root>/
//!   ├── logIndex.json                       persisted index
//!   ├── domainSession12_uId1/
//!   │   ├── domainSession12_uId1.log        log (one session or several)
//!   │   ├── domainSession12_uId1.log.logPatch
//!   │   └── camera1.vmeta.xml
//!   └── ...
//! ```
//!
//! # Key Types
//!
//! - [`IndexCache`]: incremental refresh of the index, favorites, lookup
//! - [`Segmenter`]: splits one log's message stream into [`LogMetadata`]
//! - [`LogReader`]: where messages come from (JSON lines by default)
//! - [`IndexConfig`]: archive layout and tunables
//!
//! [`LogMetadata`]: debrief_types::LogMetadata

pub mod cache;
pub mod config;
pub mod error;
pub mod index_file;
pub mod reader;
pub mod segmenter;

pub use cache::{IndexCache, NoProgress, ProgressReporter, ScanReport};
pub use config::IndexConfig;
pub use error::{IndexError, IndexResult};
pub use index_file::{IndexRecord, SessionIndex, read_index, write_index};
pub use reader::{JsonLinesLogReader, LogReader, MessageStream};
pub use segmenter::{Segmenter, extract_metadata, find_video_files};
