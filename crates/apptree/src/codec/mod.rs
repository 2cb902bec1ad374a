//! Conversion between an application document and its directory tree.
//!
//! [`schema`] declares what each section looks like on disk per structural
//! version; [`reader`] and [`writer`] walk those declarations; [`Codec`]
//! drives them across all sections.

pub mod document;
pub mod orchestrator;
pub mod reader;
pub mod schema;
pub mod structures;
pub mod version;
pub mod writer;

pub use document::AppDocument;
pub use orchestrator::{Codec, DecodeReport, EncodeReport, SectionFailure};
pub use reader::read_section;
pub use schema::{describe, sections, Cardinality, SectionDescriptor};
pub use structures::{
    AuthStructure, DataSourceStructure, FunctionsStructure, HttpEndpointStructure, Structure,
    SyncStructure,
};
pub use version::{resolve, StructuralVersion};
pub use writer::write_section;
