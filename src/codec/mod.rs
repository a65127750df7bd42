//! Binary bundle codec
//!
//! - `stream`: little-endian and compact integer streams
//! - `section`: section tags, magic words and enum options
//! - `header`: header and compile options (`HeaderExtInfo`)
//! - `value`: typed values
//! - `css`: CSS route and fragments
//! - `decoder`: detached decoder for lazy sections
//! - `reader`: the bundle decoder
//! - `writer`: the bundle encoder

pub mod css;
pub mod decoder;
pub mod header;
pub mod reader;
pub mod section;
pub mod stream;
pub mod value;
pub mod writer;

pub use decoder::SectionDecoder;
pub use header::{CompileOptions, TemplateHeader};
pub use reader::{ReaderOptions, TemplateBinaryReader, TemplateBundleRecycler};
pub use section::{ArchOption, BinarySection, FeOption};
pub use stream::{InputStream, OutputStream};
pub use writer::TemplateBinaryWriter;
