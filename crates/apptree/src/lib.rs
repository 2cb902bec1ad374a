pub mod cancel;
pub mod codec;
pub mod error;
pub mod logging;
pub mod options;
pub mod sanitize;
pub mod storage;
pub mod value;

pub use cancel::CancelFlag;
pub use codec::{
    AppDocument, Codec, DecodeReport, EncodeReport, SectionDescriptor, SectionFailure,
    StructuralVersion,
};
pub use error::{CodecError, Result};
pub use options::CodecOptions;
pub use storage::{DiskStorage, MemoryStorage, Storage};
pub use value::{ConfigMap, ConfigValue};
