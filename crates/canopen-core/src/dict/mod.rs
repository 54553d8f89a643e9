//! The object dictionary: objects, sub-objects, their value codec, and the device that owns
//! them.

pub mod data_type;
pub mod device;
pub mod error;
pub mod object;
pub mod value;

pub use data_type::DataType;
pub use device::{Device, DummyMappingMask, UNASSIGNED_NODE_ID};
pub use error::DictionaryError;
pub use object::{Access, DownloadIndication, Object, ObjectCode, SubObject, UploadIndication};
pub use value::{CodecError, TimeStamp48, Value};
