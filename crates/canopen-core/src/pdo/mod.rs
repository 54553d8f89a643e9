//! Process Data Object mapping and execution (CiA-301 §7.3).

mod engine;
mod mapping;

pub use engine::{PdoEngine, PdoLengthMismatch, RpdoId, TpdoConfig, TpdoId, PDO_LENGTH_ERROR_CODE};
pub use mapping::{validate_mapping, ConfigError, PdoMapEntry, TransmissionType};
