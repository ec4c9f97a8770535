mod events;
mod patch;
mod types;

pub use events::{ChangeEvent, ChangeType, ALL_CHANNEL};
pub use patch::{apply_patch, validate_fields, PatchError};
pub use types::{Entity, EntityType, Fields};
