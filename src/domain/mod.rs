pub mod entities;
pub mod value_objects;

pub use entities::{Record, UserData};
pub use value_objects::{Collection, OwnerId, RecordId};
