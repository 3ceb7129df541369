//! Core data model: messages, their parts, and addresses.

pub mod address;
pub mod message;
pub mod part;

pub use address::{AddressKind, MmsAddress};
pub use message::{Message, MessageClass, MessageData, MessageFlags, Priority};
pub use part::MessagePart;
