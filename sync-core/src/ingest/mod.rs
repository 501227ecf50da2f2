//! Admission of newly observed messages

pub mod id_matcher;
pub mod pipeline;

pub use id_matcher::{id_matcher, normalize_participant, split_participants};
pub use pipeline::{
    Admission, ContactsLookup, ConversationIdentity, IncomingMessage, IngestionPipeline,
    StoreContactsLookup,
};
