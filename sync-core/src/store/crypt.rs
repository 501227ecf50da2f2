//! Field-selective encryption for records crossing the network
//!
//! Only the fields that leak message content or identity are transformed.
//! Decryption is fail-soft: a field that does not decrypt (legacy plaintext,
//! wrong key, corruption) keeps its stored value and a warning is logged.

use tracing::warn;

use crate::encryption::{AccountEncryption, EncryptionError};
use crate::types::{
    BlacklistEntry, Contact, Conversation, Draft, Message, Record, ScheduledMessage,
};

pub trait Encryptable {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError>;

    fn decrypt(&mut self, encryption: &AccountEncryption);
}

fn seal(field: &mut String, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
    if !field.is_empty() {
        *field = encryption.encrypt(field)?;
    }
    Ok(())
}

fn seal_opt(field: &mut Option<String>, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
    match field {
        Some(value) => seal(value, encryption),
        None => Ok(()),
    }
}

fn open(field: &mut String, encryption: &AccountEncryption, name: &'static str) {
    if field.is_empty() {
        return;
    }
    match encryption.decrypt(field) {
        Ok(plain) => *field = plain,
        Err(e) => warn!(field = name, "Keeping stored value: {}", e),
    }
}

fn open_opt(field: &mut Option<String>, encryption: &AccountEncryption, name: &'static str) {
    if let Some(value) = field {
        open(value, encryption, name);
    }
}

impl Encryptable for Conversation {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        seal(&mut self.title, encryption)?;
        seal(&mut self.phone_numbers, encryption)?;
        seal(&mut self.id_matcher, encryption)?;
        seal_opt(&mut self.snippet, encryption)?;
        seal_opt(&mut self.ringtone_uri, encryption)?;
        seal_opt(&mut self.image_uri, encryption)
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        open(&mut self.title, encryption, "title");
        open(&mut self.phone_numbers, encryption, "phone_numbers");
        open(&mut self.id_matcher, encryption, "id_matcher");
        open_opt(&mut self.snippet, encryption, "snippet");
        open_opt(&mut self.ringtone_uri, encryption, "ringtone_uri");
        open_opt(&mut self.image_uri, encryption, "image_uri");
    }
}

impl Encryptable for Message {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        seal(&mut self.data, encryption)?;
        seal(&mut self.mime_type, encryption)?;
        seal_opt(&mut self.from, encryption)?;
        seal_opt(&mut self.sim_phone_number, encryption)
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        open(&mut self.data, encryption, "data");
        open(&mut self.mime_type, encryption, "mime_type");
        open_opt(&mut self.from, encryption, "from");
        open_opt(&mut self.sim_phone_number, encryption, "sim_phone_number");
    }
}

impl Encryptable for Draft {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        seal(&mut self.data, encryption)?;
        seal(&mut self.mime_type, encryption)
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        open(&mut self.data, encryption, "data");
        open(&mut self.mime_type, encryption, "mime_type");
    }
}

impl Encryptable for ScheduledMessage {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        seal(&mut self.to, encryption)?;
        seal(&mut self.data, encryption)?;
        seal(&mut self.mime_type, encryption)?;
        seal(&mut self.title, encryption)
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        open(&mut self.to, encryption, "to");
        open(&mut self.data, encryption, "data");
        open(&mut self.mime_type, encryption, "mime_type");
        open(&mut self.title, encryption, "title");
    }
}

impl Encryptable for BlacklistEntry {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        seal_opt(&mut self.phone_number, encryption)?;
        seal_opt(&mut self.phrase, encryption)
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        open_opt(&mut self.phone_number, encryption, "phone_number");
        open_opt(&mut self.phrase, encryption, "phrase");
    }
}

impl Encryptable for Contact {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        seal(&mut self.phone_number, encryption)?;
        seal(&mut self.id_matcher, encryption)?;
        seal(&mut self.name, encryption)
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        open(&mut self.phone_number, encryption, "phone_number");
        open(&mut self.id_matcher, encryption, "id_matcher");
        open(&mut self.name, encryption, "name");
    }
}

impl Encryptable for Record {
    fn encrypt(&mut self, encryption: &AccountEncryption) -> Result<(), EncryptionError> {
        match self {
            Record::Conversation(r) => r.encrypt(encryption),
            Record::Message(r) => r.encrypt(encryption),
            Record::Draft(r) => r.encrypt(encryption),
            Record::ScheduledMessage(r) => r.encrypt(encryption),
            Record::Blacklist(r) => r.encrypt(encryption),
            Record::Contact(r) => r.encrypt(encryption),
        }
    }

    fn decrypt(&mut self, encryption: &AccountEncryption) {
        match self {
            Record::Conversation(r) => r.decrypt(encryption),
            Record::Message(r) => r.decrypt(encryption),
            Record::Draft(r) => r.decrypt(encryption),
            Record::ScheduledMessage(r) => r.decrypt(encryption),
            Record::Blacklist(r) => r.decrypt(encryption),
            Record::Contact(r) => r.decrypt(encryption),
        }
    }
}
