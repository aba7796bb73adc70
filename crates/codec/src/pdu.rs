use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::address::Address;

/// Opaque application context carried through the stack untouched.
pub type UserData = Arc<dyn Any + Send + Sync>;

/// The envelope passed between layers: a payload plus its addressing.
///
/// Layers never rewrite a PDU in place; one that needs different
/// addressing builds a new envelope around the same payload. `Bytes`
/// clones are reference counted, so the data itself is never copied.
#[derive(Clone, Default)]
pub struct Pdu {
    pub data: Bytes,
    pub source: Option<Address>,
    pub destination: Option<Address>,
    pub user_data: Option<UserData>,
}

impl Pdu {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            source: None,
            destination: None,
            user_data: None,
        }
    }

    pub fn with_source(mut self, source: Address) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_destination(mut self, destination: Address) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn with_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    /// A copy of this envelope around a different payload.
    pub fn reframe(&self, data: Bytes) -> Self {
        Self {
            data,
            source: self.source,
            destination: self.destination,
            user_data: self.user_data.clone(),
        }
    }
}

impl fmt::Debug for Pdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pdu")
            .field("len", &self.data.len())
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}
