pub mod helpers;
pub mod request;
pub mod response;

pub use helpers::ByteStr;
pub use request::{
    CipherSuite, CredentialDataRequest, CredentialName, EntryIdentifier, EntryNamespaces,
    Namespace,
};
pub use response::{CredentialDataResult, EntryError, RetrievedEntries};
