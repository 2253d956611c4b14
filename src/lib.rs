//! Holder-side presentation session management for mobile identity
//! credentials.
//!
//! One [PresentationSession](presentation::PresentationSession) covers a
//! single reader interaction. It owns the session's ephemeral key pair, the
//! write-once reader-key and transcript bindings, lazily cached
//! per-credential retrievers with at-most-once authentication-key
//! consumption, and a single-use, ceremony-gated proof of presence.
//!
//! Cryptographic key storage and credential persistence are collaborators
//! behind the [secure::SecureArea] and [storage::CredentialStore] traits;
//! software implementations of both are included. Wire encodings of
//! requests, responses and the session transcript are owned by the
//! surrounding protocol layer and passed through opaquely.

pub mod cbor;
pub mod definitions;
pub mod presentation;
pub mod secure;
pub mod storage;
