//! `Encoder` implementations for the `chronicle` event store.
//!
//! JSON is the only format shipped today (behind the default `json`
//! feature), mirroring the encoder the core crate is tested against.
#[cfg(feature = "json")]
pub mod json;
