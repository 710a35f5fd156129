use std::any::Any;

use thiserror::Error;

/// Binds a Rust type to the stable name under which it is persisted.
///
/// Renaming a struct in code must not change its `NAME`, or the encoder
/// will no longer recognize previously-stored events of that type.
/// Implemented manually, or derived with `#[derive(DomainEvent)]` behind
/// the `macros` feature.
pub trait Named {
    const NAME: &'static str;
}

/// Turns domain event values into the opaque `(type_name, data)` pair an
/// `EventLog` persists, and back again.
///
/// An `Encoder` is a registry: only types registered with it (see
/// `chronicle_serde::json::JsonEncoderBuilder::register`) can be encoded
/// or decoded. `encode` takes a type-erased payload because aggregates
/// hold their uncommitted events as `Box<dyn Any + Send>` — the registry,
/// keyed internally by `TypeId`, is what recovers which concrete
/// serializer applies.
pub trait Encoder: Send + Sync {
    /// Serializes `payload` and returns its registered type name
    /// alongside the encoded data. Fails if `payload`'s concrete type
    /// was never registered.
    fn encode(&self, payload: &dyn Any) -> Result<(String, String), EncodeError>;

    /// Deserializes `data` using the codec registered for `type_name`.
    fn decode(&self, type_name: &str, data: &str) -> Result<Box<dyn Any + Send>, DecodeError>;
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload type is not registered with this encoder")]
    EventNotRegistered,
    #[error("failed to encode event payload")]
    Serialize(#[source] crate::BoxDynError),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("event type `{0}` is not registered with this encoder")]
    EventNotRegistered(String),
    #[error("failed to decode event payload")]
    Deserialize(#[source] crate::BoxDynError),
}
