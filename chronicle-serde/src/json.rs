use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use chronicle::{DecodeError, EncodeError, Encoder, Named};
use serde::de::DeserializeOwned;
use serde::Serialize;

type EncodeFn = Arc<dyn Fn(&dyn Any) -> Result<String, EncodeError> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&str) -> Result<Box<dyn Any + Send>, DecodeError> + Send + Sync>;

/// Builds a `JsonEncoder` one registered event type at a time.
///
/// Only types passed to `register` can round-trip through the resulting
/// encoder; anything else fails `EventNotRegistered` on encode or decode.
#[derive(Default)]
pub struct JsonEncoderBuilder {
    by_type_id: HashMap<TypeId, (String, EncodeFn)>,
    by_name: HashMap<String, DecodeFn>,
}

impl JsonEncoderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under its `Named::NAME`, wiring up both the
    /// `TypeId`-keyed encode path and the name-keyed decode path.
    pub fn register<T>(mut self) -> Self
    where
        T: Named + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let encode: EncodeFn = Arc::new(|payload: &dyn Any| {
            let value = payload
                .downcast_ref::<T>()
                .expect("encoder registry keyed by TypeId always matches its payload type");
            serde_json::to_string(value).map_err(|err| EncodeError::Serialize(Box::new(err)))
        });
        let decode: DecodeFn = Arc::new(|data: &str| {
            serde_json::from_str::<T>(data)
                .map(|value| Box::new(value) as Box<dyn Any + Send>)
                .map_err(|err| DecodeError::Deserialize(Box::new(err)))
        });

        self.by_type_id
            .insert(TypeId::of::<T>(), (T::NAME.to_string(), encode));
        self.by_name.insert(T::NAME.to_string(), decode);
        self
    }

    pub fn build(self) -> JsonEncoder {
        JsonEncoder {
            by_type_id: Arc::new(self.by_type_id),
            by_name: Arc::new(self.by_name),
        }
    }
}

/// A registry-backed `Encoder` that serializes payloads to JSON.
///
/// Cheap to clone: the registries built by `JsonEncoderBuilder` are
/// shared behind an `Arc` and never mutated after `build`.
#[derive(Clone)]
pub struct JsonEncoder {
    by_type_id: Arc<HashMap<TypeId, (String, EncodeFn)>>,
    by_name: Arc<HashMap<String, DecodeFn>>,
}

impl Encoder for JsonEncoder {
    fn encode(&self, payload: &dyn Any) -> Result<(String, String), EncodeError> {
        let (name, encode) = self
            .by_type_id
            .get(&payload.type_id())
            .ok_or(EncodeError::EventNotRegistered)?;
        let data = encode(payload)?;
        Ok((name.clone(), data))
    }

    fn decode(&self, type_name: &str, data: &str) -> Result<Box<dyn Any + Send>, DecodeError> {
        let decode = self
            .by_name
            .get(type_name)
            .ok_or_else(|| DecodeError::EventNotRegistered(type_name.to_string()))?;
        decode(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct AccountOpened {
        balance: i64,
    }
    impl Named for AccountOpened {
        const NAME: &'static str = "AccountOpened";
    }

    #[test]
    fn round_trips_a_registered_type() {
        let encoder = JsonEncoderBuilder::new().register::<AccountOpened>().build();
        let value = AccountOpened { balance: 100 };

        let (type_name, data) = encoder.encode(&value).unwrap();
        assert_eq!(type_name, "AccountOpened");

        let decoded = encoder.decode(&type_name, &data).unwrap();
        assert_eq!(*decoded.downcast::<AccountOpened>().unwrap(), value);
    }

    #[test]
    fn encoding_an_unregistered_type_fails() {
        struct NotRegistered;
        let encoder = JsonEncoderBuilder::new().build();
        let err = encoder.encode(&NotRegistered).unwrap_err();
        assert!(matches!(err, EncodeError::EventNotRegistered));
    }

    #[test]
    fn decoding_an_unregistered_name_fails() {
        let encoder = JsonEncoderBuilder::new().build();
        let err = encoder.decode("Missing", "{}").unwrap_err();
        assert!(matches!(err, DecodeError::EventNotRegistered(name) if name == "Missing"));
    }
}
