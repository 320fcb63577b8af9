//! Dynamic value envelope
//!
//! Drivers hand back values whose concrete type only they know (a BSON
//! document, a command reply, ...). An [`Envelope`] carries one such value
//! through the stream layer and gives it three uniform capabilities:
//!
//! - `Display`: indented JSON, falling back to the `Debug` form
//! - `Serialize`: exactly the wrapped value's own serialization
//! - binary round-trip: a self-describing BSON frame `{ type, value }` that
//!   decodes back into the original concrete type via a [`TypeRegistry`]
//!
//! Every component that produces a novel concrete type registers it once at
//! startup, before any value of that type is encoded or decoded.

use crate::error::{DataError, Result};
use bson::{Bson, Document};
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

const TYPE_FIELD: &str = "type";
const VALUE_FIELD: &str = "value";

/// Capability set of a value that can travel inside an [`Envelope`]
///
/// Implemented for every `Serialize + Debug` type; there is nothing to
/// implement by hand.
pub trait Reply: Any + fmt::Debug + Send + Sync {
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;

    fn to_bson(&self) -> std::result::Result<Bson, bson::ser::Error>;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Reply for T
where
    T: Serialize + fmt::Debug + Send + Sync + 'static,
{
    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn to_bson(&self) -> std::result::Result<Bson, bson::ser::Error> {
        bson::to_bson(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Immutable wrapper around one opaque, source-defined value
#[derive(Clone)]
pub struct Envelope {
    value: Arc<dyn Reply>,
    type_id: TypeId,
    type_name: &'static str,
}

impl Envelope {
    pub fn new<T: Reply>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    fn reply(&self) -> &dyn Reply {
        &*self.value
    }

    /// Rust type name of the wrapped value
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Reply>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the wrapped value as its concrete type
    pub fn downcast_ref<T: Reply>(&self) -> Option<&T> {
        self.reply().as_any().downcast_ref::<T>()
    }

    /// JSON form of the wrapped value
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.reply()
            .to_json()
            .map_err(|e| DataError::SerializationError(e.to_string()))
    }

    /// Encode into a binary frame using the process-wide type registry
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_with(TypeRegistry::global())
    }

    /// Decode a binary frame using the process-wide type registry
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_with(TypeRegistry::global(), bytes)
    }

    pub fn encode_with(&self, registry: &TypeRegistry) -> Result<Vec<u8>> {
        let (tag, codec) = registry
            .codec_of(self.type_id)
            .ok_or_else(|| DataError::UnknownType(self.type_name.to_string()))?;

        let value = (codec.encode)(self)?;

        let mut frame = Document::new();
        frame.insert(TYPE_FIELD, tag);
        frame.insert(VALUE_FIELD, value);
        let mut buf = Vec::new();
        frame
            .to_writer(&mut buf)
            .map_err(|e| DataError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    pub fn decode_with(registry: &TypeRegistry, bytes: &[u8]) -> Result<Self> {
        let mut reader = bytes;
        let mut frame = Document::from_reader(&mut reader)
            .map_err(|e| DataError::SerializationError(format!("invalid envelope frame: {}", e)))?;

        let tag = frame
            .get_str(TYPE_FIELD)
            .map_err(|e| DataError::SerializationError(format!("envelope frame has no type tag: {}", e)))?
            .to_string();

        let codec = registry
            .codec_for(&tag)
            .ok_or_else(|| DataError::UnknownType(tag.clone()))?;

        let value = frame.remove(VALUE_FIELD).unwrap_or(Bson::Null);
        (codec.decode)(value)
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pretty = self
            .reply()
            .to_json()
            .and_then(|json| serde_json::to_string_pretty(&json));

        match pretty {
            Ok(rendered) => f.write_str(&rendered),
            Err(_) => write!(f, "{:?}", self.value),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("type", &self.type_name)
            .field("value", &self.value)
            .finish()
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let json = self.reply().to_json().map_err(serde::ser::Error::custom)?;
        json.serialize(serializer)
    }
}

/// How one registered type is written into and read back from a frame
#[derive(Clone, Copy)]
struct Codec {
    encode: fn(&Envelope) -> Result<Bson>,
    decode: fn(Bson) -> Result<Envelope>,
}

impl Codec {
    fn serde_bson<T: Reply + DeserializeOwned>() -> Self {
        Self {
            encode: encode_as,
            decode: decode_as::<T>,
        }
    }

    /// JSON travels as its text: BSON cannot hold integers above `i64::MAX`
    fn json_text() -> Self {
        Self {
            encode: encode_json_text,
            decode: decode_json_text,
        }
    }
}

fn encode_as(envelope: &Envelope) -> Result<Bson> {
    envelope.reply().to_bson().map_err(|e| {
        DataError::SerializationError(format!("cannot encode {}: {}", envelope.type_name, e))
    })
}

fn encode_json_text(envelope: &Envelope) -> Result<Bson> {
    let json = envelope
        .downcast_ref::<serde_json::Value>()
        .ok_or_else(|| DataError::UnknownType(envelope.type_name.to_string()))?;
    serde_json::to_string(json)
        .map(Bson::String)
        .map_err(|e| DataError::SerializationError(format!("cannot encode json: {}", e)))
}

fn decode_json_text(value: Bson) -> Result<Envelope> {
    let text = match value {
        Bson::String(text) => text,
        other => {
            return Err(DataError::SerializationError(format!(
                "json envelope holds {:?}, not text",
                other.element_type()
            )))
        }
    };
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| DataError::SerializationError(format!("cannot decode json: {}", e)))?;
    Ok(Envelope::new(json))
}

fn decode_as<T>(value: Bson) -> Result<Envelope>
where
    T: Reply + DeserializeOwned,
{
    let decoded: T = bson::from_bson(value).map_err(|e| {
        DataError::SerializationError(format!(
            "cannot decode {}: {}",
            std::any::type_name::<T>(),
            e
        ))
    })?;
    Ok(Envelope::new(decoded))
}

#[derive(Default)]
struct Registrations {
    codecs: HashMap<&'static str, (TypeId, Codec)>,
    tags: HashMap<TypeId, &'static str>,
}

/// Registry of concrete types that envelopes can be decoded into
///
/// Meant to be filled at startup and only read afterwards.
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<Registrations>,
}

static GLOBAL_TYPES: Lazy<TypeRegistry> = Lazy::new(TypeRegistry::with_builtin_types);

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the scalar and JSON types the core itself produces
    pub fn with_builtin_types() -> Self {
        let registry = Self::new();
        let builtins = [
            registry.register_codec::<serde_json::Value>("json", Codec::json_text()),
            registry.register::<String>("string"),
            registry.register::<i64>("int64"),
            registry.register::<f64>("float64"),
            registry.register::<bool>("bool"),
        ];
        for result in builtins {
            if let Err(e) = result {
                warn!("Failed to register builtin envelope type: {}", e);
            }
        }
        registry
    }

    /// The process-wide registry used by [`Envelope::encode`] and [`Envelope::decode`]
    pub fn global() -> &'static TypeRegistry {
        &GLOBAL_TYPES
    }

    /// Bind `tag` to the concrete type `T`
    ///
    /// Registering the same pair again is a no-op. A tag bound to another
    /// type, or a type bound to another tag, is rejected.
    pub fn register<T>(&self, tag: &'static str) -> Result<()>
    where
        T: Reply + DeserializeOwned,
    {
        self.register_codec::<T>(tag, Codec::serde_bson::<T>())
    }

    fn register_codec<T: Reply>(&self, tag: &'static str, codec: Codec) -> Result<()> {
        let type_id = TypeId::of::<T>();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        if let Some((existing, _)) = inner.codecs.get(tag) {
            if *existing == type_id {
                return Ok(());
            }
            return Err(DataError::DuplicateType(format!(
                "tag '{}' is already bound to another type (registering {})",
                tag,
                std::any::type_name::<T>()
            )));
        }

        if let Some(existing_tag) = inner.tags.get(&type_id) {
            return Err(DataError::DuplicateType(format!(
                "{} is already registered as '{}'",
                std::any::type_name::<T>(),
                existing_tag
            )));
        }

        inner.codecs.insert(tag, (type_id, codec));
        inner.tags.insert(type_id, tag);
        debug!("Registered envelope type {} as '{}'", std::any::type_name::<T>(), tag);
        Ok(())
    }

    pub fn is_registered<T: Reply>(&self) -> bool {
        self.codec_of(TypeId::of::<T>()).is_some()
    }

    /// All registered tags, sorted
    pub fn tags(&self) -> Vec<&'static str> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut tags: Vec<_> = inner.codecs.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    fn codec_of(&self, type_id: TypeId) -> Option<(&'static str, Codec)> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let tag = inner.tags.get(&type_id).copied()?;
        inner.codecs.get(tag).map(|(_, codec)| (tag, *codec))
    }

    fn codec_for(&self, tag: &str) -> Option<Codec> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.codecs.get(tag).map(|(_, codec)| *codec)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry").field("tags", &self.tags()).finish()
    }
}
