//! Typed session attribute values.
//!
//! Attributes are stored type-erased as `Box<dyn AttributeValue>` and
//! serialized as `{"type": <TYPE_NAME>, "value": <json>}`. Reading them back
//! goes through a [`TypeRegistry`], which maps each type name to a decoder.

use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CodecError;

/// A type that can be stored as a session attribute.
///
/// `TYPE_NAME` is written next to every serialized value and must stay
/// stable across deployments, since other nodes use it to pick a decoder.
pub trait SessionValue:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    const TYPE_NAME: &'static str;

    /// Reject values JSON cannot carry back unchanged.
    fn check_encodable(&self) -> Result<(), String> {
        Ok(())
    }
}

impl SessionValue for String {
    const TYPE_NAME: &'static str = "string";
}

impl SessionValue for i64 {
    const TYPE_NAME: &'static str = "i64";
}

impl SessionValue for u64 {
    const TYPE_NAME: &'static str = "u64";
}

impl SessionValue for bool {
    const TYPE_NAME: &'static str = "bool";
}

impl SessionValue for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn check_encodable(&self) -> Result<(), String> {
        if self.is_finite() {
            Ok(())
        } else {
            Err(format!("{self} has no JSON representation"))
        }
    }
}

impl SessionValue for Vec<String> {
    const TYPE_NAME: &'static str = "string_list";
}

impl SessionValue for serde_json::Value {
    const TYPE_NAME: &'static str = "json";
}

/// Object-safe view of a [`SessionValue`].
pub trait AttributeValue: Debug + Send + Sync {
    fn type_name(&self) -> &'static str;
    fn check_encodable(&self) -> Result<(), String>;
    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn AttributeValue>;
    /// Same concrete type and equal value.
    fn dyn_eq(&self, other: &dyn AttributeValue) -> bool;
}

impl<T: SessionValue> AttributeValue for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn check_encodable(&self) -> Result<(), String> {
        SessionValue::check_encodable(self)
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_box(&self) -> Box<dyn AttributeValue> {
        Box::new(self.clone())
    }

    fn dyn_eq(&self, other: &dyn AttributeValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }
}

impl Clone for Box<dyn AttributeValue> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

type Decoder = fn(serde_json::Value) -> Result<Box<dyn AttributeValue>, serde_json::Error>;

fn decode_as<V: SessionValue>(
    value: serde_json::Value,
) -> Result<Box<dyn AttributeValue>, serde_json::Error> {
    Ok(Box::new(serde_json::from_value::<V>(value)?))
}

/// Maps attribute type names to decoders.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in value types.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register::<String>()
            .register::<i64>()
            .register::<u64>()
            .register::<bool>()
            .register::<f64>()
            .register::<Vec<String>>()
            .register::<serde_json::Value>();
        registry
    }

    /// Register `V` under its `TYPE_NAME`, replacing any earlier decoder.
    pub fn register<V: SessionValue>(&mut self) -> &mut Self {
        if self.decoders.insert(V::TYPE_NAME, decode_as::<V>).is_some() {
            tracing::debug!(type_name = V::TYPE_NAME, "Replaced attribute decoder");
        }
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.decoders.contains_key(type_name)
    }

    /// Decode one attribute value.
    pub fn decode(
        &self,
        name: &str,
        type_name: &str,
        value: serde_json::Value,
    ) -> Result<Box<dyn AttributeValue>, CodecError> {
        let decoder = self
            .decoders
            .get(type_name)
            .ok_or_else(|| CodecError::UnknownAttributeType {
                name: name.to_string(),
                type_name: type_name.to_string(),
            })?;
        decoder(value).map_err(|e| {
            CodecError::CorruptPayload(format!("attribute '{name}' is not a valid {type_name}: {e}"))
        })
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.decoders.keys().collect();
        names.sort();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
        total_cents: u64,
    }

    impl SessionValue for Cart {
        const TYPE_NAME: &'static str = "shop.cart";
    }

    #[test]
    fn test_dyn_eq_checks_type_and_value() {
        let a: Box<dyn AttributeValue> = Box::new(5i64);
        let b: Box<dyn AttributeValue> = Box::new(5i64);
        let c: Box<dyn AttributeValue> = Box::new(5u64);
        let d: Box<dyn AttributeValue> = Box::new(6i64);
        assert!(a.dyn_eq(b.as_ref()));
        assert!(!a.dyn_eq(c.as_ref()));
        assert!(!a.dyn_eq(d.as_ref()));
    }

    #[test]
    fn test_defaults_decode() {
        let registry = TypeRegistry::with_defaults();
        let value = registry
            .decode("name", "string", serde_json::json!("alice"))
            .unwrap();
        assert_eq!(
            value.as_any().downcast_ref::<String>().map(String::as_str),
            Some("alice")
        );
        assert!(registry.contains("string_list"));
        assert!(!registry.contains("shop.cart"));
    }

    #[test]
    fn test_unknown_type() {
        let registry = TypeRegistry::with_defaults();
        let err = registry
            .decode("cart", "shop.cart", serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, CodecError::UnknownAttributeType { ref type_name, .. } if type_name == "shop.cart"));
    }

    #[test]
    fn test_custom_type_roundtrip() {
        let mut registry = TypeRegistry::with_defaults();
        registry.register::<Cart>();

        let cart = Cart {
            items: vec!["sku-1".to_string()],
            total_cents: 1299,
        };
        let json = cart.to_json().unwrap();
        let back = registry.decode("cart", Cart::TYPE_NAME, json).unwrap();
        assert_eq!(back.as_any().downcast_ref::<Cart>(), Some(&cart));
    }

    #[test]
    fn test_mismatched_value_is_corrupt() {
        let registry = TypeRegistry::with_defaults();
        let err = registry
            .decode("count", "i64", serde_json::json!("not a number"))
            .unwrap_err();
        assert!(matches!(err, CodecError::CorruptPayload(_)));
    }
}
