use crate::types::{SERVICES_NAME, SERVICES_PATH};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Property carrying the service version in every service description
const SERVICE_VERSION_PROPERTY: &str = "serviceVersion";

/// One entry of the service list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Display name reported by the server
    pub name: String,
    /// Path prefix for every method of the service, e.g. `/services/power/`
    pub path: String,
}

/// Services keyed by id (e.g. `"power"`)
pub type ServiceList = BTreeMap<String, ServiceDescriptor>;

/// The list every connection starts from: only the discovery service
pub fn default_service_list() -> ServiceList {
    let mut list = ServiceList::new();
    list.insert(
        SERVICES_NAME.to_string(),
        ServiceDescriptor {
            name: SERVICES_NAME.to_string(),
            path: SERVICES_PATH.to_string(),
        },
    );
    list
}

/// Parses the `serviceList` property value `{id: {path, name}}`.
///
/// Entries without a path are skipped; a missing name falls back to the id.
pub fn parse_service_list(value: &Value) -> ServiceList {
    let Some(entries) = value.as_object() else {
        tracing::warn!("Service list is not an object: {}", value);
        return ServiceList::new();
    };

    entries
        .iter()
        .filter_map(|(id, entry)| {
            let Some(path) = entry.get("path").and_then(Value::as_str) else {
                tracing::warn!("Service '{}' has no path, ignoring", id);
                return None;
            };
            let name = entry.get("name").and_then(Value::as_str).unwrap_or(id);
            Some((
                id.clone(),
                ServiceDescriptor {
                    name: name.to_string(),
                    path: path.to_string(),
                },
            ))
        })
        .collect()
}

/// A serialiser the server can answer with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnFormat {
    pub name: String,
    /// MIME type accepted for this format
    #[serde(rename = "type")]
    pub content_type: String,
}

/// A WebSocket sub-protocol the server supports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProtocolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

pub fn parse_return_formats(value: &Value) -> Vec<ReturnFormat> {
    parse_list(value, "return format")
}

pub fn parse_websocket_protocols(value: &Value) -> Vec<SubProtocolInfo> {
    parse_list(value, "WebSocket protocol")
}

fn parse_list<T: for<'de> Deserialize<'de>>(value: &Value, what: &str) -> Vec<T> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match T::deserialize(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", what, e);
                None
            }
        })
        .collect()
}

/// Signature of a remotely callable method
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MethodSignature {
    /// Parameter names in call order
    #[serde(default)]
    pub params: Vec<String>,
    /// Return type as a JavaScript type name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<String>,
}

/// Server-advertised description of one property
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Name of the change notification, if the property is observable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<String>,
    /// Getter method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    /// Setter method, only for writable properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<String>,
    /// Latest known value
    #[serde(default)]
    pub value: Value,
}

impl PropertyDescriptor {
    /// Notification method suffix; falls back to the property name
    pub fn notification_or<'a>(&'a self, name: &'a str) -> &'a str {
        self.notification.as_deref().unwrap_or(name)
    }

    pub fn is_writable(&self) -> bool {
        self.write.is_some()
    }
}

/// Typed form of a service description (`Subscribe` acknowledgement or
/// `GetServiceDescription` result)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceSchema {
    /// Present in every valid acknowledgement
    pub version: Option<String>,
    pub methods: BTreeMap<String, MethodSignature>,
    pub properties: BTreeMap<String, PropertyDescriptor>,
}

impl ServiceSchema {
    /// Parses a description leniently: malformed entries are skipped.
    ///
    /// The version is taken from a top-level `version`, falling back to the
    /// implicit `serviceVersion` property.
    pub fn from_value(value: &Value) -> Self {
        let properties = parse_properties(value.get("properties"));
        let methods = parse_methods(value.get("methods"));

        let version = value
            .get("version")
            .and_then(version_string)
            .or_else(|| {
                properties
                    .get(SERVICE_VERSION_PROPERTY)
                    .and_then(|property| version_string(&property.value))
            });

        Self {
            version,
            methods,
            properties,
        }
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }
}

fn version_string(value: &Value) -> Option<String> {
    match value {
        Value::String(version) => Some(version.clone()),
        Value::Number(version) => Some(version.to_string()),
        _ => None,
    }
}

fn parse_methods(value: Option<&Value>) -> BTreeMap<String, MethodSignature> {
    match value {
        Some(Value::Object(methods)) => methods
            .iter()
            .map(|(name, signature)| {
                let signature = MethodSignature::deserialize(signature).unwrap_or_else(|e| {
                    tracing::debug!("Method '{}' has an unreadable signature: {}", name, e);
                    MethodSignature::default()
                });
                (name.clone(), signature)
            })
            .collect(),
        // some servers list bare method names
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .map(|name| (name.to_string(), MethodSignature::default()))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn parse_properties(value: Option<&Value>) -> BTreeMap<String, PropertyDescriptor> {
    let Some(Value::Object(properties)) = value else {
        return BTreeMap::new();
    };

    properties
        .iter()
        .filter_map(|(name, descriptor)| match PropertyDescriptor::deserialize(descriptor) {
            Ok(descriptor) => Some((name.clone(), descriptor)),
            Err(e) => {
                tracing::warn!("Ignoring malformed property '{}': {}", name, e);
                None
            }
        })
        .collect()
}
