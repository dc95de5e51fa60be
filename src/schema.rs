//! Protocol schema loading and type resolution.
//!
//! Two interface-description files define the wire-visible surface: a
//! data-type schema (message types and their fields) and a service schema
//! (method names and their request/response types). Defaults are bundled
//! with the crate; both can be overridden from configuration. Loading is
//! synchronous and happens once, at client construction - a missing file or
//! an unresolvable type name aborts construction so the client is never
//! usable half-initialized.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::config::SchemaPaths;
use crate::{Error, Result};

const BUNDLED_TYPES: &str = include_str!("../schema/vexdb_types.json");
const BUNDLED_SERVICE: &str = include_str!("../schema/vexdb_service.json");

/// Fully-qualified name of the collection schema message type
pub const COLLECTION_SCHEMA_TYPE: &str = "vexdb.schema.CollectionSchema";
/// Fully-qualified name of the field schema message type
pub const FIELD_SCHEMA_TYPE: &str = "vexdb.schema.FieldSchema";

/// Field kinds expressible in the data-type schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// UTF-8 string
    Str,
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// Floating point number
    Float,
    /// Ordered list
    List,
    /// String-keyed map
    Map,
}

impl FieldKind {
    fn parse(kind: &str) -> Result<Self> {
        match kind {
            "string" => Ok(FieldKind::Str),
            "bool" => Ok(FieldKind::Bool),
            "int" => Ok(FieldKind::Int),
            "float" => Ok(FieldKind::Float),
            "list" => Ok(FieldKind::List),
            "map" => Ok(FieldKind::Map),
            other => Err(Error::config(format!("unknown schema field kind `{other}`"))),
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::Str => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Int => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::List => value.is_array(),
            FieldKind::Map => value.is_object(),
        }
    }
}

/// Descriptor of one field of a message type
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field kind
    pub kind: FieldKind,
    /// Whether the field must be present and non-null
    pub required: bool,
}

/// Resolved descriptor of one message type
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    /// Fully-qualified name of this type
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate a JSON value against this descriptor: it must be an object,
    /// carry every required field with the declared kind, and carry no
    /// fields the descriptor does not know.
    pub fn check(&self, value: &Value) -> Result<()> {
        let object = value.as_object().ok_or_else(|| {
            Error::protocol(format!("{} payload must be an object", self.name))
        })?;
        for field in &self.fields {
            match object.get(&field.name) {
                Some(v) if v.is_null() => {
                    if field.required {
                        return Err(Error::protocol(format!(
                            "{}.{} must not be null",
                            self.name, field.name
                        )));
                    }
                }
                Some(v) => {
                    if !field.kind.matches(v) {
                        return Err(Error::protocol(format!(
                            "{}.{} has the wrong type",
                            self.name, field.name
                        )));
                    }
                }
                None => {
                    if field.required {
                        return Err(Error::protocol(format!(
                            "{}.{} is required",
                            self.name, field.name
                        )));
                    }
                }
            }
        }
        for key in object.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                return Err(Error::protocol(format!(
                    "unknown field `{key}` for {}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Validate and binary-encode a JSON value as a nested sub-message.
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        self.check(value)?;
        serde_json::to_vec(value).map_err(Error::Json)
    }
}

/// Descriptor of one service method
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// Fully-qualified method name
    pub name: String,
    /// Fully-qualified request type name
    pub request: String,
    /// Fully-qualified response type name
    pub response: String,
}

/// The loaded schema surface: message types plus service methods.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    types: BTreeMap<String, TypeDescriptor>,
    methods: BTreeMap<String, MethodDescriptor>,
}

impl SchemaCatalog {
    /// Resolve a message type by fully-qualified name
    pub fn message_type(&self, name: &str) -> Result<&TypeDescriptor> {
        self.types
            .get(name)
            .ok_or_else(|| Error::config(format!("schema type `{name}` not found")))
    }

    /// Resolve a service method by fully-qualified name
    pub fn method(&self, name: &str) -> Result<&MethodDescriptor> {
        self.methods
            .get(name)
            .ok_or_else(|| Error::config(format!("service method `{name}` not declared")))
    }
}

/// The two resolved type descriptors the RPC wrappers hand-encode with.
#[derive(Debug, Clone)]
pub struct SchemaTypes {
    /// Collection schema message type
    pub collection: TypeDescriptor,
    /// Field schema message type
    pub field: TypeDescriptor,
}

#[derive(Deserialize)]
struct RawTypesFile {
    package: String,
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    name: String,
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
struct RawField {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    required: bool,
}

#[derive(Deserialize)]
struct RawServiceFile {
    #[allow(dead_code)]
    service: String,
    methods: Vec<RawMethod>,
}

#[derive(Deserialize)]
struct RawMethod {
    name: String,
    request: String,
    response: String,
}

fn read_source(path: Option<&std::path::Path>, bundled: &'static str) -> Result<String> {
    match path {
        None => Ok(bundled.to_string()),
        Some(p) => std::fs::read_to_string(p).map_err(|e| {
            Error::config(format!("failed to read schema file `{}`: {e}", p.display()))
        }),
    }
}

/// Load the two schema files and resolve the message types the client
/// hand-encodes with. Every method this client dispatches must be declared
/// by the service schema, and every declared method must name resolvable
/// request/response types.
pub fn load(paths: &SchemaPaths) -> Result<(SchemaCatalog, SchemaTypes)> {
    let types_text = read_source(paths.types_path.as_deref(), BUNDLED_TYPES)?;
    let service_text = read_source(paths.service_path.as_deref(), BUNDLED_SERVICE)?;

    let raw_types: RawTypesFile = serde_json::from_str(&types_text)
        .map_err(|e| Error::config(format!("malformed data-type schema: {e}")))?;
    let raw_service: RawServiceFile = serde_json::from_str(&service_text)
        .map_err(|e| Error::config(format!("malformed service schema: {e}")))?;

    let mut types = BTreeMap::new();
    for message in raw_types.messages {
        let fqn = format!("{}.{}", raw_types.package, message.name);
        let mut fields = Vec::with_capacity(message.fields.len());
        for field in message.fields {
            fields.push(FieldDescriptor {
                name: field.name,
                kind: FieldKind::parse(&field.kind)?,
                required: field.required,
            });
        }
        if types
            .insert(fqn.clone(), TypeDescriptor { name: fqn.clone(), fields })
            .is_some()
        {
            return Err(Error::config(format!("duplicate schema type `{fqn}`")));
        }
    }

    let mut methods = BTreeMap::new();
    for method in raw_service.methods {
        for type_name in [&method.request, &method.response] {
            if !types.contains_key(type_name) {
                return Err(Error::config(format!(
                    "service method `{}` references unknown type `{type_name}`",
                    method.name
                )));
            }
        }
        methods.insert(
            method.name.clone(),
            MethodDescriptor {
                name: method.name,
                request: method.request,
                response: method.response,
            },
        );
    }

    let catalog = SchemaCatalog { types, methods };
    for method in crate::types::methods::ALL {
        catalog.method(method)?;
    }

    let schema_types = SchemaTypes {
        collection: catalog.message_type(COLLECTION_SCHEMA_TYPE)?.clone(),
        field: catalog.message_type(FIELD_SCHEMA_TYPE)?.clone(),
    };
    Ok((catalog, schema_types))
}
