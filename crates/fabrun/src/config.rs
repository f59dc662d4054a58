//! # Application Configuration
//!
//! The application config is a TOML document. Each component is addressed by
//! its qualified name; listeners live under a `[listeners]` table:
//!
//! ```toml
//! ["shop/Cache"]
//! Size = 1000
//!
//! [listeners]
//! web = { local_address = "127.0.0.1:8080" }
//! ```
//!
//! A section is bound into the component's declared config type. Fields that
//! are absent keep the type's `Default` value; keys the type does not know
//! fail startup.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::de::Visitor;

use crate::registration::TypeTag;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Failed to read config: {0}")]
    Io(String),
    #[error("Failed to parse config: {0}")]
    Parse(String),
    #[error("Section {0} is not a table")]
    NotATable(String),
    #[error("Unknown key {key} in section {section}")]
    UnknownKey { section: String, key: String },
    #[error("Section {section} does not fit {type_name}: {reason}")]
    Bind {
        section: String,
        type_name: &'static str,
        reason: String,
    },
    #[error("Component {0} declares no config")]
    NotDeclared(String),
    #[error("Component {component} declares config {declared}, not {requested}")]
    Mismatch {
        component: String,
        declared: &'static str,
        requested: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A per-component configuration type.
///
/// Field names are the keys of the component's TOML section; use serde
/// renames to match the desired spelling.
pub trait ComponentConfig: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> ComponentConfig for T where T: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// The config type a registration declared, with a type-erased validator.
#[derive(Clone, Copy)]
pub struct ConfigDecl {
    type_tag: TypeTag,
    validate: fn(&str, Option<&toml::Table>) -> Result<()>,
}

impl ConfigDecl {
    pub(crate) fn of<C: ComponentConfig>() -> Self {
        Self {
            type_tag: TypeTag::of::<C>(),
            validate: |section, table| bind::<C>(section, table).map(|_| ()),
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        self.type_tag
    }

    /// Checks that `table` binds into the declared type.
    pub fn validate(&self, section: &str, table: Option<&toml::Table>) -> Result<()> {
        (self.validate)(section, table)
    }
}

impl std::fmt::Debug for ConfigDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDecl")
            .field("type", &self.type_tag.name())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    pub local_address: String,
}

const LISTENERS: &str = "listeners";

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    sections: HashMap<String, toml::Table>,
    listeners: HashMap<String, ListenerConfig>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let root: toml::Table = toml::from_str(source).map_err(|e| Error::Parse(e.to_string()))?;

        let mut config = Self::default();
        for (name, value) in root {
            let toml::Value::Table(table) = value else {
                return Err(Error::NotATable(name));
            };
            if name == LISTENERS {
                config.listeners = HashMap::<String, ListenerConfig>::deserialize(toml::Value::Table(table))
                    .map_err(|e| Error::Bind {
                        section: LISTENERS.to_string(),
                        type_name: std::any::type_name::<ListenerConfig>(),
                        reason: e.to_string(),
                    })?;
            } else {
                config.sections.insert(name, table);
            }
        }
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::Io(e.to_string()))?;
        Self::from_toml_str(&source)
    }

    pub fn section(&self, component: &str) -> Option<&toml::Table> {
        self.sections.get(component)
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn listener(&self, name: &str) -> Option<&ListenerConfig> {
        self.listeners.get(name)
    }

    /// Binds the section for `component` into `C`.
    pub fn bind<C: ComponentConfig>(&self, component: &str) -> Result<C> {
        bind(component, self.section(component))
    }
}

/// Overlays `table` on the serialized defaults of `C` and deserializes.
/// Keys must name a field of `C`.
pub fn bind<C: ComponentConfig>(section: &str, table: Option<&toml::Table>) -> Result<C> {
    let bind_err = |reason: String| Error::Bind {
        section: section.to_string(),
        type_name: std::any::type_name::<C>(),
        reason,
    };

    let Some(table) = table else {
        return Ok(C::default());
    };

    let defaults = match toml::Value::try_from(C::default()) {
        Ok(toml::Value::Table(t)) => t,
        Ok(_) => return Err(bind_err("config type is not a struct".into())),
        Err(e) => return Err(bind_err(e.to_string())),
    };

    let fields = field_names::<C>();
    let known = |key: &str| {
        defaults.contains_key(key) || fields.is_some_and(|f| f.iter().any(|field| *field == key))
    };

    let mut merged = defaults.clone();
    for (key, value) in table {
        if !known(key) {
            return Err(Error::UnknownKey {
                section: section.to_string(),
                key: key.clone(),
            });
        }
        merged.insert(key.clone(), value.clone());
    }

    C::deserialize(toml::Value::Table(merged)).map_err(|e| bind_err(e.to_string()))
}

/// The field names a derived struct declares, including those its serialized
/// defaults omit (`None` options, skipped fields). `None` for types that do
/// not deserialize as a plain struct.
fn field_names<C: DeserializeOwned>() -> Option<&'static [&'static str]> {
    let mut fields = None;
    let _ = C::deserialize(FieldNames(&mut fields));
    fields
}

/// A deserializer that only records what `deserialize_struct` is asked for.
struct FieldNames<'a>(&'a mut Option<&'static [&'static str]>);

impl<'de> serde::Deserializer<'de> for FieldNames<'_> {
    type Error = serde::de::value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> std::result::Result<V::Value, Self::Error> {
        Err(serde::de::Error::custom("not a struct"))
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        _visitor: V,
    ) -> std::result::Result<V::Value, Self::Error> {
        *self.0 = Some(fields);
        Err(serde::de::Error::custom("fields recorded"))
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf option unit unit_struct newtype_struct seq tuple
        tuple_struct map enum identifier ignored_any
    }
}
