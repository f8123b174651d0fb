//! Typed access into an untyped JSON tree. Every accessor reports the full
//! dotted path of the field it failed on.

use serde_json::{Map, Value};

use crate::error::DecodeError;

#[derive(Debug, Clone)]
pub(crate) struct Fields<'a> {
    object: &'a Map<String, Value>,
    path: String,
}

fn wrong(field: String, expected: &'static str) -> DecodeError {
    DecodeError::WrongType { field, expected }
}

impl<'a> Fields<'a> {
    /// Treats `value` as the root object, named `path` in error messages.
    pub fn root(value: &'a Value, path: &str) -> Result<Self, DecodeError> {
        match value.get(path) {
            Some(inner) => inner
                .as_object()
                .map(|object| Fields {
                    object,
                    path: path.to_string(),
                })
                .ok_or_else(|| wrong(path.to_string(), "object")),
            None => Err(DecodeError::MissingField {
                field: path.to_string(),
            }),
        }
    }

    fn path_of(&self, key: &str) -> String {
        format!("{}.{key}", self.path)
    }

    fn get(&self, key: &str) -> Result<&'a Value, DecodeError> {
        self.object.get(key).ok_or_else(|| DecodeError::MissingField {
            field: self.path_of(key),
        })
    }

    /// `None` for an absent key or an explicit `null`.
    fn get_nullable(&self, key: &str) -> Option<&'a Value> {
        self.object.get(key).filter(|value| !value.is_null())
    }

    pub fn str(&self, key: &str) -> Result<&'a str, DecodeError> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| wrong(self.path_of(key), "string"))
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&'a str>, DecodeError> {
        match self.get_nullable(key) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| wrong(self.path_of(key), "string")),
        }
    }

    pub fn bool(&self, key: &str) -> Result<bool, DecodeError> {
        self.get(key)?
            .as_bool()
            .ok_or_else(|| wrong(self.path_of(key), "boolean"))
    }

    pub fn i64(&self, key: &str) -> Result<i64, DecodeError> {
        self.get(key)?
            .as_i64()
            .ok_or_else(|| wrong(self.path_of(key), "integer"))
    }

    pub fn object(&self, key: &str) -> Result<Fields<'a>, DecodeError> {
        self.get(key)?
            .as_object()
            .map(|object| Fields {
                object,
                path: self.path_of(key),
            })
            .ok_or_else(|| wrong(self.path_of(key), "object"))
    }

    pub fn optional_object(&self, key: &str) -> Result<Option<Fields<'a>>, DecodeError> {
        match self.get_nullable(key) {
            None => Ok(None),
            Some(value) => value
                .as_object()
                .map(|object| {
                    Some(Fields {
                        object,
                        path: self.path_of(key),
                    })
                })
                .ok_or_else(|| wrong(self.path_of(key), "object")),
        }
    }

    /// Every element of the array at `key`, each required to be an object.
    pub fn objects(&self, key: &str) -> Result<Vec<Fields<'a>>, DecodeError> {
        let items = self
            .get(key)?
            .as_array()
            .ok_or_else(|| wrong(self.path_of(key), "array"))?;
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let path = format!("{}[{index}]", self.path_of(key));
                match item.as_object() {
                    Some(object) => Ok(Fields { object, path }),
                    None => Err(wrong(path, "object")),
                }
            })
            .collect()
    }
}
