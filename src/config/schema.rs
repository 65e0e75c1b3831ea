//! Typed validation of parsed configuration against a per-method schema
//! of expected keys, types, and defaults.

use crate::error::{Error, Result};

use super::value::ConfigValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Int,
    Str,
    List,
}

/// Validation rule for a single configuration key.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub choices: Option<&'static [&'static str]>,
    pub required: bool,
}

impl FieldSpec {
    pub const fn bool(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Bool,
            min: None,
            max: None,
            choices: None,
            required: false,
        }
    }

    pub const fn int(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Int,
            min: None,
            max: None,
            choices: None,
            required: false,
        }
    }

    pub const fn string(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::Str,
            min: None,
            max: None,
            choices: None,
            required: false,
        }
    }

    pub const fn list(name: &'static str) -> Self {
        FieldSpec {
            name,
            kind: FieldKind::List,
            min: None,
            max: None,
            choices: None,
            required: false,
        }
    }

    pub const fn with_range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub const fn with_choices(mut self, choices: &'static [&'static str]) -> Self {
        self.choices = Some(choices);
        self
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A named set of field rules, e.g. the options accepted by
/// `Session::begin_transaction` or `Connection::open`.
#[derive(Debug, Clone)]
pub struct Schema {
    pub method: &'static str,
    pub fields: &'static [FieldSpec],
}

impl Schema {
    pub const fn new(method: &'static str, fields: &'static [FieldSpec]) -> Self {
        Schema { method, fields }
    }

    fn find(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == key)
    }

    /// Validate a parsed config value against this schema. Unknown keys are
    /// ignored, so forward-compatible options don't reject the whole string.
    pub fn validate(&self, config: &ConfigValue) -> Result<()> {
        let fields = config.as_struct().ok_or_else(|| {
            Error::Config(format!(
                "{}: configuration must be a set of key=value pairs",
                self.method
            ))
        })?;

        for spec in self.fields {
            if spec.required && !fields.contains_key {
                return Err(Error::Config(format!(
                    "{}: missing required option '{}'",
                    self.method, spec.name
                )));
            }
        }

        for (key, value) in fields {
            let Some = self.find(key) else {
                continue;
            };
            self.validate_field?;
        }
        Ok(())
    }

    fn validate_field(&self, spec: &FieldSpec, value: &ConfigValue) -> Result<()> {
        match {
            (FieldKind::Bool, ConfigValue::Bool(_)) => Ok(()),
            (FieldKind::Int, ConfigValue::Int(i)) => {
                if let Some(min) = spec.min {
                    if *i < min {
                        return Err(Error::Config(format!(
                            "{}: '{}' value {} below minimum {}",
                            self.method, spec.name, i, min
                        )));
                    }
                }
                if let Some(max) = spec.max {
                    if *i > max {
                        return Err(Error::Config(format!(
                            "{}: '{}' value {} exceeds maximum {}",
                            self.method, spec.name, i, max
                        )));
                    }
                }
                Ok(())
            }
            (FieldKind::Str, ConfigValue::Str(s)) => {
                if let Some(choices) = spec.choices {
                    if !choices.contains(&s.as_str()) {
                        return Err(Error::Config(format!(
                            "{}: '{}' value '{}' not one of {:?}",
                            self.method, spec.name, s, choices
                        )));
                    }
                }
                Ok(())
            }
            (FieldKind::List, ConfigValue::List(_)) => Ok(()),
            _ => Err(Error::Config(format!(
                "{}: '{}' has the wrong type",
                self.method, spec.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;

    const TXN_SCHEMA: Schema = Schema::new(
        "begin_transaction",
        &[
            FieldSpec::string("isolation").with_choices(&["read-uncommitted", "read-committed", "snapshot"]),
            FieldSpec::bool("sync"),
        ],
    );

    #[test]
    fn accepts_valid_config() {
        let v = parse("isolation=snapshot,sync=true").unwrap();
        assert!(TXN_SCHEMA.validate(&v).is_ok());
    }

    #[test]
    fn rejects_bad_choice() {
        let v = parse("isolation=bogus").unwrap();
        assert!(TXN_SCHEMA.validate(&v).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let v = parse("sync=5").unwrap();
        assert!(TXN_SCHEMA.validate(&v).is_err());
    }

    #[test]
    fn ignores_unknown_keys() {
        let v = parse("isolation=snapshot,some_future_option=7").unwrap();
        assert!(TXN_SCHEMA.validate(&v).is_ok());
    }

    #[test]
    fn range_check() {
        const CACHE_SCHEMA: Schema =
            Schema::new("open", &[FieldSpec::int("eviction_target").with_range(1, 99)]);
        let v = parse("eviction_target=150").unwrap();
        assert!(CACHE_SCHEMA.validate(&v).is_err());
        let v = parse("eviction_target=80").unwrap();
        assert!(CACHE_SCHEMA.validate(&v).is_ok());
    }

    #[test]
    fn required_field_missing() {
        const SCHEMA: Schema = Schema::new("create", &[FieldSpec::string("key_format").required()]);
        let v = parse("value_format=S").unwrap();
        assert!(SCHEMA.validate(&v).is_err());
    }
}
