//! Schema-driven default filling for plugin configuration.
//!
//! Plugin schemas come from the gateway as JSON documents of the form
//! `{"fields": [{"config": {"type": "record", "fields": [{"<name>": {...}}]}}]}`.
//! Each field entry is a single-key object mapping the field name to its definition.

use serde_json::Value;

use crate::core::error::{ReconcileError, ReconcileResult};
use crate::state::Configuration;

/// Merge the defaults declared in `schema` into a copy of `config`.
///
/// For every field of the `config` record: an absent (or `null`) value receives the
/// declared default, which may itself be `null`; an absent record without a default
/// receives a nested object filled recursively; a present record is recursed into;
/// any other present value is kept untouched.
pub fn fill_config_defaults(
    plugin: &str,
    schema: &Value,
    config: &Configuration,
) -> ReconcileResult<Configuration> {
    let config_schema = top_level_field(schema, "config")
        .ok_or_else(|| ReconcileError::fill(plugin, "schema has no 'config' field"))?;

    let mut filled = config.clone();
    fill_record(plugin, config_schema, &mut filled)?;
    Ok(filled)
}

fn top_level_field<'a>(schema: &'a Value, name: &str) -> Option<&'a Value> {
    schema
        .get("fields")?
        .as_array()?
        .iter()
        .find_map(|entry| entry.get(name))
}

fn is_record(field_schema: &Value) -> bool {
    field_schema.get("type").and_then(Value::as_str) == Some("record")
}

fn fill_record(plugin: &str, record: &Value, config: &mut Configuration) -> ReconcileResult<()> {
    let fields = record
        .get("fields")
        .and_then(Value::as_array)
        .ok_or_else(|| ReconcileError::fill(plugin, "record schema has no field list"))?;

    for entry in fields {
        let entry = entry
            .as_object()
            .ok_or_else(|| ReconcileError::fill(plugin, format!("malformed field entry: {}", entry)))?;

        for (name, field_schema) in entry {
            let missing = matches!(config.get(name), None | Some(Value::Null));

            if missing {
                if let Some(default) = field_schema.get("default") {
                    config.insert(name.clone(), default.clone());
                } else if is_record(field_schema) {
                    let mut nested = Configuration::new();
                    fill_record(plugin, field_schema, &mut nested)?;
                    config.insert(name.clone(), Value::Object(nested));
                }
                continue;
            }

            if is_record(field_schema) {
                match config.get_mut(name) {
                    Some(Value::Object(nested)) => fill_record(plugin, field_schema, nested)?,
                    Some(other) => {
                        return Err(ReconcileError::fill(
                            plugin,
                            format!("field '{}' must be an object, got {}", name, other),
                        ))
                    }
                    None => {}
                }
            }
        }
    }

    Ok(())
}
