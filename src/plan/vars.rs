// src/plan/vars.rs

//! Plan variables and `{{ name }}` substitution.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Variable table: plan `[vars]` merged with per-run overrides
pub type Vars = BTreeMap<String, toml::Value>;

/// Name bound to the current element during `for_each` expansion
pub const ITEM_VAR: &str = "item";

/// Parse a `--var key=value` override.
///
/// The value is read as a TOML literal when possible (`true`, `3`,
/// `["a", "b"]`, `"quoted"`), otherwise kept as a plain string.
pub fn parse_var_override(raw: &str) -> Result<(String, toml::Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| Error::Config(format!("Invalid variable '{}': expected key=value", raw)))?;

    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Config(format!("Invalid variable name '{}'", key)));
    }

    let parsed = toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| toml::Value::String(value.to_string()));

    Ok((key.to_string(), parsed))
}

/// Substitute placeholders in a value, recursing into arrays and tables.
///
/// A string that is exactly one placeholder takes the variable's value
/// as-is, so a list variable can fill a list parameter.
pub fn substitute_value(value: &toml::Value, vars: &Vars) -> Result<toml::Value> {
    match value {
        toml::Value::String(s) => {
            if let Some(name) = sole_placeholder(s) {
                return lookup(name, vars).cloned();
            }
            Ok(toml::Value::String(substitute(s, vars)?))
        }
        toml::Value::Array(items) => items
            .iter()
            .map(|item| substitute_value(item, vars))
            .collect::<Result<Vec<_>>>()
            .map(toml::Value::Array),
        toml::Value::Table(table) => {
            let mut out = toml::Table::new();
            for (k, v) in table {
                out.insert(k.clone(), substitute_value(v, vars)?);
            }
            Ok(toml::Value::Table(out))
        }
        other => Ok(other.clone()),
    }
}

/// Substitute every `{{ name }}` placeholder in a string
pub fn substitute(input: &str, vars: &Vars) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::Config(format!("Unterminated placeholder in '{}'", input)))?;
        let name = after[..end].trim();
        out.push_str(&render_scalar(name, lookup(name, vars)?)?);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn sole_placeholder(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn lookup<'a>(name: &str, vars: &'a Vars) -> Result<&'a toml::Value> {
    vars.get(name)
        .ok_or_else(|| Error::Config(format!("Undefined variable '{}'", name)))
}

fn render_scalar(name: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(Error::Config(format!(
            "Variable '{}' is not a scalar and cannot be interpolated into a string",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.insert("user".to_string(), "dev".into());
        vars.insert("uid".to_string(), toml::Value::Integer(1000));
        vars.insert("exts".to_string(), vec!["a", "b"].into());
        vars
    }

    #[test]
    fn test_substitute_scalars() {
        assert_eq!(substitute("/home/{{ user }}/.config", &vars()).unwrap(), "/home/dev/.config");
        assert_eq!(substitute("{{user}}:{{ uid }}", &vars()).unwrap(), "dev:1000");
        assert_eq!(substitute("no placeholders", &vars()).unwrap(), "no placeholders");
    }

    #[test]
    fn test_substitute_errors() {
        assert!(substitute("{{ missing }}", &vars()).is_err());
        assert!(substitute("{{ user ", &vars()).is_err());
        assert!(substitute("list: {{ exts }}", &vars()).is_err());
    }

    #[test]
    fn test_sole_placeholder_keeps_type() {
        let value = substitute_value(&"{{ exts }}".into(), &vars()).unwrap();
        assert_eq!(value, toml::Value::from(vec!["a", "b"]));

        let nested =
            substitute_value(&toml::Value::from(vec!["{{ user }}", "x"]), &vars()).unwrap();
        assert_eq!(nested, toml::Value::from(vec!["dev", "x"]));
    }

    #[test]
    fn test_parse_var_override() {
        let (k, v) = parse_var_override("user=alice").unwrap();
        assert_eq!(k, "user");
        assert_eq!(v, toml::Value::String("alice".to_string()));

        let (_, v) = parse_var_override("exts=[\"x\", \"y\"]").unwrap();
        assert_eq!(v, toml::Value::from(vec!["x", "y"]));

        let (_, v) = parse_var_override("debug=true").unwrap();
        assert_eq!(v, toml::Value::Boolean(true));

        let (_, v) = parse_var_override("url=https://example.com/a?b=c").unwrap();
        assert_eq!(v.as_str(), Some("https://example.com/a?b=c"));

        assert!(parse_var_override("novalue").is_err());
        assert!(parse_var_override("bad-name=1").is_err());
    }
}
