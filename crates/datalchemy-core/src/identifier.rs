use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Schema-qualified object name. Equality and ordering are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    /// Namespace, when the engine has one.
    pub schema: Option<String>,
    pub name: String,
}

/// Tables are addressed by plain identifiers.
pub type TableName = Identifier;

impl Identifier {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn unqualified(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Parse `schema.name` or a bare `name`.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut parts = raw.split('.');
        let first = parts.next().unwrap_or_default();
        let second = parts.next();
        if parts.next().is_some() {
            return Err(Error::InvalidIdentifier(format!(
                "too many parts in '{raw}'"
            )));
        }

        match second {
            Some(name) if !first.is_empty() && !name.is_empty() => Ok(Self::new(first, name)),
            None if !first.is_empty() => Ok(Self::unqualified(first)),
            _ => Err(Error::InvalidIdentifier(format!("empty part in '{raw}'"))),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qualified_and_bare_names() {
        assert_eq!(
            Identifier::parse("public.users").unwrap(),
            Identifier::new("public", "users")
        );
        assert_eq!(
            Identifier::parse("users").unwrap(),
            Identifier::unqualified("users")
        );
        assert!(Identifier::parse("a.b.c").is_err());
        assert!(Identifier::parse(".users").is_err());
    }

    #[test]
    fn displays_schema_prefix() {
        assert_eq!(Identifier::new("app", "orders").to_string(), "app.orders");
        assert_eq!(Identifier::unqualified("orders").to_string(), "orders");
    }
}
