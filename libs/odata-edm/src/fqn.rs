use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Namespace-qualified name of a schema element, written `Namespace.Name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullQualifiedName {
    namespace: String,
    name: String,
}

impl FullQualifiedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Splits at the last dot. Both parts must be non-empty.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (namespace, name) = text.rsplit_once('.')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for FullQualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl Serialize for FullQualifiedName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FullQualifiedName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("not a qualified name: {text}")))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_at_last_dot() {
        let fqn = FullQualifiedName::parse("Org.Sales.Order").unwrap();
        assert_eq!(fqn.namespace(), "Org.Sales");
        assert_eq!(fqn.name(), "Order");
        assert_eq!(fqn.to_string(), "Org.Sales.Order");
    }

    #[test]
    fn parse_rejects_unqualified() {
        assert!(FullQualifiedName::parse("Order").is_none());
        assert!(FullQualifiedName::parse(".Order").is_none());
        assert!(FullQualifiedName::parse("Org.").is_none());
    }

    #[test]
    fn serde_as_string() {
        let fqn: FullQualifiedName = serde_json::from_str("\"Demo.Person\"").unwrap();
        assert_eq!(fqn, FullQualifiedName::new("Demo", "Person"));
        assert_eq!(serde_json::to_string(&fqn).unwrap(), "\"Demo.Person\"");
    }
}
