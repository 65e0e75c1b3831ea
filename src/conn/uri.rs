//! URI parsing for named engine objects: `scheme:name[:sub]`. The scheme
//! prefix before the first colon dispatches to the right object kind.

use crate::error::{Error, Result};

/// The handful of schemes this crate recognizes. A schema/table layer
/// above this crate would add more (`index:`, `colgroup:`, `lsm:`); those
/// are out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    File,
    Table,
    Statistics,
    Log,
    Metadata,
}

impl Scheme {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Scheme::File),
            "table" => Some(Scheme::Table),
            "statistics" => Some(Scheme::Statistics),
            "log" => Some(Scheme::Log),
            "metadata" => Some(Scheme::Metadata),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Table => "table",
            Scheme::Statistics => "statistics",
            Scheme::Log => "log",
            Scheme::Metadata => "metadata",
        }
    }
}

/// A parsed object name, e.g. `table:accounts` or `statistics:accounts:tree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: Scheme,
    pub name: String,
    pub sub: Option<String>,
}

impl Uri {
    pub fn parse(raw: &str) -> Result<Self> {
        let (scheme_str, rest) = raw
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("'{raw}' is missing a scheme (expected scheme:name)")))?;
        let scheme = Scheme::parse(scheme_str)
            .ok_or_else(|| Error::Config(format!("unrecognized URI scheme '{scheme_str}'")))?;
        let (name, sub) = match rest.split_once(':') {
            Some((n, s)) => (n.to_string(), Some(s.to_string())),
            None => (rest.to_string(), None),
        };
        if name.is_empty() {
            return Err(Error::Config(format!("'{raw}' is missing a name")));
        }
        Ok(Uri { scheme, name, sub })
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sub {
            Some(sub) => write!(f, "{}:{}:{}", self.scheme.as_str(), self.name, sub),
            None => write!(f, "{}:{}", self.scheme.as_str(), self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_table_uri() {
        let uri = Uri::parse("table:accounts").unwrap();
        assert_eq!(uri.scheme, Scheme::Table);
        assert_eq!(uri.name, "accounts");
        assert_eq!(uri.sub, None);
    }

    #[test]
    fn parses_uri_with_sub_component() {
        let uri = Uri::parse("statistics:accounts:tree").unwrap();
        assert_eq!(uri.scheme, Scheme::Statistics);
        assert_eq!(uri.name, "accounts");
        assert_eq!(uri.sub.as_deref(), Some("tree"));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(Uri::parse("accounts").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(Uri::parse("lsm:accounts").is_err());
    }

    #[test]
    fn rejects_empty_name() {
        assert!(Uri::parse("table:").is_err());
    }
}
