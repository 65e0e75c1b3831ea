use std::collections::BTreeMap;

use crate::error::{Error, Result};

use super::value::ConfigValue;

/// Parse a configuration string into a [`ConfigValue::Struct`].
///
/// ```
/// use archengine_core::config;
///
/// let v = config::parse("overwrite=false,cache_size=512MB,ids=[1,2,3]").unwrap();
/// assert_eq!(v.get("overwrite").unwrap().as_bool(), Some(false));
/// ```
pub fn parse(input: &str) -> Result<ConfigValue> {
    let mut p = Parser::new(input);
    let v = p.parse_pairs(true)?;
    p.skip_ws();
    if !p.at_end() {
        return Err(Error::Config(format!(
            "trailing characters in configuration string at byte {}",
            p.pos
        )));
    }
    Ok(ConfigValue::Struct(v))
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(Error::Config(format!(
                "expected '{}' at byte {}",
                c as char, self.pos
            )))
        }
    }

    /// Parses `key=value, key=value, ...` up to a closing `)` or end of
    /// input. `top_level` controls whether a closing paren is unexpected.
    fn parse_pairs(&mut self, top_level: bool) -> Result<BTreeMap<String, ConfigValue>> {
        let mut out = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.at_end() || (!top_level && self.peek() == Some(b')')) {
                break;
            }
            let key = self.parse_key()?;
            self.skip_ws();
            let value = if self.peek() == Some(b'=') {
                self.pos += 1;
                self.skip_ws();
                self.parse_value()?
            } else {
                // Bare key, e.g. "overwrite" shorthand for "overwrite=true".
                ConfigValue::Bool(true)
            };
            out.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => break,
            }
        }
        Ok(out)
    }

    fn parse_key(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(Error::Config(format!(
                "expected configuration key at byte {}",
                self.pos
            )));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn parse_value(&mut self) -> Result<ConfigValue> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let pairs = self.parse_pairs(false)?;
                self.expect(b')')?;
                Ok(ConfigValue::Struct(pairs))
            }
            Some(b'[') => {
                self.pos += 1;
                let items = self.parse_list_items()?;
                self.expect(b']')?;
                Ok(ConfigValue::List(items))
            }
            Some(b'"') => self.parse_quoted_string(),
            Some(_) => self.parse_bare_token(),
            None => Err(Error::Config("unexpected end of configuration string".into())),
        }
    }

    fn parse_list_items(&mut self) -> Result<Vec<ConfigValue>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(b']') {
                break;
            }
            items.push(self.parse_value()?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => break,
            }
        }
        Ok(items)
    }

    fn parse_quoted_string(&mut self) -> Result<ConfigValue> {
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(Error::Config("unterminated quoted string".into()));
                }
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => {
                            out.push(c as char);
                            self.pos += 1;
                        }
                        None => return Err(Error::Config("unterminated escape".into())),
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    self.pos += 1;
                    while self.pos < self.bytes.len() && (self.bytes[self.pos] & 0xC0) == 0x80 {
                        self.pos += 1;
                    }
                    out.push_str(&self.src[start..self.pos]);
                }
            }
        }
        Ok(ConfigValue::Str(out))
    }

    fn parse_bare_token(&mut self) -> Result<ConfigValue> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b',' || b == b')' || b == b']' || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::Config(format!(
                "expected a value at byte {}",
                self.pos
            )));
        }
        let token = &self.src[start..self.pos];
        Ok(match token {
            "true" => ConfigValue::Bool(true),
            "false" => ConfigValue::Bool(false),
            _ => match token.parse::<i64>() {
                Ok(i) => ConfigValue::Int(i),
                Err(_) => ConfigValue::Str(token.to_string()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_pairs() {
        let v = parse("a=1,b=true,c=hello").unwrap();
        assert_eq!(v.get("a").unwrap().as_int(), Some(1));
        assert_eq!(v.get("b").unwrap().as_bool(), Some(true));
        assert_eq!(v.get("c").unwrap().as_str(), Some("hello"));
    }

    #[test]
    fn parses_bare_key_as_true() {
        let v = parse("overwrite").unwrap();
        assert_eq!(v.get("overwrite").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn parses_nested_group() {
        let v = parse("block_cache=(enabled=true,size=1000)").unwrap();
        let nested = v.get("block_cache").unwrap();
        assert_eq!(nested.get("enabled").unwrap().as_bool(), Some(true));
        assert_eq!(nested.get("size").unwrap().as_int(), Some(1000));
    }

    #[test]
    fn parses_list() {
        let v = parse("ids=[1,2,3]").unwrap();
        let list = v.get("ids").unwrap().as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].as_int(), Some(1));
    }

    #[test]
    fn parses_quoted_string_with_comma() {
        let v = parse(r#"name="hello, world""#).unwrap();
        assert_eq!(v.get("name").unwrap().as_str(), Some("hello, world"));
    }

    #[test]
    fn rejects_trailing_garbage() {
        let err = parse("a=1)").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_string_is_empty_struct() {
        let v = parse("").unwrap();
        assert!(v.as_struct().unwrap().is_empty());
    }
}
