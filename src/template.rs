use std::collections::HashMap;
use std::io::Cursor;

use crate::AppResult;

/// Text with `{{key}}` placeholders.
pub struct Template {
    source: String,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Decompress a template that was embedded with `include_zstd!`.
    pub fn from_zstd(bytes: &[u8]) -> AppResult<Self> {
        let raw = zstd::decode_all(Cursor::new(bytes))?;
        let source = String::from_utf8(raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self { source })
    }

    /// Render the template by replacing `{{key}}` with the corresponding value.
    /// Unknown placeholders are left as they are; substituted values are never rescanned.
    pub fn render(&self, vars: &HashMap<&str, &str>) -> String {
        let mut output = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start + 2..].find("}}") else {
                break;
            };
            let key = &rest[start + 2..start + 2 + len];
            output.push_str(&rest[..start]);
            match vars.get(key.trim()) {
                Some(value) => output.push_str(value),
                None => output.push_str(&rest[start..start + len + 4]),
            }
            rest = &rest[start + len + 4..];
        }
        output.push_str(rest);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let t = Template::new("<h1>{{title}}</h1><div>{{body}}</div>{{missing}}");
        let mut vars = HashMap::new();
        vars.insert("title", "Topics");
        vars.insert("body", "[1, 2]");
        assert_eq!(
            t.render(&vars),
            "<h1>Topics</h1><div>[1, 2]</div>{{missing}}"
        );
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let t = Template::new("{{a}} {{b}}");
        let vars = HashMap::from([("a", "{{b}}"), ("b", "x")]);
        assert_eq!(t.render(&vars), "{{b}} x");
    }

    #[test]
    fn test_from_zstd() {
        let packed = zstd::encode_all(Cursor::new(b"hello {{who}}".as_slice()), 3).unwrap();
        let t = Template::from_zstd(&packed).unwrap();
        let vars = HashMap::from([("who", "world")]);
        assert_eq!(t.render(&vars), "hello world");
    }

    #[test]
    fn test_from_corrupt_zstd() {
        assert!(Template::from_zstd(b"not zstd").is_err());
    }
}
