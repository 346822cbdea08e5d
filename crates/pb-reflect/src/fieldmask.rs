//! Field masks: normalized sets of dot-separated field paths.

use std::fmt;
use std::str::FromStr;

use pb_core::{Error, Result};

use crate::dynamic::{DynamicMessage, Value};
use crate::pool::MessageDescriptor;

pub const WILDCARD_PATH: &str = "*";

/// A normalized field mask.
///
/// Paths are deduplicated and sorted, and a path is dropped when one of its
/// ancestors is already present. The wildcard `*` selects every field and
/// must appear alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn from_paths<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        if paths.iter().any(|p| p == WILDCARD_PATH) {
            if paths.len() > 1 {
                return Err(Error::InvalidArgument(
                    "wildcard path '*' must not be combined with other paths".to_string(),
                ));
            }
            return Ok(Self { paths });
        }
        for path in &paths {
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(Error::InvalidArgument(format!("invalid field path: {path:?}")));
            }
        }

        paths.sort();
        paths.dedup();
        let mut normalized: Vec<String> = Vec::with_capacity(paths.len());
        for path in paths {
            // Sorted order puts every ancestor right before its descendants.
            let covered = normalized
                .last()
                .is_some_and(|prev| path.starts_with(prev.as_str()) && path[prev.len()..].starts_with('.'));
            if !covered {
                normalized.push(path);
            }
        }
        Ok(Self { paths: normalized })
    }

    /// Parses the comma-separated wire syntax. Blank entries are ignored.
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_paths(input.split(',').map(str::trim).filter(|p| !p.is_empty()))
    }

    pub fn wildcard() -> Self {
        Self {
            paths: vec![WILDCARD_PATH.to_string()],
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn is_wildcard(&self) -> bool {
        self.paths.len() == 1 && self.paths[0] == WILDCARD_PATH
    }

    /// Checks that every path names a field of `desc`. Paths may step into
    /// message-typed list elements and map values.
    pub fn validate(&self, desc: &MessageDescriptor) -> Result<()> {
        if self.is_wildcard() {
            return Ok(());
        }
        for path in &self.paths {
            let mut current = Some(desc.clone());
            for segment in path.split('.') {
                let field = current
                    .as_ref()
                    .and_then(|message| message.field_by_name(segment))
                    .ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "invalid field path: {path} (in {})",
                            desc.full_name()
                        ))
                    })?;
                current = if field.is_map() {
                    field.map_value().and_then(|value| value.kind().as_message().cloned())
                } else {
                    field.kind().as_message().cloned()
                };
            }
        }
        Ok(())
    }

    /// Whether `path` is selected: listed itself, an ancestor of a listed
    /// path, or a descendant of one. An empty mask selects everything.
    pub fn allows(&self, path: &str) -> bool {
        if self.is_empty() || self.is_wildcard() {
            return true;
        }
        self.paths.iter().any(|listed| {
            listed == path || is_ancestor(path, listed) || is_ancestor(listed, path)
        })
    }

    /// Clears every field of `message` not selected by the mask. Nested
    /// messages, message lists and message map values are filtered
    /// recursively.
    pub fn apply(&self, message: &mut DynamicMessage) {
        if self.is_empty() || self.is_wildcard() {
            return;
        }
        let refs: Vec<&str> = self.paths.iter().map(String::as_str).collect();
        filter(message, &refs);
    }

    /// The paths below `field`, relative to it.
    fn children<'a>(paths: &[&'a str], field: &str) -> Vec<&'a str> {
        paths
            .iter()
            .filter_map(|p| p.strip_prefix(field).and_then(|rest| rest.strip_prefix('.')))
            .collect()
    }
}

fn is_ancestor(ancestor: &str, path: &str) -> bool {
    path.len() > ancestor.len() && path.starts_with(ancestor) && path.as_bytes()[ancestor.len()] == b'.'
}

fn filter(message: &mut DynamicMessage, paths: &[&str]) {
    let fields: Vec<_> = message.descriptor().fields().collect();
    for field in fields {
        if paths.contains(&field.name()) {
            continue;
        }
        let children = FieldMask::children(paths, field.name());
        if children.is_empty() {
            message.clear(&field);
            continue;
        }
        if let Some(value) = message.slot_mut(&field) {
            filter_value(value, &children);
        }
    }
}

fn filter_value(value: &mut Value, paths: &[&str]) {
    match value {
        Value::Message(nested) => filter(nested, paths),
        Value::List(items) => {
            for item in items {
                filter_value(item, paths);
            }
        }
        Value::Map(entries) => {
            for entry in entries.values_mut() {
                filter_value(entry, paths);
            }
        }
        _ => {}
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.paths.join(","))
    }
}

impl FromStr for FieldMask {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn normalizes_paths() {
        let mask = FieldMask::from_paths(["title", "author.name", "author", "title"]).unwrap();
        assert_eq!(mask.paths(), ["author", "title"]);
        assert_eq!(mask.to_string(), "author,title");
    }

    #[test]
    fn parse_trims_and_drops_blank_entries() {
        let mask: FieldMask = " title , ,author.display_name ".parse().unwrap();
        assert_eq!(mask.paths(), ["author.display_name", "title"]);
        assert!(FieldMask::parse("").unwrap().is_empty());
    }

    #[test]
    fn wildcard_must_stand_alone() {
        assert!(FieldMask::parse("*").unwrap().is_wildcard());
        let err = FieldMask::parse("*,title").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn allows_ancestors_exact_and_descendants() {
        let mask = FieldMask::from_paths(["a.b"]).unwrap();
        assert!(mask.allows("a"));
        assert!(mask.allows("a.b"));
        assert!(mask.allows("a.b.c"));
        assert!(!mask.allows("a.c"));
        assert!(!mask.allows("ab"));
    }

    #[test]
    fn validates_against_descriptor() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        assert!(FieldMask::parse("title,author.display_name,reviews.rating").unwrap().validate(&book).is_ok());
        assert!(FieldMask::parse("title.length").unwrap().validate(&book).is_err());
        assert!(FieldMask::parse("nope").unwrap().validate(&book).is_err());
    }

    #[test]
    fn apply_keeps_only_selected_fields() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        let author_desc = pool.get_message_by_name("library.v1.Author").unwrap();

        let mut author = DynamicMessage::new(author_desc);
        author.set_by_name("display_name", Value::String("Frank Herbert".into())).unwrap();
        author.set_by_name("email", Value::String("frank@example.com".into())).unwrap();

        let mut message = DynamicMessage::new(book);
        message.set_by_name("title", Value::String("Dune".into())).unwrap();
        message.set_by_name("page_count", Value::I32(412)).unwrap();
        message.set_by_name("author", Value::Message(author)).unwrap();

        FieldMask::parse("title,author.display_name").unwrap().apply(&mut message);

        assert!(message.get_by_name("page_count").is_none());
        assert_eq!(message.get_by_name("title").and_then(Value::as_str), Some("Dune"));
        let author = message.get_by_name("author").and_then(Value::as_message).unwrap();
        assert!(author.get_by_name("email").is_none());
        assert!(author.get_by_name("display_name").is_some());
    }
}
