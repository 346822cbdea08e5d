//! Usage text for AIP request conventions: filtering, ordering, pagination
//! and update masks.

use std::sync::LazyLock;

use pb_core::{Error, Result};
use regex::Regex;

use crate::pool::{Kind, MessageDescriptor};
use crate::wkt;

/// How far nested resource fields are expanded when listing filter paths.
pub const FILTER_PATH_DEPTH: usize = 3;

const BOOLEAN_FILTER_NOTE: &str =
    "Note: boolean fields use 'field_name' (true) or 'NOT field_name' (false)";

static PATTERN_VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^}]+\}").expect("invalid regex"));

/// Replaces every `{variable}` segment of a resource pattern with `-`.
pub fn wildcard_pattern(pattern: &str) -> String {
    PATTERN_VARIABLE.replace_all(pattern, "-").into_owned()
}

/// Filtering section. Examples are drawn from the kinds of the resource's
/// own top-level fields that appear in `paths`; one per kind.
pub fn filtering_doc(resource: Option<&MessageDescriptor>, paths: &[String]) -> String {
    let mut examples = Vec::new();

    if let Some(resource) = resource {
        let (mut string, mut boolean, mut enumeration, mut timestamp) = (false, false, false, false);
        for field in resource.fields() {
            let name = field.name();
            if !paths.iter().any(|p| p == name) {
                continue;
            }
            match field.kind() {
                Kind::String if !string => {
                    examples.push(format!("{name} = \"example\""));
                    string = true;
                }
                Kind::Bool if !boolean => {
                    examples.push(name.to_string());
                    boolean = true;
                }
                Kind::Enum(e) if !enumeration => {
                    if let Some(value) = e.values().nth(1) {
                        examples.push(format!("{name} = {}", value.name()));
                    }
                    enumeration = true;
                }
                Kind::Message(m) if !timestamp && m.full_name() == wkt::TIMESTAMP => {
                    examples.push(format!("{name} > \"2024-01-01T00:00:00Z\""));
                    timestamp = true;
                }
                _ => {}
            }
        }
    }

    if let Some(nested) = paths.iter().find(|p| p.contains('.')) {
        examples.push(format!("{nested} = \"value\""));
    }

    if examples.is_empty() {
        return format!(
            "**Filtering (AIP-160)**\nFilterable fields: {}\n{BOOLEAN_FILTER_NOTE}",
            paths.join(", ")
        );
    }
    format!(
        "**Filtering (AIP-160)**\nExamples: {}\n{BOOLEAN_FILTER_NOTE}",
        examples.join(", ")
    )
}

pub fn ordering_doc(paths: &[String], default_order: &str) -> String {
    format!(
        "**Ordering (AIP-132)**\nOrder by: {}\nDefault: {default_order}\nUse 'field desc' for descending order.",
        paths.join(", ")
    )
}

pub fn pagination_doc(default_page_size: u32) -> String {
    format!(
        "**Pagination (AIP-158)**\nDefault page size: {default_page_size}\nUse page_token from response to fetch next page."
    )
}

pub fn update_doc(paths: &[String]) -> String {
    format!(
        "**Field Mask (AIP-134)**\nUpdatable fields: {}\nMust use the update mask to specify which fields to update.",
        paths.join(", ")
    )
}

/// The resource field paths a filter may reference.
///
/// Fields are explored up to [`FILTER_PATH_DEPTH`] levels deep. A path is
/// allowed when it is listed in `allowed` or sits below a listed `prefix.*`.
/// Identifier and input-only fields are never filterable. Results are
/// ordered by depth, then declaration order.
pub fn filterable_paths(resource: &MessageDescriptor, allowed: &[String]) -> Result<Vec<String>> {
    let wildcard = allowed.iter().any(|p| p == "*");
    if wildcard && allowed.len() != 1 {
        return Err(Error::Internal(format!(
            "filtering paths for {}: cannot use '*' in combination with other paths",
            resource.full_name()
        )));
    }

    let mut nodes = Vec::new();
    explore(resource, "", 0, &mut nodes);
    nodes.sort_by_key(|(depth, _)| *depth);

    let is_allowed = |path: &str| {
        if wildcard || allowed.iter().any(|p| p == path) {
            return true;
        }
        let parts: Vec<&str> = path.split('.').collect();
        (1..=parts.len()).any(|i| {
            let prefix = format!("{}.*", parts[..i].join("."));
            allowed.contains(&prefix)
        })
    };

    Ok(nodes
        .into_iter()
        .map(|(_, path)| path)
        .filter(|path| is_allowed(path))
        .collect())
}

fn explore(message: &MessageDescriptor, prefix: &str, depth: usize, out: &mut Vec<(usize, String)>) {
    if depth == FILTER_PATH_DEPTH {
        return;
    }
    for field in message.fields() {
        let behaviors = field.behaviors();
        if behaviors.identifier || behaviors.input_only {
            continue;
        }
        let path = if prefix.is_empty() {
            field.name().to_string()
        } else {
            format!("{prefix}.{}", field.name())
        };
        if let Kind::Message(nested) = field.kind() {
            if !field.is_map() && !wkt::is_leaf(nested.full_name()) {
                explore(&nested, &path, depth + 1, out);
            }
        }
        out.push((depth, path));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn wildcard_pattern_replaces_variables() {
        assert_eq!(wildcard_pattern("shelves/{shelf}/books/{book}"), "shelves/-/books/-");
    }

    #[test]
    fn filtering_doc_builds_one_example_per_kind() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        let doc = filtering_doc(
            Some(&book),
            &strings(&["title", "isbn", "genre", "published", "publish_time", "author.display_name"]),
        );
        assert_eq!(
            doc,
            "**Filtering (AIP-160)**\n\
             Examples: title = \"example\", genre = FICTION, publish_time > \"2024-01-01T00:00:00Z\", published, author.display_name = \"value\"\n\
             Note: boolean fields use 'field_name' (true) or 'NOT field_name' (false)"
        );
    }

    #[test]
    fn filtering_doc_without_examples_lists_fields() {
        let doc = filtering_doc(None, &strings(&["page_count"]));
        assert!(doc.contains("Filterable fields: page_count"));
    }

    #[test]
    fn filterable_paths_expand_wildcards_and_skip_identifiers() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        let paths = filterable_paths(&book, &strings(&["name", "title", "author.*"])).unwrap();
        assert_eq!(paths, strings(&["title", "author", "author.display_name", "author.email"]));
    }

    #[test]
    fn filterable_paths_reject_mixed_wildcard() {
        let pool = testing::library_pool();
        let book = pool.get_message_by_name("library.v1.Book").unwrap();
        assert!(filterable_paths(&book, &strings(&["*", "title"])).is_err());
    }
}
