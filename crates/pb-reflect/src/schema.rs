//! The resolved, documented view of a descriptor pool.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use pb_core::{Error, Result};
use regex::Regex;
use tracing::debug;

use crate::aip;
use crate::descriptor::ResourceDescriptor;
use crate::pool::{
    Comments, Descriptor, DescriptorPool, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
use crate::source::SchemaData;

static COMMENT_OVERRIDE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@comment\(([^)]+)\)").expect("invalid regex"));

// ── Standard methods ──

/// AIP standard method classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StandardMethodType {
    #[default]
    Unspecified,
    Create,
    Get,
    BatchGet,
    Update,
    Delete,
    List,
}

impl StandardMethodType {
    const ALL: [StandardMethodType; 6] = [
        StandardMethodType::Create,
        StandardMethodType::Get,
        StandardMethodType::BatchGet,
        StandardMethodType::Update,
        StandardMethodType::Delete,
        StandardMethodType::List,
    ];

    pub fn verb(&self) -> &'static str {
        match self {
            StandardMethodType::Unspecified => "",
            StandardMethodType::Create => "Create",
            StandardMethodType::Get => "Get",
            StandardMethodType::BatchGet => "BatchGet",
            StandardMethodType::Update => "Update",
            StandardMethodType::Delete => "Delete",
            StandardMethodType::List => "List",
        }
    }

    /// Whether the method name is formed from the plural resource name.
    fn uses_plural(&self) -> bool {
        matches!(self, StandardMethodType::BatchGet | StandardMethodType::List)
    }
}

impl fmt::Display for StandardMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandardMethodType::Unspecified => f.write_str("unspecified"),
            other => f.write_str(other.verb()),
        }
    }
}

// ── Comment styles ──

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommentStyle {
    /// Only the first line.
    FirstLine,
    /// The full text, newlines preserved.
    #[default]
    Multiline,
    /// The full text with newlines replaced by spaces.
    SingleLine,
}

impl FromStr for CommentStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "first-line" => Ok(CommentStyle::FirstLine),
            "multiline" => Ok(CommentStyle::Multiline),
            "single-line" => Ok(CommentStyle::SingleLine),
            other => Err(format!("unknown comment style: {other}")),
        }
    }
}

// ── Schema ──

/// A descriptor pool plus everything derived from it at resolution time:
/// documentation per symbol, standard method types and resource messages.
///
/// Immutable once built; share it behind an `Arc`.
pub struct Schema {
    pool: DescriptorPool,
    data: SchemaData,
    service_set: HashSet<String>,
    comments: HashMap<String, String>,
    resources: HashMap<String, MessageDescriptor>,
    standard_methods: HashMap<String, StandardMethodType>,
    method_resources: HashMap<String, MessageDescriptor>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("pool", &self.pool)
            .field("service_set", &self.data.service_set)
            .finish()
    }
}

impl Schema {
    pub fn new(data: SchemaData) -> Result<Self> {
        let pool = DescriptorPool::new(data.files.clone())?;
        let service_set = data.service_set.iter().cloned().collect();

        let mut schema = Self {
            comments: extract_comments(&pool),
            resources: index_resources(&pool),
            pool,
            data,
            service_set,
            standard_methods: HashMap::new(),
            method_resources: HashMap::new(),
        };
        schema
            .build_standard_method_types()
            .map_err(|e| Error::Internal(format!("building standard method types: {}", e.message())))?;
        schema
            .augment_method_comments()
            .map_err(|e| Error::Internal(format!("augmenting method comments: {}", e.message())))?;
        schema.resolve_comment_overrides()?;

        debug!(
            files = schema.data.files.len(),
            services = schema.service_set.len(),
            standard_methods = schema.standard_methods.len(),
            "schema built"
        );
        Ok(schema)
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// The raw data the schema was built from.
    pub fn data(&self) -> &SchemaData {
        &self.data
    }

    /// Services in the allow-list, in file declaration order.
    pub fn services(&self) -> impl Iterator<Item = ServiceDescriptor> + '_ {
        self.pool
            .services()
            .filter(|service| self.service_set.contains(service.full_name()))
    }

    pub fn has_service(&self, full_name: &str) -> bool {
        self.service_set.contains(full_name)
    }

    /// The documentation of a symbol, or an empty string.
    pub fn comment(&self, full_name: &str, style: CommentStyle) -> String {
        let Some(comment) = self.comments.get(full_name) else {
            return String::new();
        };
        match style {
            CommentStyle::FirstLine => comment.lines().next().unwrap_or_default().to_string(),
            CommentStyle::Multiline => comment.clone(),
            CommentStyle::SingleLine => comment.replace('\n', " "),
        }
    }

    pub fn find(&self, full_name: &str) -> Option<Descriptor> {
        self.pool.find(full_name)
    }

    pub fn find_message(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.pool.get_message_by_name(full_name)
    }

    pub fn find_method(&self, full_name: &str) -> Option<MethodDescriptor> {
        self.pool.get_method_by_name(full_name)
    }

    pub fn find_service(&self, full_name: &str) -> Option<ServiceDescriptor> {
        self.pool.get_service_by_name(full_name)
    }

    pub fn standard_method_type(&self, method_full_name: &str) -> StandardMethodType {
        self.standard_methods
            .get(method_full_name)
            .copied()
            .unwrap_or_default()
    }

    /// The resource message a standard method operates on.
    pub fn resource_message(&self, method_full_name: &str) -> Option<&MessageDescriptor> {
        self.method_resources.get(method_full_name)
    }

    pub fn resource_descriptor(&self, resource_type: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(resource_type)?.resource()
    }

    fn build_standard_method_types(&mut self) -> Result<()> {
        let methods: Vec<MethodDescriptor> = self
            .pool
            .services()
            .flat_map(|service| service.methods().collect::<Vec<_>>())
            .collect();

        for method in methods {
            let Some(annotation) = method.standard_method() else {
                continue;
            };
            let method_name = method.full_name();
            if annotation.resource.is_empty() {
                return Err(Error::Internal(format!(
                    "method {method_name} has incomplete standard method annotation"
                )));
            }
            let resource_message = self.resources.get(&annotation.resource).cloned().ok_or_else(|| {
                Error::Internal(format!(
                    "could not find resource descriptor {} for method {method_name}",
                    annotation.resource
                ))
            })?;
            let resource = resource_message.resource().cloned().unwrap_or_default();
            if resource.singular.is_empty() || resource.plural.is_empty() {
                return Err(Error::Internal(format!(
                    "resource descriptor {} is missing singular or plural values",
                    annotation.resource
                )));
            }

            let singular = to_pascal_case(&resource.singular);
            let plural = to_pascal_case(&resource.plural);
            let method_type = StandardMethodType::ALL
                .into_iter()
                .find(|candidate| {
                    let noun = if candidate.uses_plural() { &plural } else { &singular };
                    method.name() == format!("{}{noun}", candidate.verb())
                })
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "method {method_name} has standard annotation but does not match any of the standard method types"
                    ))
                })?;

            self.method_resources
                .insert(method_name.to_string(), resource_message);
            self.standard_methods.insert(method_name.to_string(), method_type);
        }
        Ok(())
    }

    fn augment_method_comments(&mut self) -> Result<()> {
        let methods: Vec<MethodDescriptor> = self
            .pool
            .services()
            .flat_map(|service| service.methods().collect::<Vec<_>>())
            .collect();
        let mut seen_inputs = HashSet::new();

        for method in methods {
            let method_name = method.full_name();
            if self
                .comments
                .get(method_name)
                .is_some_and(|comment| COMMENT_OVERRIDE.is_match(comment))
            {
                continue;
            }

            let input = method.input();
            let options = input.options().clone();
            let method_type = self.standard_method_type(method_name);
            let first_visit = seen_inputs.insert(input.full_name().to_string());
            let mut extras = Vec::new();

            if first_visit {
                self.add_parent_wildcard_hint(&input);
            }

            if let Some(filtering) = options.filtering.as_ref().filter(|f| !f.paths.is_empty()) {
                let resource = self.method_resources.get(method_name).cloned();
                extras.push(aip::filtering_doc(resource.as_ref(), &filtering.paths));
                if first_visit {
                    let paths = if method_type == StandardMethodType::Unspecified {
                        filtering.paths.clone()
                    } else {
                        let resource = resource.ok_or_else(|| {
                            Error::Internal(format!(
                                "could not find resource message descriptor for method {method_name}"
                            ))
                        })?;
                        aip::filterable_paths(&resource, &filtering.paths)?
                    };
                    self.set_field_comment(&input, "filter", format!("Filter by: {}", paths.join(", ")));
                }
            }

            if let Some(ordering) = options.ordering.as_ref().filter(|o| !o.paths.is_empty()) {
                extras.push(aip::ordering_doc(&ordering.paths, &ordering.default));
                if first_visit {
                    let text = format!(
                        "Order by: {} (default: {})",
                        ordering.paths.join(", "),
                        ordering.default
                    );
                    self.set_field_comment(&input, "order_by", text);
                }
            }

            if let Some(pagination) = options.pagination.as_ref() {
                extras.push(aip::pagination_doc(pagination.default_page_size));
                if first_visit {
                    let text = format!("Page size (default: {})", pagination.default_page_size);
                    self.set_field_comment(&input, "page_size", text);
                }
            }

            if let Some(update) = options.update.as_ref().filter(|u| !u.paths.is_empty()) {
                extras.push(aip::update_doc(&update.paths));
                if first_visit {
                    let text = format!("Updatable fields: {}", update.paths.join(", "));
                    self.set_field_comment(&input, "update_mask", text);
                }
            }

            let existing = self.comments.get(method_name).cloned().unwrap_or_default();
            let new_extras: Vec<String> = extras
                .into_iter()
                .filter(|extra| !existing.contains(extra.as_str()))
                .collect();
            if new_extras.is_empty() {
                continue;
            }
            let augmented = if existing.is_empty() {
                new_extras.join("\n\n")
            } else {
                format!("{existing}\n\n{}", new_extras.join("\n\n"))
            };
            self.comments.insert(method_name.to_string(), augmented);
        }
        Ok(())
    }

    fn add_parent_wildcard_hint(&mut self, input: &MessageDescriptor) {
        let Some(parent) = input.field_by_name("parent") else {
            return;
        };
        let Some(reference) = parent.resource_reference() else {
            return;
        };
        if reference.r#type.is_empty() {
            return;
        }
        let Some(pattern) = self
            .resource_descriptor(&reference.r#type)
            .and_then(|resource| resource.pattern.first())
        else {
            return;
        };
        let hint = format!(
            "Wildcard '-' can be used for any segment: e.g. {}",
            aip::wildcard_pattern(pattern)
        );
        let comment = self.comments.entry(parent.full_name().to_string()).or_default();
        if comment.is_empty() {
            *comment = hint;
        } else {
            comment.push('\n');
            comment.push_str(&hint);
        }
    }

    fn set_field_comment(&mut self, message: &MessageDescriptor, field: &str, text: String) {
        if let Some(field) = message.field_by_name(field) {
            self.comments.insert(field.full_name().to_string(), text);
        }
    }

    /// Replaces every `@comment(target)` directive with the target's final
    /// documentation. Targets are resolved first, so chains work; cycles and
    /// unknown targets fail the whole schema.
    fn resolve_comment_overrides(&mut self) -> Result<()> {
        let mut owners: Vec<String> = self
            .comments
            .iter()
            .filter(|(_, comment)| COMMENT_OVERRIDE.is_match(comment))
            .map(|(name, _)| name.clone())
            .collect();
        owners.sort();
        let mut stack = Vec::new();
        for owner in owners {
            self.resolve_override(&owner, &mut stack)?;
        }
        Ok(())
    }

    fn resolve_override(&mut self, owner: &str, stack: &mut Vec<String>) -> Result<String> {
        let comment = self.comments.get(owner).cloned().unwrap_or_default();
        if !COMMENT_OVERRIDE.is_match(&comment) {
            return Ok(comment);
        }
        if stack.iter().any(|name| name == owner) {
            return Err(Error::Internal(format!(
                "@comment cycle: {} -> {owner}",
                stack.join(" -> ")
            )));
        }
        stack.push(owner.to_string());

        let mut resolved = String::with_capacity(comment.len());
        let mut last = 0;
        for captures in COMMENT_OVERRIDE.captures_iter(&comment) {
            let (Some(directive), Some(target)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let target = target.as_str().trim();
            if !self.comments.contains_key(target) {
                return Err(Error::Internal(format!(
                    "@comment({target}) in {owner}: target not found"
                )));
            }
            let replacement = self.resolve_override(target, stack)?;
            let target_type = self.standard_method_type(target);
            if target_type != StandardMethodType::Unspecified {
                self.standard_methods.insert(owner.to_string(), target_type);
            }
            resolved.push_str(&comment[last..directive.start()]);
            resolved.push_str(&replacement);
            last = directive.end();
        }
        resolved.push_str(&comment[last..]);

        stack.pop();
        self.comments.insert(owner.to_string(), resolved.clone());
        Ok(resolved)
    }
}

fn extract_comments(pool: &DescriptorPool) -> HashMap<String, String> {
    let mut comments = HashMap::new();
    let mut store = |name: &str, raw: Option<&Comments>| {
        if let Some(text) = raw.and_then(normalize_comment) {
            comments.insert(name.to_string(), text);
        }
    };

    for (file, raw) in pool.files_with_comments() {
        if !file.package().is_empty() {
            store(file.package(), raw);
        }
    }
    for message in pool.messages() {
        store(message.full_name(), message.comments());
        for field in message.fields() {
            store(field.full_name(), field.comments());
        }
    }
    for service in pool.services() {
        store(service.full_name(), service.comments());
        for method in service.methods() {
            store(method.full_name(), method.comments());
        }
    }
    for e in pool.enums() {
        store(e.full_name(), e.comments());
        for value in e.values() {
            store(value.full_name(), value.comments());
        }
    }

    for e in pool.enums() {
        let names: Vec<String> = e.values().map(|v| v.name().to_string()).collect();
        let values_doc = format!("Values: {}", names.join(", "));
        let doc = comments.entry(e.full_name().to_string()).or_default();
        if doc.is_empty() {
            *doc = values_doc;
        } else {
            doc.push('\n');
            doc.push_str(&values_doc);
        }
    }
    comments
}

/// Leading comment, falling back to trailing. Every line is trimmed.
fn normalize_comment(comments: &Comments) -> Option<String> {
    let leading = trim_comment_lines(&comments.leading);
    let text = if leading.is_empty() {
        trim_comment_lines(&comments.trailing)
    } else {
        leading
    };
    (!text.is_empty()).then_some(text)
}

fn trim_comment_lines(raw: &str) -> String {
    raw.split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn index_resources(pool: &DescriptorPool) -> HashMap<String, MessageDescriptor> {
    let mut resources = HashMap::new();
    for message in pool.messages() {
        if let Some(resource) = message.resource() {
            if !resource.r#type.is_empty() {
                resources.insert(resource.r#type.clone(), message.clone());
            }
        }
    }
    resources
}

/// `book` → `Book`, `shelf_item` → `ShelfItem`, `bookShelf` → `BookShelf`.
fn to_pascal_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn pascal_case_handles_separators() {
        assert_eq!(to_pascal_case("book"), "Book");
        assert_eq!(to_pascal_case("shelf_item"), "ShelfItem");
        assert_eq!(to_pascal_case("bookShelf"), "BookShelf");
        assert_eq!(to_pascal_case("library-cards"), "LibraryCards");
    }

    #[test]
    fn trims_every_comment_line() {
        let comments = Comments {
            leading: " First line.  \n   Second line.\n".into(),
            trailing: String::new(),
        };
        assert_eq!(normalize_comment(&comments).unwrap(), "First line.\nSecond line.");
        let trailing_only = Comments {
            leading: "  \n".into(),
            trailing: " Trailing.\n".into(),
        };
        assert_eq!(normalize_comment(&trailing_only).unwrap(), "Trailing.");
    }

    #[test]
    fn classifies_standard_methods() {
        let schema = testing::library_schema();
        let expect = [
            ("library.v1.LibraryService.CreateBook", StandardMethodType::Create),
            ("library.v1.LibraryService.GetBook", StandardMethodType::Get),
            ("library.v1.LibraryService.UpdateBook", StandardMethodType::Update),
            ("library.v1.LibraryService.ListBooks", StandardMethodType::List),
            ("library.v1.LibraryService.DeleteBook", StandardMethodType::Delete),
        ];
        for (method, kind) in expect {
            assert_eq!(schema.standard_method_type(method), kind, "{method}");
        }
        assert_eq!(
            schema
                .resource_message("library.v1.LibraryService.GetBook")
                .map(|m| m.full_name().to_string()),
            Some("library.v1.Book".to_string())
        );
    }

    #[test]
    fn comment_override_copies_text_and_method_type() {
        let schema = testing::library_schema();
        let summarize = "library.v1.LibraryService.SummarizeBook";
        assert_eq!(
            schema.comment(summarize, CommentStyle::Multiline),
            schema.comment("library.v1.LibraryService.GetBook", CommentStyle::Multiline)
        );
        assert_eq!(schema.standard_method_type(summarize), StandardMethodType::Get);
    }

    #[test]
    fn enum_comments_list_values() {
        let schema = testing::library_schema();
        assert_eq!(
            schema.comment("library.v1.Genre", CommentStyle::Multiline),
            "Literary genre.\nValues: GENRE_UNSPECIFIED, FICTION, SCIENCE_FICTION, HISTORY"
        );
    }

    #[test]
    fn comment_styles() {
        let schema = testing::library_schema();
        let method = "library.v1.LibraryService.ListBooks";
        let full = schema.comment(method, CommentStyle::Multiline);
        assert!(full.starts_with("Lists books on a shelf.\nResults are paginated."));
        assert_eq!(schema.comment(method, CommentStyle::FirstLine), "Lists books on a shelf.");
        assert!(!schema.comment(method, CommentStyle::SingleLine).contains('\n'));
        assert_eq!(schema.comment("does.not.Exist", CommentStyle::Multiline), "");
    }

    #[test]
    fn list_method_is_augmented_with_aip_sections() {
        let schema = testing::library_schema();
        let doc = schema.comment("library.v1.LibraryService.ListBooks", CommentStyle::Multiline);
        assert!(doc.contains("**Filtering (AIP-160)**"));
        assert!(doc.contains("**Ordering (AIP-132)**\nOrder by: title, publish_time\nDefault: title"));
        assert!(doc.contains("**Pagination (AIP-158)**\nDefault page size: 25"));

        assert_eq!(
            schema.comment("library.v1.ListBooksRequest.filter", CommentStyle::Multiline),
            "Filter by: title, genre, publish_time, published, author.display_name"
        );
        assert_eq!(
            schema.comment("library.v1.ListBooksRequest.order_by", CommentStyle::Multiline),
            "Order by: title, publish_time (default: title)"
        );
        assert_eq!(
            schema.comment("library.v1.ListBooksRequest.page_size", CommentStyle::Multiline),
            "Page size (default: 25)"
        );
        assert!(schema
            .comment("library.v1.ListBooksRequest.parent", CommentStyle::Multiline)
            .ends_with("Wildcard '-' can be used for any segment: e.g. shelves/-"));
    }

    #[test]
    fn update_method_documents_mask() {
        let schema = testing::library_schema();
        let doc = schema.comment("library.v1.LibraryService.UpdateBook", CommentStyle::Multiline);
        assert!(doc.starts_with("Updates a book.\n\n**Field Mask (AIP-134)**"));
        assert_eq!(
            schema.comment("library.v1.UpdateBookRequest.update_mask", CommentStyle::Multiline),
            "Updatable fields: title, author, tags"
        );
    }

    #[test]
    fn only_allowed_services_are_listed() {
        let mut data = testing::library_data();
        data.service_set = vec!["library.v1.ShelfService".to_string()];
        let schema = Schema::new(data).unwrap();
        let names: Vec<String> = schema.services().map(|s| s.full_name().to_string()).collect();
        assert_eq!(names, ["library.v1.ShelfService"]);
    }

    #[test]
    fn mismatched_standard_method_name_fails_resolution() {
        let mut data = testing::library_data();
        testing::rename_method(&mut data, "library.v1.LibraryService", "GetBook", "FetchBook");
        let err = Schema::new(data).unwrap_err();
        assert!(err.to_string().contains("does not match any of the standard method types"));
    }

    #[test]
    fn package_comment_is_stored_under_the_package() {
        let schema = testing::library_schema();
        assert_eq!(
            schema.comment("library.v1", CommentStyle::Multiline),
            "Shelves of books and the people who write them."
        );
    }

    #[test]
    fn comment_override_can_target_a_package() {
        let mut data = testing::library_data();
        testing::set_method_comment(&mut data, testing::LIBRARY_SERVICE, "SummarizeBook", "@comment(library.v1)");
        let schema = Schema::new(data).unwrap();
        assert_eq!(
            schema.comment("library.v1.LibraryService.SummarizeBook", CommentStyle::FirstLine),
            "Shelves of books and the people who write them."
        );
    }

    #[test]
    fn unknown_comment_target_fails_resolution() {
        let mut data = testing::library_data();
        testing::set_method_comment(
            &mut data,
            "library.v1.LibraryService",
            "SummarizeBook",
            "@comment(library.v1.LibraryService.Missing)",
        );
        let err = Schema::new(data).unwrap_err();
        assert!(err.to_string().contains("target not found"));
    }
}
