//! An in-memory `library.v1` schema used by tests across the workspace.
//!
//! The fixture mirrors what `protoc --include_source_info` would emit for a
//! small annotated library API plus the well-known types it imports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pb_core::Result;
use prost::Message as _;

use crate::descriptor::{
    field_type, label, path, source_code_info::Location, DescriptorProto, EnumDescriptorProto,
    EnumValueDescriptorProto, FieldBehavior, FieldDescriptorProto, FieldOptions,
    FileDescriptorProto, FileDescriptorSet, FilteringOptions, MessageOptions,
    MethodDescriptorProto, MethodOptions, OrderingOptions, PaginationOptions, ResourceDescriptor,
    ResourceReference, ServiceDescriptorProto, SourceCodeInfo, StandardMethod, UpdateOptions,
    IDEMPOTENCY_NO_SIDE_EFFECTS,
};
use crate::pool::DescriptorPool;
use crate::schema::Schema;
use crate::source::{SchemaData, SchemaSource};

pub const LIBRARY_SERVICE: &str = "library.v1.LibraryService";
pub const SHELF_SERVICE: &str = "library.v1.ShelfService";
pub const BOOK_RESOURCE: &str = "library.example.com/Book";
pub const SHELF_RESOURCE: &str = "library.example.com/Shelf";

// ── Builders ──

fn field(name: &str, number: i32, kind: i32) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label::OPTIONAL),
        r#type: Some(kind),
        ..Default::default()
    }
}

fn typed(name: &str, number: i32, kind: i32, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(format!(".{type_name}")),
        ..field(name, number, kind)
    }
}

fn message_field(name: &str, number: i32, type_name: &str) -> FieldDescriptorProto {
    typed(name, number, field_type::MESSAGE, type_name)
}

fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(label::REPEATED);
    field
}

fn behaves(mut field: FieldDescriptorProto, behaviors: &[FieldBehavior]) -> FieldDescriptorProto {
    let options = field.options.get_or_insert_with(FieldOptions::default);
    options.field_behavior = behaviors.iter().map(|b| *b as i32).collect();
    field
}

fn references(mut field: FieldDescriptorProto, resource_type: &str) -> FieldDescriptorProto {
    let options = field.options.get_or_insert_with(FieldOptions::default);
    options.resource_reference = Some(ResourceReference {
        r#type: resource_type.to_string(),
        child_type: String::new(),
    });
    field
}

fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

fn with_options(mut message: DescriptorProto, options: MessageOptions) -> DescriptorProto {
    message.options = Some(options);
    message
}

fn resource(resource_type: &str, pattern: &str, singular: &str, plural: &str) -> MessageOptions {
    MessageOptions {
        resource: Some(ResourceDescriptor {
            r#type: resource_type.to_string(),
            pattern: vec![pattern.to_string()],
            name_field: "name".to_string(),
            plural: plural.to_string(),
            singular: singular.to_string(),
        }),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str, standard: Option<&str>) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(format!(".library.v1.{input}")),
        output_type: Some(format!(".library.v1.{output}")),
        options: Some(MethodOptions {
            idempotency_level: None,
            standard_method: standard.map(|resource| StandardMethod {
                resource: resource.to_string(),
            }),
        }),
        ..Default::default()
    }
}

fn no_side_effects(mut method: MethodDescriptorProto) -> MethodDescriptorProto {
    if let Some(options) = method.options.as_mut() {
        options.idempotency_level = Some(IDEMPOTENCY_NO_SIDE_EFFECTS);
    }
    method
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// Collects source locations the way protoc formats them: every comment line
/// keeps its leading space and ends with a newline.
#[derive(Default)]
struct Docs {
    locations: Vec<Location>,
}

impl Docs {
    fn leading(&mut self, path: &[i32], text: &str) -> &mut Self {
        self.locations.push(Location {
            path: path.to_vec(),
            leading_comments: Some(protoc_comment(text)),
            trailing_comments: None,
        });
        self
    }

    fn trailing(&mut self, path: &[i32], text: &str) -> &mut Self {
        self.locations.push(Location {
            path: path.to_vec(),
            leading_comments: None,
            trailing_comments: Some(protoc_comment(text)),
        });
        self
    }

    fn finish(self) -> Option<SourceCodeInfo> {
        Some(SourceCodeInfo {
            location: self.locations,
        })
    }
}

fn protoc_comment(text: &str) -> String {
    text.lines().map(|line| format!(" {line}\n")).collect()
}

fn msg(i: i32) -> [i32; 2] {
    [path::FILE_MESSAGE, i]
}

fn fld(message: i32, i: i32) -> [i32; 4] {
    [path::FILE_MESSAGE, message, path::MESSAGE_FIELD, i]
}

fn rpc(service: i32, i: i32) -> [i32; 4] {
    [path::FILE_SERVICE, service, path::SERVICE_METHOD, i]
}

fn file(
    name: &str,
    package: &str,
    dependency: &[&str],
    messages: Vec<DescriptorProto>,
    docs: Docs,
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(package.to_string()),
        dependency: strings(dependency),
        message_type: messages,
        source_code_info: docs.finish(),
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

// ── Well-known types ──

fn well_known_files() -> Vec<FileDescriptorProto> {
    let seconds_nanos = || {
        vec![
            field("seconds", 1, field_type::INT64),
            field("nanos", 2, field_type::INT32),
        ]
    };

    let mut timestamp_docs = Docs::default();
    timestamp_docs.leading(&msg(0), "A point in time independent of any time zone.");
    let mut duration_docs = Docs::default();
    duration_docs.leading(&msg(0), "A signed, fixed-length span of time.");
    let mut mask_docs = Docs::default();
    mask_docs.leading(&msg(0), "A set of symbolic field paths.");
    let mut date_docs = Docs::default();
    date_docs.leading(&msg(0), "A whole or partial calendar date.");
    let mut time_docs = Docs::default();
    time_docs.leading(&msg(0), "A time of day.");

    vec![
        file(
            "google/protobuf/timestamp.proto",
            "google.protobuf",
            &[],
            vec![message("Timestamp", seconds_nanos())],
            timestamp_docs,
        ),
        file(
            "google/protobuf/duration.proto",
            "google.protobuf",
            &[],
            vec![message("Duration", seconds_nanos())],
            duration_docs,
        ),
        file(
            "google/protobuf/field_mask.proto",
            "google.protobuf",
            &[],
            vec![message(
                "FieldMask",
                vec![repeated(field("paths", 1, field_type::STRING))],
            )],
            mask_docs,
        ),
        file(
            "google/type/date.proto",
            "google.type",
            &[],
            vec![message(
                "Date",
                vec![
                    field("year", 1, field_type::INT32),
                    field("month", 2, field_type::INT32),
                    field("day", 3, field_type::INT32),
                ],
            )],
            date_docs,
        ),
        file(
            "google/type/timeofday.proto",
            "google.type",
            &[],
            vec![message(
                "TimeOfDay",
                vec![
                    field("hours", 1, field_type::INT32),
                    field("minutes", 2, field_type::INT32),
                    field("seconds", 3, field_type::INT32),
                    field("nanos", 4, field_type::INT32),
                ],
            )],
            time_docs,
        ),
    ]
}

// ── library.v1 ──

fn library_file() -> FileDescriptorProto {
    use FieldBehavior::*;

    let author = message(
        "Author",
        vec![
            behaves(field("name", 1, field_type::STRING), &[Identifier]),
            field("display_name", 2, field_type::STRING),
            field("email", 3, field_type::STRING),
        ],
    );

    let mut attributes_entry = message(
        "AttributesEntry",
        vec![
            field("key", 1, field_type::STRING),
            field("value", 2, field_type::STRING),
        ],
    );
    attributes_entry.options = Some(MessageOptions {
        map_entry: Some(true),
        ..Default::default()
    });

    let mut book = with_options(
        message(
            "Book",
            vec![
                behaves(field("name", 1, field_type::STRING), &[Identifier]),
                behaves(field("title", 2, field_type::STRING), &[Required]),
                message_field("author", 3, "library.v1.Author"),
                typed("genre", 4, field_type::ENUM, "library.v1.Genre"),
                repeated(field("tags", 5, field_type::STRING)),
                message_field("publish_time", 6, "google.protobuf.Timestamp"),
                behaves(message_field("create_time", 7, "google.protobuf.Timestamp"), &[OutputOnly]),
                behaves(field("isbn", 8, field_type::STRING), &[Immutable]),
                field("page_count", 9, field_type::INT32),
                message_field("read_duration", 10, "google.protobuf.Duration"),
                repeated(message_field("attributes", 11, "library.v1.Book.AttributesEntry")),
                field("published", 12, field_type::BOOL),
                message_field("release_date", 13, "google.type.Date"),
                repeated(message_field("reviews", 14, "library.v1.Review")),
                field("rating", 15, field_type::DOUBLE),
                field("cover", 16, field_type::BYTES),
                behaves(field("internal_note", 17, field_type::STRING), &[InputOnly]),
            ],
        ),
        resource(BOOK_RESOURCE, "shelves/{shelf}/books/{book}", "book", "books"),
    );
    book.nested_type.push(attributes_entry);

    let shelf = with_options(
        message(
            "Shelf",
            vec![
                behaves(field("name", 1, field_type::STRING), &[Identifier]),
                field("theme", 2, field_type::STRING),
            ],
        ),
        resource(SHELF_RESOURCE, "shelves/{shelf}", "shelf", "shelves"),
    );

    let review = message(
        "Review",
        vec![
            field("rating", 1, field_type::INT32),
            field("text", 2, field_type::STRING),
        ],
    );

    let create_request = message(
        "CreateBookRequest",
        vec![
            behaves(
                references(field("parent", 1, field_type::STRING), SHELF_RESOURCE),
                &[Required],
            ),
            behaves(message_field("book", 2, "library.v1.Book"), &[Required]),
        ],
    );
    let get_request = message(
        "GetBookRequest",
        vec![behaves(
            references(field("name", 1, field_type::STRING), BOOK_RESOURCE),
            &[Required],
        )],
    );
    let update_request = with_options(
        message(
            "UpdateBookRequest",
            vec![
                behaves(message_field("book", 1, "library.v1.Book"), &[Required]),
                message_field("update_mask", 2, "google.protobuf.FieldMask"),
            ],
        ),
        MessageOptions {
            update: Some(UpdateOptions {
                paths: strings(&["title", "author", "tags"]),
            }),
            ..Default::default()
        },
    );
    let list_request = with_options(
        message(
            "ListBooksRequest",
            vec![
                references(field("parent", 1, field_type::STRING), SHELF_RESOURCE),
                field("page_size", 2, field_type::INT32),
                field("page_token", 3, field_type::STRING),
                field("filter", 4, field_type::STRING),
                field("order_by", 5, field_type::STRING),
            ],
        ),
        MessageOptions {
            filtering: Some(FilteringOptions {
                paths: strings(&["title", "genre", "published", "publish_time", "author.display_name"]),
            }),
            ordering: Some(OrderingOptions {
                paths: strings(&["title", "publish_time"]),
                default: "title".to_string(),
            }),
            pagination: Some(PaginationOptions { default_page_size: 25 }),
            ..Default::default()
        },
    );
    let list_response = message(
        "ListBooksResponse",
        vec![
            repeated(message_field("books", 1, "library.v1.Book")),
            field("next_page_token", 2, field_type::STRING),
        ],
    );
    let delete_request = message(
        "DeleteBookRequest",
        vec![behaves(
            references(field("name", 1, field_type::STRING), BOOK_RESOURCE),
            &[Required],
        )],
    );
    let node = message(
        "Node",
        vec![
            field("value", 1, field_type::STRING),
            message_field("child", 2, "library.v1.Node"),
        ],
    );
    let get_shelf_request = message(
        "GetShelfRequest",
        vec![behaves(
            references(field("name", 1, field_type::STRING), SHELF_RESOURCE),
            &[Required],
        )],
    );

    let genre = EnumDescriptorProto {
        name: Some("Genre".to_string()),
        value: ["GENRE_UNSPECIFIED", "FICTION", "SCIENCE_FICTION", "HISTORY"]
            .iter()
            .enumerate()
            .map(|(number, name)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(number as i32),
            })
            .collect(),
    };

    let library_service = ServiceDescriptorProto {
        name: Some("LibraryService".to_string()),
        method: vec![
            method("CreateBook", "CreateBookRequest", "Book", Some(BOOK_RESOURCE)),
            no_side_effects(method("GetBook", "GetBookRequest", "Book", Some(BOOK_RESOURCE))),
            method("UpdateBook", "UpdateBookRequest", "Book", Some(BOOK_RESOURCE)),
            no_side_effects(method("ListBooks", "ListBooksRequest", "ListBooksResponse", Some(BOOK_RESOURCE))),
            method("DeleteBook", "DeleteBookRequest", "Book", Some(BOOK_RESOURCE)),
            method("SummarizeBook", "GetBookRequest", "Book", None),
        ],
    };
    let shelf_service = ServiceDescriptorProto {
        name: Some("ShelfService".to_string()),
        method: vec![no_side_effects(method(
            "GetShelf",
            "GetShelfRequest",
            "Shelf",
            Some(SHELF_RESOURCE),
        ))],
    };

    let mut docs = Docs::default();
    docs.leading(&[path::FILE_PACKAGE], "Shelves of books and the people who write them.")
        .leading(&msg(0), "A person who writes books.")
        .leading(&fld(0, 0), "Resource name of the author.")
        .leading(&fld(0, 1), "Name shown on covers.")
        .leading(&fld(0, 2), "Contact address.")
        .leading(&msg(1), "A book on a shelf.")
        .leading(&fld(1, 0), "Resource name of the book.")
        .leading(&fld(1, 1), "Title of the book.")
        .leading(&fld(1, 2), "Main author.")
        .leading(&fld(1, 3), "Genre of the book.")
        .leading(&fld(1, 4), "Free-form labels.")
        .leading(&fld(1, 5), "When the book was published.")
        .leading(&fld(1, 6), "When the record was created.")
        .trailing(&fld(1, 7), "ISBN-13.")
        .leading(&fld(1, 8), "Number of pages.")
        .leading(&fld(1, 9), "Typical reading time.")
        .leading(&fld(1, 10), "Extra attributes.")
        .leading(&fld(1, 11), "Whether the book is published.")
        .leading(&fld(1, 13), "Reader reviews.")
        .leading(&fld(1, 16), "Notes never returned to readers.")
        .leading(&msg(2), "A shelf of books.")
        .leading(&msg(3), "A reader review.")
        .leading(&msg(4), "Request for CreateBook.")
        .leading(&fld(4, 0), "Shelf to create the book on.")
        .leading(&fld(4, 1), "The book to create.")
        .leading(&fld(5, 0), "Name of the book to fetch.")
        .leading(&fld(6, 0), "The book to update.")
        .leading(&fld(7, 0), "Shelf to list books from.")
        .leading(&msg(10), "A recursive node.")
        .leading(&[path::FILE_ENUM, 0], "Literary genre.")
        .leading(&[path::FILE_ENUM, 0, path::ENUM_VALUE, 1], "Made-up stories.")
        .leading(&[path::FILE_SERVICE, 0], "Manages books in the library.")
        .leading(&rpc(0, 0), "Creates a book.")
        .leading(&rpc(0, 1), "Gets a book.")
        .leading(&rpc(0, 2), "Updates a book.")
        .leading(&rpc(0, 3), "Lists books on a shelf.\nResults are paginated.")
        .leading(&rpc(0, 4), "Deletes a book.")
        .leading(&rpc(0, 5), "@comment(library.v1.LibraryService.GetBook)")
        .leading(&[path::FILE_SERVICE, 1], "Manages shelves.")
        .leading(&rpc(1, 0), "Gets a shelf.");

    let mut library = file(
        "library/v1/library.proto",
        "library.v1",
        &[
            "google/protobuf/timestamp.proto",
            "google/protobuf/duration.proto",
            "google/protobuf/field_mask.proto",
            "google/type/date.proto",
        ],
        vec![
            author,
            book,
            shelf,
            review,
            create_request,
            get_request,
            update_request,
            list_request,
            list_response,
            delete_request,
            node,
            get_shelf_request,
        ],
        docs,
    );
    library.enum_type.push(genre);
    library.service = vec![library_service, shelf_service];
    library
}

// ── Public fixture ──

/// Every file of the fixture, dependencies first.
pub fn library_files() -> Vec<FileDescriptorProto> {
    let mut files = well_known_files();
    files.push(library_file());
    files
}

pub fn library_pool() -> DescriptorPool {
    DescriptorPool::new(library_files()).expect("library fixture must build")
}

/// Raw schema data exposing both library services.
pub fn library_data() -> SchemaData {
    SchemaData {
        files: library_files(),
        service_set: strings(&[LIBRARY_SERVICE, SHELF_SERVICE]),
    }
}

pub fn library_schema() -> Arc<Schema> {
    Arc::new(Schema::new(library_data()).expect("library schema must resolve"))
}

/// The fixture serialized as a `FileDescriptorSet`.
pub fn library_descriptor_set_bytes() -> Vec<u8> {
    FileDescriptorSet {
        file: library_files(),
    }
    .encode_to_vec()
}

fn method_proto<'a>(
    data: &'a mut SchemaData,
    service: &str,
    method: &str,
) -> Option<(&'a mut MethodDescriptorProto, usize, usize)> {
    for file in data.files.iter_mut() {
        let package = file.package().to_string();
        for (s, proto) in file.service.iter_mut().enumerate() {
            if format!("{package}.{}", proto.name()) != service {
                continue;
            }
            let position = proto.method.iter().position(|m| m.name() == method)?;
            return Some((&mut proto.method[position], s, position));
        }
    }
    None
}

/// Renames a method in place, keeping its options and comments.
pub fn rename_method(data: &mut SchemaData, service: &str, method: &str, new_name: &str) {
    if let Some((proto, _, _)) = method_proto(data, service, method) {
        proto.name = Some(new_name.to_string());
    }
}

/// Replaces the leading comment of a method.
pub fn set_method_comment(data: &mut SchemaData, service: &str, method: &str, comment: &str) {
    let Some((_, s, m)) = method_proto(data, service, method) else {
        return;
    };
    let target = rpc(s as i32, m as i32).to_vec();
    for file in data.files.iter_mut() {
        let owns_service = file
            .service
            .iter()
            .any(|proto| format!("{}.{}", file.package(), proto.name()) == service);
        if !owns_service {
            continue;
        }
        let info = file.source_code_info.get_or_insert_with(SourceCodeInfo::default);
        info.location.retain(|location| location.path != target);
        info.location.push(Location {
            path: target.clone(),
            leading_comments: Some(protoc_comment(comment)),
            trailing_comments: None,
        });
    }
}

/// A schema source serving fixed data and counting fetches.
pub struct StaticSource {
    key: String,
    data: SchemaData,
    fetches: AtomicUsize,
}

impl StaticSource {
    pub fn new(key: &str, data: SchemaData) -> Self {
        Self {
            key: key.to_string(),
            data,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn library(key: &str) -> Self {
        Self::new(key, library_data())
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for StaticSource {
    fn cache_key(&self) -> String {
        self.key.clone()
    }

    async fn fetch(&self) -> Result<SchemaData> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.clone())
    }
}
