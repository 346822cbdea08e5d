//! An immutable, queryable registry of protobuf descriptors.
//!
//! A [`DescriptorPool`] is built once from a set of `FileDescriptorProto`s.
//! Descriptor handles are cheap to clone: each holds the shared pool plus an
//! index into it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use pb_core::{Error, Result};
use prost::Message as _;

use crate::descriptor::{
    field_type, label, path, DescriptorProto, EnumDescriptorProto, FieldBehavior,
    FieldDescriptorProto, FieldOptions, FileDescriptorProto, FileDescriptorSet, MessageOptions,
    MethodOptions, ResourceDescriptor, ResourceReference, StandardMethod,
    IDEMPOTENCY_NO_SIDE_EFFECTS,
};

/// Raw comments attached to a declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Comments {
    pub leading: String,
    pub trailing: String,
}

#[derive(Clone)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    files: Vec<FileDescriptorProto>,
    file_comments: Vec<Option<Comments>>,
    messages: Vec<MessageEntry>,
    enums: Vec<EnumEntry>,
    services: Vec<ServiceEntry>,
    symbols: HashMap<String, Symbol>,
}

#[derive(Clone, Copy)]
enum Symbol {
    Message(usize),
    Enum(usize),
    Service(usize),
    Method(usize, usize),
    Field(usize, usize),
    EnumValue(usize, usize),
}

struct MessageEntry {
    name: String,
    full_name: String,
    file: usize,
    proto3: bool,
    fields: Vec<FieldEntry>,
    options: MessageOptions,
    comments: Option<Comments>,
}

struct FieldEntry {
    name: String,
    full_name: String,
    json_name: String,
    number: u32,
    label: i32,
    kind: KindIndex,
    options: FieldOptions,
    oneof_index: Option<i32>,
    comments: Option<Comments>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum KindIndex {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Bytes,
    Uint32,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
    Enum(usize),
    Message(usize),
}

struct EnumEntry {
    name: String,
    full_name: String,
    values: Vec<EnumValueEntry>,
    comments: Option<Comments>,
}

struct EnumValueEntry {
    name: String,
    full_name: String,
    number: i32,
    comments: Option<Comments>,
}

struct ServiceEntry {
    name: String,
    full_name: String,
    file: usize,
    methods: Vec<MethodEntry>,
    comments: Option<Comments>,
}

struct MethodEntry {
    name: String,
    full_name: String,
    input: usize,
    output: usize,
    options: MethodOptions,
    client_streaming: bool,
    server_streaming: bool,
    comments: Option<Comments>,
}

// ── Construction ──

struct PendingMessage {
    index: usize,
    proto: DescriptorProto,
    path: Vec<i32>,
}

struct Builder {
    files: Vec<FileDescriptorProto>,
    comments: Vec<HashMap<Vec<i32>, Comments>>,
    messages: Vec<MessageEntry>,
    enums: Vec<EnumEntry>,
    services: Vec<ServiceEntry>,
    symbols: HashMap<String, Symbol>,
    pending: Vec<PendingMessage>,
}

impl DescriptorPool {
    /// Builds a pool from file descriptors. Files may arrive in any order,
    /// but every dependency must be present.
    pub fn new(files: Vec<FileDescriptorProto>) -> Result<Self> {
        let files = order_by_dependency(files)?;
        let mut builder = Builder {
            comments: files.iter().map(index_comments).collect(),
            files,
            messages: Vec::new(),
            enums: Vec::new(),
            services: Vec::new(),
            symbols: HashMap::new(),
            pending: Vec::new(),
        };
        builder.declare_all()?;
        builder.resolve_fields()?;
        builder.resolve_services()?;

        let file_comments = builder.comments.iter().map(file_level_comments).collect();
        Ok(Self {
            inner: Arc::new(PoolInner {
                files: builder.files,
                file_comments,
                messages: builder.messages,
                enums: builder.enums,
                services: builder.services,
                symbols: builder.symbols,
            }),
        })
    }

    /// Decodes a serialized `FileDescriptorSet`.
    pub fn decode_file_descriptor_set(bytes: &[u8]) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::new(set.file)
    }

    pub fn files(&self) -> &[FileDescriptorProto] {
        &self.inner.files
    }

    /// Files paired with the comment on their `package` statement, or on
    /// `syntax` when the package carries none.
    pub fn files_with_comments(&self) -> impl Iterator<Item = (&FileDescriptorProto, Option<&Comments>)> + '_ {
        self.inner
            .files
            .iter()
            .zip(&self.inner.file_comments)
            .map(|(file, comments)| (file, comments.as_ref()))
    }

    pub fn find(&self, full_name: &str) -> Option<Descriptor> {
        let symbol = *self.inner.symbols.get(full_name.trim_start_matches('.'))?;
        Some(match symbol {
            Symbol::Message(index) => Descriptor::Message(self.message(index)),
            Symbol::Enum(index) => Descriptor::Enum(self.enum_at(index)),
            Symbol::Service(index) => Descriptor::Service(self.service(index)),
            Symbol::Method(service, index) => Descriptor::Method(MethodDescriptor {
                service: self.service(service),
                index,
            }),
            Symbol::Field(message, index) => Descriptor::Field(FieldDescriptor {
                message: self.message(message),
                index,
            }),
            Symbol::EnumValue(parent, index) => Descriptor::EnumValue(EnumValueDescriptor {
                parent: self.enum_at(parent),
                index,
            }),
        })
    }

    pub fn get_message_by_name(&self, full_name: &str) -> Option<MessageDescriptor> {
        match self.find(full_name)? {
            Descriptor::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn get_enum_by_name(&self, full_name: &str) -> Option<EnumDescriptor> {
        match self.find(full_name)? {
            Descriptor::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn get_service_by_name(&self, full_name: &str) -> Option<ServiceDescriptor> {
        match self.find(full_name)? {
            Descriptor::Service(service) => Some(service),
            _ => None,
        }
    }

    pub fn get_method_by_name(&self, full_name: &str) -> Option<MethodDescriptor> {
        match self.find(full_name)? {
            Descriptor::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Every message in the pool, nested ones included, in declaration order.
    pub fn messages(&self) -> impl Iterator<Item = MessageDescriptor> + '_ {
        (0..self.inner.messages.len()).map(move |index| self.message(index))
    }

    pub fn enums(&self) -> impl Iterator<Item = EnumDescriptor> + '_ {
        (0..self.inner.enums.len()).map(move |index| self.enum_at(index))
    }

    pub fn services(&self) -> impl Iterator<Item = ServiceDescriptor> + '_ {
        (0..self.inner.services.len()).map(move |index| self.service(index))
    }

    fn message(&self, index: usize) -> MessageDescriptor {
        MessageDescriptor {
            pool: self.clone(),
            index,
        }
    }

    fn enum_at(&self, index: usize) -> EnumDescriptor {
        EnumDescriptor {
            pool: self.clone(),
            index,
        }
    }

    fn service(&self, index: usize) -> ServiceDescriptor {
        ServiceDescriptor {
            pool: self.clone(),
            index,
        }
    }

    fn same(&self, other: &DescriptorPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("files", &self.inner.files.len())
            .field("messages", &self.inner.messages.len())
            .field("services", &self.inner.services.len())
            .finish()
    }
}

fn order_by_dependency(files: Vec<FileDescriptorProto>) -> Result<Vec<FileDescriptorProto>> {
    let mut by_name: HashMap<String, FileDescriptorProto> = HashMap::new();
    let mut names = Vec::new();
    for file in files {
        let name = file.name().to_string();
        if by_name.contains_key(&name) {
            continue;
        }
        names.push(name.clone());
        by_name.insert(name, file);
    }

    let mut ordered = Vec::with_capacity(names.len());
    let mut done = HashSet::new();
    let mut visiting = HashSet::new();
    for name in &names {
        visit_file(name, None, &mut by_name, &mut done, &mut visiting, &mut ordered)?;
    }
    Ok(ordered)
}

fn visit_file(
    name: &str,
    importer: Option<&str>,
    by_name: &mut HashMap<String, FileDescriptorProto>,
    done: &mut HashSet<String>,
    visiting: &mut HashSet<String>,
    ordered: &mut Vec<FileDescriptorProto>,
) -> Result<()> {
    if done.contains(name) {
        return Ok(());
    }
    if !visiting.insert(name.to_string()) {
        return Err(Error::Internal(format!("import cycle through {name}")));
    }
    let file = by_name.remove(name).ok_or_else(|| {
        Error::Internal(format!(
            "missing dependency file {name} imported by {}",
            importer.unwrap_or("<root>")
        ))
    })?;
    for dependency in &file.dependency {
        visit_file(dependency, Some(name), by_name, done, visiting, ordered)?;
    }
    visiting.remove(name);
    done.insert(name.to_string());
    ordered.push(file);
    Ok(())
}

fn index_comments(file: &FileDescriptorProto) -> HashMap<Vec<i32>, Comments> {
    let mut comments = HashMap::new();
    let Some(info) = &file.source_code_info else {
        return comments;
    };
    for location in &info.location {
        let leading = location.leading_comments().to_string();
        let trailing = location.trailing_comments().to_string();
        if leading.is_empty() && trailing.is_empty() {
            continue;
        }
        comments.insert(location.path.clone(), Comments { leading, trailing });
    }
    comments
}

fn file_level_comments(comments: &HashMap<Vec<i32>, Comments>) -> Option<Comments> {
    [vec![path::FILE_PACKAGE], vec![path::FILE_SYNTAX], Vec::new()]
        .iter()
        .find_map(|location| comments.get(location))
        .cloned()
}

fn join_name(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

fn child_path(parent: &[i32], field: i32, index: usize) -> Vec<i32> {
    let mut path = parent.to_vec();
    path.push(field);
    path.push(index as i32);
    path
}

impl Builder {
    fn comment(&self, file: usize, path: &[i32]) -> Option<Comments> {
        self.comments[file].get(path).cloned()
    }

    fn register(&mut self, full_name: String, symbol: Symbol) -> Result<()> {
        if self.symbols.insert(full_name.clone(), symbol).is_some() {
            return Err(Error::Internal(format!("duplicate symbol {full_name}")));
        }
        Ok(())
    }

    fn declare_all(&mut self) -> Result<()> {
        for file_index in 0..self.files.len() {
            let file = self.files[file_index].clone();
            let package = file.package().to_string();
            let proto3 = file.syntax() == "proto3";

            for (i, message) in file.message_type.iter().enumerate() {
                let path = vec![path::FILE_MESSAGE, i as i32];
                self.declare_message(file_index, proto3, &package, message, path)?;
            }
            for (i, e) in file.enum_type.iter().enumerate() {
                let path = vec![path::FILE_ENUM, i as i32];
                self.declare_enum(file_index, &package, e, path)?;
            }
            // Services are resolved after every message is known.
            for (i, service) in file.service.iter().enumerate() {
                let full_name = join_name(&package, service.name());
                let index = self.services.len();
                self.register(full_name.clone(), Symbol::Service(index))?;
                let path = vec![path::FILE_SERVICE, i as i32];
                let comments = self.comment(file_index, &path);
                self.services.push(ServiceEntry {
                    name: service.name().to_string(),
                    full_name,
                    file: file_index,
                    methods: Vec::new(),
                    comments,
                });
            }
        }
        Ok(())
    }

    fn declare_message(
        &mut self,
        file: usize,
        proto3: bool,
        scope: &str,
        proto: &DescriptorProto,
        path: Vec<i32>,
    ) -> Result<()> {
        let full_name = join_name(scope, proto.name());
        let index = self.messages.len();
        self.register(full_name.clone(), Symbol::Message(index))?;
        let comments = self.comment(file, &path);
        self.messages.push(MessageEntry {
            name: proto.name().to_string(),
            full_name: full_name.clone(),
            file,
            proto3,
            fields: Vec::new(),
            options: proto.options.clone().unwrap_or_default(),
            comments,
        });

        for (i, nested) in proto.nested_type.iter().enumerate() {
            let nested_path = child_path(&path, path::MESSAGE_NESTED, i);
            self.declare_message(file, proto3, &full_name, nested, nested_path)?;
        }
        for (i, e) in proto.enum_type.iter().enumerate() {
            let enum_path = child_path(&path, path::MESSAGE_ENUM, i);
            self.declare_enum(file, &full_name, e, enum_path)?;
        }
        self.pending.push(PendingMessage {
            index,
            proto: proto.clone(),
            path,
        });
        Ok(())
    }

    fn declare_enum(
        &mut self,
        file: usize,
        scope: &str,
        proto: &EnumDescriptorProto,
        path: Vec<i32>,
    ) -> Result<()> {
        let full_name = join_name(scope, proto.name());
        let index = self.enums.len();
        self.register(full_name.clone(), Symbol::Enum(index))?;

        let mut values = Vec::with_capacity(proto.value.len());
        for (i, value) in proto.value.iter().enumerate() {
            // Enum values live in the scope enclosing the enum.
            let value_name = join_name(scope, value.name());
            self.register(value_name.clone(), Symbol::EnumValue(index, i))?;
            values.push(EnumValueEntry {
                name: value.name().to_string(),
                full_name: value_name,
                number: value.number(),
                comments: self.comment(file, &child_path(&path, path::ENUM_VALUE, i)),
            });
        }
        let comments = self.comment(file, &path);
        self.enums.push(EnumEntry {
            name: proto.name().to_string(),
            full_name,
            values,
            comments,
        });
        Ok(())
    }

    fn resolve_fields(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for message in pending {
            let scope = self.messages[message.index].full_name.clone();
            let file = self.messages[message.index].file;
            let mut fields = Vec::with_capacity(message.proto.field.len());
            for (i, proto) in message.proto.field.iter().enumerate() {
                let kind = self.resolve_kind(proto, &scope)?;
                let full_name = join_name(&scope, proto.name());
                self.register(full_name.clone(), Symbol::Field(message.index, i))?;
                fields.push(FieldEntry {
                    name: proto.name().to_string(),
                    full_name,
                    json_name: match &proto.json_name {
                        Some(json_name) => json_name.clone(),
                        None => to_lower_camel(proto.name()),
                    },
                    number: proto.number() as u32,
                    label: proto.label.unwrap_or(label::OPTIONAL),
                    kind,
                    options: proto.options.clone().unwrap_or_default(),
                    oneof_index: proto.oneof_index,
                    comments: self.comment(file, &child_path(&message.path, path::MESSAGE_FIELD, i)),
                });
            }
            self.messages[message.index].fields = fields;
        }
        Ok(())
    }

    fn resolve_kind(&self, field: &FieldDescriptorProto, scope: &str) -> Result<KindIndex> {
        let kind = match field.r#type {
            Some(field_type::DOUBLE) => KindIndex::Double,
            Some(field_type::FLOAT) => KindIndex::Float,
            Some(field_type::INT64) => KindIndex::Int64,
            Some(field_type::UINT64) => KindIndex::Uint64,
            Some(field_type::INT32) => KindIndex::Int32,
            Some(field_type::FIXED64) => KindIndex::Fixed64,
            Some(field_type::FIXED32) => KindIndex::Fixed32,
            Some(field_type::BOOL) => KindIndex::Bool,
            Some(field_type::STRING) => KindIndex::String,
            Some(field_type::BYTES) => KindIndex::Bytes,
            Some(field_type::UINT32) => KindIndex::Uint32,
            Some(field_type::SFIXED32) => KindIndex::Sfixed32,
            Some(field_type::SFIXED64) => KindIndex::Sfixed64,
            Some(field_type::SINT32) => KindIndex::Sint32,
            Some(field_type::SINT64) => KindIndex::Sint64,
            Some(field_type::MESSAGE | field_type::GROUP | field_type::ENUM) | None => {
                match self.resolve_type(field.type_name(), scope) {
                    Some(Symbol::Message(index)) => KindIndex::Message(index),
                    Some(Symbol::Enum(index)) => KindIndex::Enum(index),
                    _ => {
                        return Err(Error::Internal(format!(
                            "field {scope}.{}: unresolved type {:?}",
                            field.name(),
                            field.type_name()
                        )))
                    }
                }
            }
            Some(other) => {
                return Err(Error::Internal(format!(
                    "field {scope}.{}: unknown type {other}",
                    field.name()
                )))
            }
        };
        Ok(kind)
    }

    fn resolve_type(&self, type_name: &str, scope: &str) -> Option<Symbol> {
        if type_name.is_empty() {
            return None;
        }
        if let Some(absolute) = type_name.strip_prefix('.') {
            return self.symbols.get(absolute).copied();
        }
        let mut scope = scope.to_string();
        loop {
            if let Some(symbol) = self.symbols.get(&join_name(&scope, type_name)) {
                return Some(*symbol);
            }
            if scope.is_empty() {
                return None;
            }
            match scope.rfind('.') {
                Some(i) => scope.truncate(i),
                None => scope.clear(),
            }
        }
    }

    fn resolve_services(&mut self) -> Result<()> {
        for service_index in 0..self.services.len() {
            let file_index = self.services[service_index].file;
            let file = &self.files[file_index];
            let package = file.package().to_string();
            let proto = file
                .service
                .iter()
                .position(|s| join_name(&package, s.name()) == self.services[service_index].full_name)
                .map(|i| (i, file.service[i].clone()));
            let Some((position, proto)) = proto else {
                continue;
            };

            let mut methods = Vec::with_capacity(proto.method.len());
            for (i, method) in proto.method.iter().enumerate() {
                let full_name = join_name(&self.services[service_index].full_name, method.name());
                let input = self.resolve_message(method.input_type(), &package, &full_name)?;
                let output = self.resolve_message(method.output_type(), &package, &full_name)?;
                let path = child_path(&[path::FILE_SERVICE, position as i32], path::SERVICE_METHOD, i);
                methods.push(MethodEntry {
                    name: method.name().to_string(),
                    full_name: full_name.clone(),
                    input,
                    output,
                    options: method.options.clone().unwrap_or_default(),
                    client_streaming: method.client_streaming(),
                    server_streaming: method.server_streaming(),
                    comments: self.comment(file_index, &path),
                });
                self.register(full_name, Symbol::Method(service_index, i))?;
            }
            self.services[service_index].methods = methods;
        }
        Ok(())
    }

    fn resolve_message(&self, type_name: &str, scope: &str, method: &str) -> Result<usize> {
        match self.resolve_type(type_name, scope) {
            Some(Symbol::Message(index)) => Ok(index),
            _ => Err(Error::Internal(format!(
                "method {method}: unresolved message type {type_name:?}"
            ))),
        }
    }
}

fn to_lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

// ── Handles ──

macro_rules! handle_identity {
    ($ty:ident, $pool:ident) => {
        impl PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                self.$pool().same(other.$pool()) && self.full_name() == other.full_name()
            }
        }

        impl Eq for $ty {}

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($ty)).field(&self.full_name()).finish()
            }
        }
    };
}

#[derive(Clone)]
pub struct MessageDescriptor {
    pool: DescriptorPool,
    index: usize,
}

handle_identity!(MessageDescriptor, pool);

impl MessageDescriptor {
    fn entry(&self) -> &MessageEntry {
        &self.pool.inner.messages[self.index]
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn full_name(&self) -> &str {
        &self.entry().full_name
    }

    pub fn file_name(&self) -> &str {
        self.pool.inner.files[self.entry().file].name()
    }

    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        (0..self.entry().fields.len()).map(move |index| FieldDescriptor {
            message: self.clone(),
            index,
        })
    }

    pub fn field_by_name(&self, name: &str) -> Option<FieldDescriptor> {
        let index = self.entry().fields.iter().position(|f| f.name == name)?;
        Some(FieldDescriptor {
            message: self.clone(),
            index,
        })
    }

    pub fn field_by_number(&self, number: u32) -> Option<FieldDescriptor> {
        let index = self.entry().fields.iter().position(|f| f.number == number)?;
        Some(FieldDescriptor {
            message: self.clone(),
            index,
        })
    }

    pub fn is_map_entry(&self) -> bool {
        self.entry().options.map_entry()
    }

    pub fn options(&self) -> &MessageOptions {
        &self.entry().options
    }

    /// The `google.api.resource` annotation, if any.
    pub fn resource(&self) -> Option<&ResourceDescriptor> {
        self.entry().options.resource.as_ref()
    }

    pub fn comments(&self) -> Option<&Comments> {
        self.entry().comments.as_ref()
    }

    pub(crate) fn field_count(&self) -> usize {
        self.entry().fields.len()
    }
}

#[derive(Clone)]
pub struct FieldDescriptor {
    message: MessageDescriptor,
    index: usize,
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.index == other.index
    }
}

impl Eq for FieldDescriptor {}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldDescriptor").field(&self.full_name()).finish()
    }
}

/// Field behaviors from `google.api.field_behavior`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldBehaviors {
    pub required: bool,
    pub output_only: bool,
    pub input_only: bool,
    pub immutable: bool,
    pub identifier: bool,
}

impl FieldDescriptor {
    fn entry(&self) -> &FieldEntry {
        &self.message.entry().fields[self.index]
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub fn containing_message(&self) -> &MessageDescriptor {
        &self.message
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn full_name(&self) -> &str {
        &self.entry().full_name
    }

    pub fn json_name(&self) -> &str {
        &self.entry().json_name
    }

    pub fn number(&self) -> u32 {
        self.entry().number
    }

    pub fn kind(&self) -> Kind {
        let pool = &self.message.pool;
        match self.entry().kind {
            KindIndex::Double => Kind::Double,
            KindIndex::Float => Kind::Float,
            KindIndex::Int64 => Kind::Int64,
            KindIndex::Uint64 => Kind::Uint64,
            KindIndex::Int32 => Kind::Int32,
            KindIndex::Fixed64 => Kind::Fixed64,
            KindIndex::Fixed32 => Kind::Fixed32,
            KindIndex::Bool => Kind::Bool,
            KindIndex::String => Kind::String,
            KindIndex::Bytes => Kind::Bytes,
            KindIndex::Uint32 => Kind::Uint32,
            KindIndex::Sfixed32 => Kind::Sfixed32,
            KindIndex::Sfixed64 => Kind::Sfixed64,
            KindIndex::Sint32 => Kind::Sint32,
            KindIndex::Sint64 => Kind::Sint64,
            KindIndex::Enum(index) => Kind::Enum(pool.enum_at(index)),
            KindIndex::Message(index) => Kind::Message(pool.message(index)),
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.entry().label == label::REPEATED
    }

    pub fn is_map(&self) -> bool {
        match self.entry().kind {
            KindIndex::Message(index) => {
                self.is_repeated() && self.message.pool.inner.messages[index].options.map_entry()
            }
            _ => false,
        }
    }

    pub fn is_list(&self) -> bool {
        self.is_repeated() && !self.is_map()
    }

    pub fn map_key(&self) -> Option<FieldDescriptor> {
        self.map_entry()?.field_by_number(1)
    }

    pub fn map_value(&self) -> Option<FieldDescriptor> {
        self.map_entry()?.field_by_number(2)
    }

    fn map_entry(&self) -> Option<MessageDescriptor> {
        if !self.is_map() {
            return None;
        }
        self.kind().as_message().cloned()
    }

    pub fn is_packed(&self) -> bool {
        if !self.is_list() || !self.kind().is_packable() {
            return false;
        }
        match self.entry().options.packed {
            Some(packed) => packed,
            None => self.message.entry().proto3,
        }
    }

    pub fn oneof_index(&self) -> Option<i32> {
        self.entry().oneof_index
    }

    /// Whether an explicitly set default value is distinguishable from unset.
    pub fn supports_presence(&self) -> bool {
        if self.is_repeated() {
            return false;
        }
        matches!(self.entry().kind, KindIndex::Message(_))
            || self.entry().oneof_index.is_some()
            || !self.message.entry().proto3
    }

    pub fn options(&self) -> &FieldOptions {
        &self.entry().options
    }

    pub fn behaviors(&self) -> FieldBehaviors {
        let mut behaviors = FieldBehaviors::default();
        for raw in &self.entry().options.field_behavior {
            match FieldBehavior::from_i32(*raw) {
                Some(FieldBehavior::Required) => behaviors.required = true,
                Some(FieldBehavior::OutputOnly) => behaviors.output_only = true,
                Some(FieldBehavior::InputOnly) => behaviors.input_only = true,
                Some(FieldBehavior::Immutable) => behaviors.immutable = true,
                Some(FieldBehavior::Identifier) => behaviors.identifier = true,
                _ => {}
            }
        }
        behaviors
    }

    /// The `google.api.resource_reference` annotation, if any.
    pub fn resource_reference(&self) -> Option<&ResourceReference> {
        self.entry().options.resource_reference.as_ref()
    }

    pub fn comments(&self) -> Option<&Comments> {
        self.entry().comments.as_ref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Bytes,
    Uint32,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
    Enum(EnumDescriptor),
    Message(MessageDescriptor),
}

impl Kind {
    pub fn as_message(&self) -> Option<&MessageDescriptor> {
        match self {
            Kind::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumDescriptor> {
        match self {
            Kind::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_packable(&self) -> bool {
        !matches!(self, Kind::String | Kind::Bytes | Kind::Message(_))
    }
}

#[derive(Clone)]
pub struct EnumDescriptor {
    pool: DescriptorPool,
    index: usize,
}

handle_identity!(EnumDescriptor, pool);

impl EnumDescriptor {
    fn entry(&self) -> &EnumEntry {
        &self.pool.inner.enums[self.index]
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn full_name(&self) -> &str {
        &self.entry().full_name
    }

    pub fn values(&self) -> impl ExactSizeIterator<Item = EnumValueDescriptor> + '_ {
        (0..self.entry().values.len()).map(move |index| EnumValueDescriptor {
            parent: self.clone(),
            index,
        })
    }

    pub fn value_by_name(&self, name: &str) -> Option<EnumValueDescriptor> {
        self.values().find(|v| v.name() == name)
    }

    pub fn value_by_number(&self, number: i32) -> Option<EnumValueDescriptor> {
        self.values().find(|v| v.number() == number)
    }

    pub fn comments(&self) -> Option<&Comments> {
        self.entry().comments.as_ref()
    }
}

#[derive(Clone)]
pub struct EnumValueDescriptor {
    parent: EnumDescriptor,
    index: usize,
}

impl EnumValueDescriptor {
    fn entry(&self) -> &EnumValueEntry {
        &self.parent.entry().values[self.index]
    }

    pub fn parent(&self) -> &EnumDescriptor {
        &self.parent
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn full_name(&self) -> &str {
        &self.entry().full_name
    }

    pub fn number(&self) -> i32 {
        self.entry().number
    }

    pub fn comments(&self) -> Option<&Comments> {
        self.entry().comments.as_ref()
    }
}

impl fmt::Debug for EnumValueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnumValueDescriptor").field(&self.full_name()).finish()
    }
}

#[derive(Clone)]
pub struct ServiceDescriptor {
    pool: DescriptorPool,
    index: usize,
}

handle_identity!(ServiceDescriptor, pool);

impl ServiceDescriptor {
    fn entry(&self) -> &ServiceEntry {
        &self.pool.inner.services[self.index]
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn full_name(&self) -> &str {
        &self.entry().full_name
    }

    pub fn file_name(&self) -> &str {
        self.pool.inner.files[self.entry().file].name()
    }

    pub fn methods(&self) -> impl ExactSizeIterator<Item = MethodDescriptor> + '_ {
        (0..self.entry().methods.len()).map(move |index| MethodDescriptor {
            service: self.clone(),
            index,
        })
    }

    pub fn method_by_name(&self, name: &str) -> Option<MethodDescriptor> {
        self.methods().find(|m| m.name() == name)
    }

    pub fn comments(&self) -> Option<&Comments> {
        self.entry().comments.as_ref()
    }
}

#[derive(Clone)]
pub struct MethodDescriptor {
    service: ServiceDescriptor,
    index: usize,
}

impl MethodDescriptor {
    fn entry(&self) -> &MethodEntry {
        &self.service.entry().methods[self.index]
    }

    fn pool(&self) -> &DescriptorPool {
        &self.service.pool
    }

    pub fn parent_service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.entry().name
    }

    pub fn full_name(&self) -> &str {
        &self.entry().full_name
    }

    pub fn input(&self) -> MessageDescriptor {
        self.pool().message(self.entry().input)
    }

    pub fn output(&self) -> MessageDescriptor {
        self.pool().message(self.entry().output)
    }

    pub fn options(&self) -> &MethodOptions {
        &self.entry().options
    }

    pub fn has_no_side_effects(&self) -> bool {
        self.entry().options.idempotency_level() == IDEMPOTENCY_NO_SIDE_EFFECTS
    }

    /// The AIP `standard_method` annotation, if any.
    pub fn standard_method(&self) -> Option<&StandardMethod> {
        self.entry().options.standard_method.as_ref()
    }

    pub fn is_client_streaming(&self) -> bool {
        self.entry().client_streaming
    }

    pub fn is_server_streaming(&self) -> bool {
        self.entry().server_streaming
    }

    /// The gRPC request path, `/package.Service/Method`.
    pub fn grpc_path(&self) -> String {
        format!("/{}/{}", self.service.full_name(), self.name())
    }

    pub fn comments(&self) -> Option<&Comments> {
        self.entry().comments.as_ref()
    }
}

handle_identity!(MethodDescriptor, pool);

/// Any named descriptor in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Field(FieldDescriptor),
    EnumValue(EnumValueDescriptor),
}

impl PartialEq for EnumValueDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.parent == other.parent && self.index == other.index
    }
}

impl Eq for EnumValueDescriptor {}

impl Descriptor {
    pub fn full_name(&self) -> &str {
        match self {
            Descriptor::Message(d) => d.full_name(),
            Descriptor::Enum(d) => d.full_name(),
            Descriptor::Service(d) => d.full_name(),
            Descriptor::Method(d) => d.full_name(),
            Descriptor::Field(d) => d.full_name(),
            Descriptor::EnumValue(d) => d.full_name(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Descriptor::Message(_) => "message",
            Descriptor::Enum(_) => "enum",
            Descriptor::Service(_) => "service",
            Descriptor::Method(_) => "method",
            Descriptor::Field(_) => "field",
            Descriptor::EnumValue(_) => "enum value",
        }
    }

    pub fn comments(&self) -> Option<&Comments> {
        match self {
            Descriptor::Message(d) => d.comments(),
            Descriptor::Enum(d) => d.comments(),
            Descriptor::Service(d) => d.comments(),
            Descriptor::Method(d) => d.comments(),
            Descriptor::Field(d) => d.comments(),
            Descriptor::EnumValue(d) => d.comments(),
        }
    }
}
