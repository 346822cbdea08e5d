//! Runtime protobuf schema handling for the tool bridge.
//!
//! Descriptors are fetched from a [`SchemaSource`] (server reflection or a
//! descriptor-set bundle), assembled into a [`DescriptorPool`], enriched with
//! comments and AIP documentation into a [`Schema`], and cached by the
//! [`SchemaResolver`]. [`DynamicMessage`] carries request and response
//! payloads without generated code.

pub mod aip;
pub mod cache;
pub mod descriptor;
pub mod dynamic;
pub mod fieldmask;
pub mod invoker;
pub mod pool;
pub mod reflection;
pub mod resolver;
pub mod schema;
pub mod source;
mod wire;
pub mod wkt;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheOptions, SchemaCache};
pub use dynamic::{DynamicMessage, MapKey, Value};
pub use fieldmask::FieldMask;
pub use invoker::{GrpcInvoker, MethodInvoker};
pub use pool::{
    Comments, Descriptor, DescriptorPool, EnumDescriptor, EnumValueDescriptor, FieldBehaviors,
    FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor, ServiceDescriptor,
};
pub use resolver::{ResolverOptions, SchemaResolver};
pub use schema::{CommentStyle, Schema, StandardMethodType};
pub use source::{BundleConfig, DescriptorSetSource, ReflectionSource, SchemaData, SchemaSource};
