//! Table definitions and the registry that keeps them durable.

pub mod registry;
pub mod types;

pub use registry::{RegistryError, SchemaRegistry};
pub use types::{ColumnDef, ColumnType, ConfigUpdate, Mapping, TableDefinition, TableKind};
