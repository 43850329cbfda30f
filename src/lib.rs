pub use schemaflow_core as core;
pub use schemaflow_utils as utils;

// Convenience re-exports for common usage
pub use schemaflow_core::builder::TableBuilder;
pub use schemaflow_core::config::{load_config, EngineConfig};
pub use schemaflow_core::control::{ControlError, ControlPlane};
pub use schemaflow_core::destinations::traits::Destination;
pub use schemaflow_core::engine::{Engine, SchemaFlow};
pub use schemaflow_core::schema::{ColumnDef, ConfigUpdate, Mapping, TableDefinition, TableKind};
pub use schemaflow_core::sources::traits::Source;
pub use schemaflow_utils::{Row, SchemaflowResult, SqlValue};
