//! Catalog-driven schema definition.
//!
//! Loader → type mapping + FK resolution → DDL generation. Nothing in this
//! module touches the database; see [`crate::bootstrap`] for execution.

pub mod catalog;
pub mod checksum;
pub mod ddl;
pub mod error;
pub mod foreign_key;
pub mod identifier;
pub mod type_mapping;

pub use catalog::{Catalog, CatalogRow, ColumnDescriptor, TableDescriptor};
pub use ddl::{DdlOptions, DdlPhase, SchemaPlan, Statement, StatementKind};
pub use error::{
    CatalogLoadError, DanglingReason, DanglingReference, DerivedNameKind, NameConflict,
    SchemaConsistencyError,
};
pub use foreign_key::{
    resolve as resolve_foreign_keys, ForeignKeyPlan, ResolvedForeignKey, SkipReason,
    SkippedForeignKey, UniqueRequirement,
};
pub use type_mapping::{map_format, SqlType};
