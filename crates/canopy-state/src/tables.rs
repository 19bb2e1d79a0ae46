//! redb table definitions for the Canopy store.
//!
//! Every table uses `&str` keys and `&[u8]` values.

use redb::TableDefinition;

/// Static-asset blobs keyed by `{generation}/{static_prefix}/{relative_path}`.
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");

/// Named configuration parameters keyed by parameter name.
pub const PARAMETERS: TableDefinition<&str, &[u8]> = TableDefinition::new("parameters");

/// Finished deployment records keyed by deployment id.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Published compute versions keyed by `{function}:{version_id:020}`.
pub const VERSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("versions");

/// Alias bindings keyed by `{function}/{alias}`.
pub const ALIASES: TableDefinition<&str, &[u8]> = TableDefinition::new("aliases");

/// Shape shared by every table above.
pub type KvTable = TableDefinition<'static, &'static str, &'static [u8]>;
