use crate::BlockNumber;
use std::fmt;

/// Content digest of a module's code and its inputs graph.
///
/// The hash namespaces everything the engine persists for a module: cache
/// chunks live under `outputs/<hash>/` and snapshots under `states/<hash>/`.
/// Two modules with identical code but different inputs hash differently.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ModuleHash(String);

impl ModuleHash {
    /// Wraps an already-hex-encoded digest.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Hex representation of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ModuleHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for ModuleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleHash({})", self.0)
    }
}

/// Whether a module is a pure transform or a stateful accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Pure transform: bytes in, bytes out.
    Map,
    /// Stateful key/value accumulator with a typed merge policy.
    Store,
}

/// How writes to a store combine with the value already present.
///
/// The discriminants are the wire-level enum values and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum UpdatePolicy {
    /// Unconditional replace.
    Set = 1,
    /// First write wins, later writes to an existing key are ignored.
    SetIfNotExists = 2,
    /// Arithmetic accumulation, parsed per [`ValueType`].
    Add = 3,
    /// Keep the smallest value observed.
    Min = 4,
    /// Keep the largest value observed.
    Max = 5,
    /// Byte concatenation, bounded per key.
    Append = 6,
}

impl UpdatePolicy {
    /// Decodes the wire-level enum value.
    pub const fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Set),
            2 => Some(Self::SetIfNotExists),
            3 => Some(Self::Add),
            4 => Some(Self::Min),
            5 => Some(Self::Max),
            6 => Some(Self::Append),
            _ => None,
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Set => "set",
            Self::SetIfNotExists => "set_if_not_exists",
            Self::Add => "add",
            Self::Min => "min",
            Self::Max => "max",
            Self::Append => "append",
        };
        f.write_str(s)
    }
}

/// The value domain of a store, governing how numeric operations parse and
/// format the stored bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Raw bytes, no numeric interpretation.
    Bytes,
    /// UTF-8 string.
    String,
    /// 64-bit signed integer, canonical base-10 text.
    Int64,
    /// Arbitrary-precision integer, canonical base-10 text.
    BigInt,
    /// IEEE-754 double, shortest round-trip decimal text.
    Float64,
    /// Arbitrary-precision decimal, precision 100, round-to-nearest-even.
    BigFloat,
}

/// The mode in which a store feeds a downstream module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// The downstream module reads keys through the store handle.
    Get,
    /// The downstream module receives the store's per-block delta list.
    Deltas,
}

/// One input of a module, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Input {
    /// A named feed from the block source.
    Source {
        /// Name of the source feed, e.g. `sf.blocks`.
        name: String,
    },
    /// The output bytes of another (mapper) module.
    Map {
        /// Name of the upstream module.
        module: String,
    },
    /// A store handle from an upstream store module.
    Store {
        /// Name of the upstream module.
        module: String,
        /// Read mode for the handle.
        mode: StoreMode,
    },
}

impl Input {
    /// The upstream module this input depends on, if any.
    pub fn dependency(&self) -> Option<&str> {
        match self {
            Self::Source { .. } => None,
            Self::Map { module } | Self::Store { module, .. } => Some(module),
        }
    }
}

/// Immutable description of one module of the graph, as produced by the
/// manifest loader.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModuleDescriptor {
    /// Module name, unique within the graph.
    pub name: String,
    /// Content digest of code + inputs graph.
    pub hash: ModuleHash,
    /// First block the module is defined for.
    pub initial_block: BlockNumber,
    /// Mapper or store.
    pub kind: ModuleKind,
    /// Ordered inputs.
    pub inputs: Vec<Input>,
    /// Declared output type, mappers only.
    pub output_type: Option<String>,
    /// Merge policy, stores only.
    pub update_policy: Option<UpdatePolicy>,
    /// Value domain, stores only.
    pub value_type: Option<ValueType>,
    /// Name of the exported WASM entry point.
    pub entrypoint: String,
}

impl ModuleDescriptor {
    /// Returns `true` for store modules.
    pub fn is_store(&self) -> bool {
        self.kind == ModuleKind::Store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_policy_wire_values_round_trip() {
        for policy in [
            UpdatePolicy::Set,
            UpdatePolicy::SetIfNotExists,
            UpdatePolicy::Add,
            UpdatePolicy::Min,
            UpdatePolicy::Max,
            UpdatePolicy::Append,
        ] {
            assert_eq!(UpdatePolicy::from_i32(policy as i32), Some(policy));
        }
        assert_eq!(UpdatePolicy::from_i32(0), None);
        assert_eq!(UpdatePolicy::from_i32(7), None);
    }

    #[test]
    fn input_dependency() {
        assert_eq!(Input::Source { name: "sf.blocks".into() }.dependency(), None);
        assert_eq!(
            Input::Map { module: "map_transfers".into() }.dependency(),
            Some("map_transfers")
        );
        assert_eq!(
            Input::Store { module: "store_totals".into(), mode: StoreMode::Get }.dependency(),
            Some("store_totals")
        );
    }
}
