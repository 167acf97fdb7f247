use std::fmt;

use serde::{Deserialize, Serialize};

/// A point where the stream would import a module-level symbol.
///
/// Module and name are kept exactly as encoded; nothing is normalized or
/// imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub module: String,
    /// Attribute path inside the module, e.g. `system` or `Popen.__init__`.
    pub qualified_name: String,
    /// Offset of the GLOBAL / INST / STACK_GLOBAL opcode.
    pub offset: u64,
    /// Opcode name that produced the reference.
    pub opcode: String,
    /// Whether a REDUCE-class instruction later calls this symbol.
    pub invoked: bool,
}

impl SymbolReference {
    pub fn new(
        module: impl Into<String>,
        qualified_name: impl Into<String>,
        offset: u64,
        opcode: &str,
    ) -> Self {
        Self {
            module: module.into(),
            qualified_name: qualified_name.into(),
            offset,
            opcode: opcode.to_string(),
            invoked: false,
        }
    }
}

impl fmt::Display for SymbolReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.qualified_name)
    }
}

/// Output of the tracker for one pickle stream, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracked {
    Symbol(SymbolReference),
    /// STACK_GLOBAL whose operands could not be recovered statically.
    Unresolved { offset: u64 },
}

impl Tracked {
    pub fn offset(&self) -> u64 {
        match self {
            Tracked::Symbol(r) => r.offset,
            Tracked::Unresolved { offset } => *offset,
        }
    }
}
