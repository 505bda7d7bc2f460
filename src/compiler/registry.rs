//! Compiler registration with capability snapshots

use super::{Compiler, CompilerError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Optional capabilities of a compiler, read once at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompilerCapabilities {
    pub file_transpiler: bool,
    pub component_transpiler: bool,
    pub hooks: bool,
}

impl CompilerCapabilities {
    fn detect(compiler: &dyn Compiler) -> Self {
        Self {
            file_transpiler: compiler.file_transpiler().is_some(),
            component_transpiler: compiler.component_transpiler().is_some(),
            hooks: compiler.hooks().is_some(),
        }
    }
}

/// A registered compiler together with its capabilities
#[derive(Clone)]
pub struct RegisteredCompiler {
    pub compiler: Arc<dyn Compiler>,
    pub capabilities: CompilerCapabilities,
}

impl std::fmt::Debug for RegisteredCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCompiler")
            .field("id", &self.compiler.id())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Compilers available to a pipeline, keyed by id
#[derive(Debug, Default, Clone)]
pub struct CompilerRegistry {
    compilers: BTreeMap<String, RegisteredCompiler>,
}

impl CompilerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiler. Ids must be unique.
    pub fn register(&mut self, compiler: Arc<dyn Compiler>) -> Result<&RegisteredCompiler, CompilerError> {
        let id = compiler.id().to_string();
        if self.compilers.contains_key(&id) {
            return Err(CompilerError::DuplicateId(id));
        }
        compiler.options().validate(&id)?;

        let capabilities = CompilerCapabilities::detect(compiler.as_ref());
        debug!(compiler = %id, ?capabilities, "compiler registered");
        Ok(self
            .compilers
            .entry(id)
            .or_insert(RegisteredCompiler { compiler, capabilities }))
    }

    pub fn get(&self, id: &str) -> Result<&RegisteredCompiler, CompilerError> {
        self.compilers
            .get(id)
            .ok_or_else(|| CompilerError::UnknownCompiler(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.compilers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.compilers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compilers.is_empty()
    }
}
