//! Fetching named resources supplied by the embedder.

use std::collections::HashMap;
use std::path::PathBuf;

use wasmtime::{Engine, Module};

use crate::error::{Error, Result};

/// Source of stage modules and the sysroot archive.
pub trait ResourceLoader: Send {
    /// Read a named resource in full.
    fn read_buffer(&self, name: &str) -> Result<Vec<u8>>;

    /// Fetch and compile a named stage module.
    fn compile(&self, engine: &Engine, name: &str) -> Result<Module> {
        let bytes = self.read_buffer(name)?;
        Ok(Module::new(engine, bytes)?)
    }
}

/// Loads resources from files under a root directory.
#[derive(Debug, Clone)]
pub struct DirLoader {
    root: PathBuf,
}

impl DirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl ResourceLoader for DirLoader {
    fn read_buffer(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        tracing::debug!(path = %path.display(), "reading resource");
        std::fs::read(&path).map_err(|source| Error::Resource {
            name: name.to_string(),
            source,
        })
    }
}

/// Serves resources from memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.resources.insert(name.into(), bytes.into());
    }

    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl ResourceLoader for MemoryLoader {
    fn read_buffer(&self, name: &str) -> Result<Vec<u8>> {
        self.resources.get(name).cloned().ok_or_else(|| Error::Resource {
            name: name.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such resource"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_loader_serves_inserted_bytes() {
        let loader = MemoryLoader::new().with("sysroot.tar", vec![1, 2, 3]);
        assert_eq!(loader.read_buffer("sysroot.tar").unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            loader.read_buffer("clang"),
            Err(Error::Resource { ref name, .. }) if name == "clang"
        ));
    }

    #[test]
    fn compile_accepts_text_modules() {
        let loader = MemoryLoader::new().with("empty", "(module)");
        let engine = Engine::default();
        assert!(loader.compile(&engine, "empty").is_ok());

        let loader = MemoryLoader::new().with("bad", "not wasm");
        assert!(matches!(loader.compile(&engine, "bad"), Err(Error::Wasm(_))));
    }
}
