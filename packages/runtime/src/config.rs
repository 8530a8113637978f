//! Orchestrator configuration and stage option payloads.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Names of the resources the orchestrator loads, plus runtime knobs.
///
/// Every field has a default, so a partial JSON object is a valid
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiOptions {
    /// Compiler stage module.
    pub clang: String,

    /// Linker stage module.
    pub lld: String,

    /// Filesystem module.
    pub memfs: String,

    /// Archive the filesystem is seeded from.
    pub sysroot: String,

    /// 6502 assembler stage module.
    pub vasm: String,

    /// Append elapsed seconds to log lines.
    pub show_timing: bool,

    /// Initial standard input for programs.
    pub stdin: String,

    /// Delay between animation frames.
    pub frame_interval_ms: u64,

    /// How long a correlated request may wait for its response. `None`
    /// waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for ApiOptions {
    fn default() -> Self {
        Self {
            clang: "clang".to_string(),
            lld: "lld".to_string(),
            memfs: "memfs".to_string(),
            sysroot: "sysroot.tar".to_string(),
            vasm: "vasm6502_oldstyle".to_string(),
            show_timing: false,
            stdin: String::new(),
            frame_interval_ms: 16,
            request_timeout_ms: None,
        }
    }
}

impl ApiOptions {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn default_opt() -> String {
    "2".to_string()
}

fn default_triple() -> String {
    "x86_64".to_string()
}

/// Compile a source file to an object file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileOptions {
    pub input: String,
    pub contents: String,
    pub obj: String,
    #[serde(default = "default_opt")]
    pub opt: String,
}

impl CompileOptions {
    pub fn new(input: impl Into<String>, contents: impl Into<String>, obj: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            contents: contents.into(),
            obj: obj.into(),
            opt: default_opt(),
        }
    }
}

/// Compile a source file to assembly text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssemblyOptions {
    pub input: String,
    pub output: String,
    pub contents: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obj: Option<String>,
    #[serde(default = "default_triple")]
    pub triple: String,
    #[serde(default = "default_opt")]
    pub opt: String,
}

impl AssemblyOptions {
    pub fn new(input: impl Into<String>, output: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            contents: contents.into(),
            obj: None,
            triple: default_triple(),
            opt: default_opt(),
        }
    }

    pub fn with_triple(mut self, triple: impl Into<String>) -> Self {
        self.triple = triple.into();
        self
    }

    pub fn with_opt(mut self, opt: impl Into<String>) -> Self {
        self.opt = opt.into();
        self
    }
}

/// Assemble 6502 source with caller-supplied assembler flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vasm6502Options {
    pub input: String,
    pub output: String,
    pub contents: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl Vasm6502Options {
    pub fn new(input: impl Into<String>, output: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            contents: contents.into(),
            flags: Vec::new(),
        }
    }

    pub fn with_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flags = flags.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_options_fill_in_defaults() {
        let options: ApiOptions =
            serde_json::from_str(r#"{"clang": "clang-8", "show_timing": true}"#).unwrap();
        assert_eq!(options.clang, "clang-8");
        assert!(options.show_timing);
        assert_eq!(options.lld, "lld");
        assert_eq!(options.sysroot, "sysroot.tar");
        assert_eq!(options.frame_interval(), Duration::from_millis(16));
        assert_eq!(options.request_timeout(), None);
    }

    #[test]
    fn assembly_options_default_triple_and_opt() {
        let options: AssemblyOptions = serde_json::from_str(
            r#"{"input": "test.cc", "output": "test.S", "contents": "int main(){}"}"#,
        )
        .unwrap();
        assert_eq!(options.triple, "x86_64");
        assert_eq!(options.opt, "2");
        assert_eq!(options.obj, None);
    }

    #[test]
    fn vasm_flags_default_empty() {
        let options: Vasm6502Options =
            serde_json::from_str(r#"{"input": "a.s", "output": "a.bin", "contents": ""}"#).unwrap();
        assert!(options.flags.is_empty());
        let options = options.with_flags(["-Fbin", "-dotdir"]);
        assert_eq!(options.flags, vec!["-Fbin", "-dotdir"]);
    }
}
