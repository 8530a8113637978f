//! Command-line arguments and configuration merging.

use std::path::{Path, PathBuf};

use clap::{Args as ClapArgs, Parser, Subcommand};
use wasmbox_runtime::ApiOptions;

use crate::error::{CliError, Result};

/// wasmbox - run sandboxed compiler toolchains and their programs
#[derive(Parser, Debug)]
#[command(name = "wasmbox")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory the stage modules and sysroot archive are loaded from
    #[arg(long, default_value = "resources", global = true)]
    pub resources: PathBuf,

    /// JSON file with orchestrator options
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that take precedence over the config file.
#[derive(ClapArgs, Debug, Default)]
pub struct Overrides {
    /// Append elapsed seconds to log lines
    #[arg(long, global = true)]
    pub show_timing: bool,

    /// Standard input for programs
    #[arg(long, global = true)]
    pub stdin: Option<String>,

    /// Give up on a request after this many milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Compiler module name
    #[arg(long, global = true)]
    pub clang: Option<String>,

    /// Linker module name
    #[arg(long, global = true)]
    pub lld: Option<String>,

    /// Filesystem module name
    #[arg(long, global = true)]
    pub memfs: Option<String>,

    /// Sysroot archive name
    #[arg(long, global = true)]
    pub sysroot: Option<String>,

    /// 6502 assembler module name
    #[arg(long, global = true)]
    pub vasm: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile, link and run a C++ source file
    Run {
        /// Source file
        file: PathBuf,

        /// Animation frames to deliver if the program keeps animating
        #[arg(long, default_value_t = 0)]
        frames: u32,

        /// Delay between frames, in milliseconds
        #[arg(long)]
        frame_interval_ms: Option<u64>,
    },

    /// Compile a C++ source file to assembly
    Asm {
        /// Source file
        file: PathBuf,

        /// Target triple
        #[arg(long, default_value = "x86_64")]
        triple: String,

        /// Optimization level
        #[arg(long, short = 'O', default_value = "2")]
        opt: String,

        /// Write the assembly here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Assemble 6502 source
    Vasm {
        /// Source file
        file: PathBuf,

        /// Flag passed through to the assembler (repeatable)
        #[arg(long = "flag", allow_hyphen_values = true)]
        flags: Vec<String>,

        /// Write the binary here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

impl Overrides {
    pub fn apply(&self, options: &mut ApiOptions) {
        if self.show_timing {
            options.show_timing = true;
        }
        if let Some(stdin) = &self.stdin {
            options.stdin = stdin.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            options.request_timeout_ms = Some(timeout);
        }
        let names = [
            (&self.clang, &mut options.clang),
            (&self.lld, &mut options.lld),
            (&self.memfs, &mut options.memfs),
            (&self.sysroot, &mut options.sysroot),
            (&self.vasm, &mut options.vasm),
        ];
        for (flag, name) in names {
            if let Some(flag) = flag {
                *name = flag.clone();
            }
        }
    }
}

/// Read the config file, if any, then apply command-line overrides.
pub fn load_options(config: Option<&Path>, overrides: &Overrides) -> Result<ApiOptions> {
    let mut options = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&text)?
        }
        None => ApiOptions::default(),
    };
    overrides.apply(&mut options);
    Ok(options)
}

/// Output file name for a source path: `dir/prog.cc` -> `prog.<ext>`.
pub fn stage_name(file: &Path, ext: &str) -> String {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    format!("{stem}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subcommands_parse() {
        let args = Args::parse_from(["wasmbox", "asm", "prog.cc", "-O", "0", "--triple", "wasm32"]);
        match args.command {
            Command::Asm { file, triple, opt, output } => {
                assert_eq!(file, PathBuf::from("prog.cc"));
                assert_eq!(triple, "wasm32");
                assert_eq!(opt, "0");
                assert_eq!(output, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let args = Args::parse_from(["wasmbox", "vasm", "a.s", "--flag", "-Fbin", "--flag", "-dotdir"]);
        match args.command {
            Command::Vasm { flags, .. } => assert_eq!(flags, vec!["-Fbin", "-dotdir"]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::parse_from(["wasmbox", "run", "prog.cc", "--frames", "3", "--show-timing"]);
        assert!(args.overrides.show_timing);
        assert!(matches!(args.command, Command::Run { frames: 3, .. }));
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wasmbox.json");
        std::fs::write(&path, r#"{"clang": "clang-8", "lld": "lld-8", "show_timing": false}"#).unwrap();

        let overrides = Overrides {
            show_timing: true,
            lld: Some("wasm-ld".to_string()),
            timeout_ms: Some(500),
            ..Overrides::default()
        };
        let options = load_options(Some(&path), &overrides).unwrap();
        assert_eq!(options.clang, "clang-8");
        assert_eq!(options.lld, "wasm-ld");
        assert!(options.show_timing);
        assert_eq!(options.request_timeout_ms, Some(500));
        assert_eq!(options.memfs, "memfs");
    }

    #[test]
    fn bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wasmbox.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_options(Some(&path), &Overrides::default()),
            Err(CliError::Config(_))
        ));
        assert!(matches!(
            load_options(Some(&dir.path().join("missing.json")), &Overrides::default()),
            Err(CliError::Read { .. })
        ));
    }

    #[test]
    fn stage_names_use_the_file_stem() {
        assert_eq!(stage_name(Path::new("src/prog.cc"), "S"), "prog.S");
        assert_eq!(stage_name(Path::new("demo.s"), "bin"), "demo.bin");
    }
}
