//! External bundler command.
//!
//! `scripts.command` is an argv list. `{entry}`, `{output}` and `{mode}` are
//! substituted in every argument:
//!
//! ```toml
//! [scripts]
//! command = ["esbuild", "{entry}", "--bundle", "--outfile={output}"]
//! ```
//!
//! The command writes to a temporary file in the system temp directory; the
//! result is read back and written to the real output like any other bundle.

use super::{Bundle, Bundler, ScriptError};
use crate::config::Mode;
use std::fs;
use std::path::Path;
use std::process::Command;

pub struct CommandBundler {
    argv: Vec<String>,
}

impl CommandBundler {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }

    /// The argv with placeholders filled in.
    pub fn expand(&self, entry: &Path, output: &Path, mode: Mode) -> Vec<String> {
        let entry = entry.display().to_string();
        let output = output.display().to_string();
        self.argv
            .iter()
            .map(|arg| {
                arg.replace("{entry}", &entry)
                    .replace("{output}", &output)
                    .replace("{mode}", mode.as_str())
            })
            .collect()
    }
}

impl Bundler for CommandBundler {
    fn bundle(&self, entry: &Path, mode: Mode) -> Result<Bundle, ScriptError> {
        let scratch = tempfile::Builder::new()
            .prefix("webpipe-bundle-")
            .suffix(".js")
            .tempfile()?;
        let argv = self.expand(entry, scratch.path(), mode);
        let Some((program, args)) = argv.split_first() else {
            return Err(ScriptError::Command {
                status: "not run".to_string(),
                stderr: "empty command".to_string(),
            });
        };

        tracing::debug!(command = ?argv, "running bundler");
        let output = Command::new(program)
            .args(args)
            .current_dir(entry.parent().unwrap_or(Path::new(".")))
            .output()?;
        if !output.status.success() {
            return Err(ScriptError::Command {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let code = fs::read_to_string(scratch.path())?;
        Ok(Bundle {
            code,
            inputs: vec![entry.to_path_buf()],
        })
    }
}
