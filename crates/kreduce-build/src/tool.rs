//! External build tool invocation.

use std::path::{Path, PathBuf};
use std::process::Command;

/// Result of one build tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Whether the process exited with status 0.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Captured standard output followed by standard error.
    pub combined: String,
}

/// Something that can run the build tool with arguments in a directory.
///
/// Only the exit status decides success; the output text is diagnostic.
pub trait BuildTool: Send + Sync {
    /// Run the tool with `args`, working directory `cwd`.
    fn run(&self, args: &[String], cwd: &Path) -> std::io::Result<ToolOutput>;

    /// Human-readable tool name for diagnostics.
    fn describe(&self) -> String;
}

/// Runs a real executable as a child process.
#[derive(Debug, Clone)]
pub struct CommandTool {
    program: PathBuf,
}

impl CommandTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        CommandTool {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl BuildTool for CommandTool {
    fn run(&self, args: &[String], cwd: &Path) -> std::io::Result<ToolOutput> {
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .output()?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ToolOutput {
            success: output.status.success(),
            code: output.status.code(),
            combined,
        })
    }

    fn describe(&self) -> String {
        self.program.display().to_string()
    }
}
