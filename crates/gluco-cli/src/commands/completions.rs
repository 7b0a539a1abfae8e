use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

const BIN_NAME: &str = "gluco";

impl From<CompletionShell> for Shell {
    fn from(value: CompletionShell) -> Self {
        match value {
            CompletionShell::Bash => Self::Bash,
            CompletionShell::Zsh => Self::Zsh,
            CompletionShell::Fish => Self::Fish,
        }
    }
}

/// Conventional script name for each shell's completion directory
pub const fn script_file_name(shell: CompletionShell) -> &'static str {
    match shell {
        CompletionShell::Bash => "gluco.bash",
        CompletionShell::Zsh => "_gluco",
        CompletionShell::Fish => "gluco.fish",
    }
}

/// Write completions to stdout, to a file, or into a directory under the
/// shell's conventional file name.
pub fn run_completions(shell: CompletionShell, output_path: Option<&Path>) -> Result<(), CliError> {
    let mut script = Vec::new();
    generate(Shell::from(shell), &mut Cli::command(), BIN_NAME, &mut script);

    let Some(path) = output_path else {
        io::stdout().write_all(&script)?;
        return Ok(());
    };

    let target: PathBuf = if path.is_dir() {
        path.join(script_file_name(shell))
    } else {
        path.to_path_buf()
    };
    std::fs::write(&target, &script)?;
    println!("{}", target.display());
    Ok(())
}
