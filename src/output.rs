//! Operator-facing status output.
//!
//! Purely presentational: nothing here influences control flow.

use colored::*;

/// Colored terminal reporter
#[derive(Debug, Clone, Copy, Default)]
pub struct Console {
    quiet: bool,
    verbose: bool,
    /// Guidance goes to stderr even when quiet
    hints_to_stderr: bool,
}

impl Console {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            ..Self::default()
        }
    }

    /// A console that prints nothing
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::default()
        }
    }

    /// Nothing on stdout, which carries the JSON report, but prompts
    /// still get their guidance on stderr
    pub fn json() -> Self {
        Self {
            quiet: true,
            verbose: false,
            hints_to_stderr: true,
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// `[3/7] Unlocking root pool`
    pub fn step(&self, index: usize, total: usize, title: &str) {
        if !self.quiet {
            println!("{} {}", format!("[{}/{}]", index, total).cyan().bold(), title.bold());
        }
    }

    pub fn ok(&self, message: &str) {
        if !self.quiet {
            println!("  {} {}", "✓".green(), message);
        }
    }

    /// Idempotence notice: nothing to do
    pub fn notice(&self, message: &str) {
        if !self.quiet {
            println!("  {} {}", "•".blue(), message);
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.quiet {
            println!("  {} {}", "!".yellow(), message.yellow());
        }
    }

    /// Whether guidance text reaches the operator at all
    pub fn shows_hints(&self) -> bool {
        !self.quiet || self.hints_to_stderr
    }

    /// Guidance text shown before a prompt
    pub fn hint(&self, message: &str) {
        if self.hints_to_stderr {
            eprintln!("{}", message.dimmed());
        } else if !self.quiet {
            println!("{}", message.dimmed());
        }
    }

    /// Only shown with --verbose
    pub fn detail(&self, message: &str) {
        if !self.quiet && self.verbose {
            println!("    {}", message.dimmed());
        }
    }

    pub fn heading(&self, title: &str) {
        if !self.quiet {
            println!();
            println!("{}", title.green().bold());
        }
    }

    pub fn line(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }
}
