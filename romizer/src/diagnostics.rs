use colored::Colorize;
use std::fmt::{Display, Formatter};
use std::io::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub class: Option<String>,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.class {
            Some(class) => write!(f, "{}: {}", class, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Collects everything worth telling the user about a run. Each record is
/// also forwarded to `log` as it arrives.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, class: Option<&str>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            severity,
            class: class.map(String::from),
            message: message.into(),
        };

        match severity {
            Severity::Info => log::info!("{}", diagnostic),
            Severity::Warning => log::warn!("{}", diagnostic),
            Severity::Error => log::error!("{}", diagnostic),
        }

        self.records.push(diagnostic);
    }

    pub fn warn(&mut self, class: &str, message: impl Into<String>) {
        self.report(Severity::Warning, Some(class), message);
    }

    pub fn error(&mut self, class: &str, message: impl Into<String>) {
        self.report(Severity::Error, Some(class), message);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records.iter().filter(|record| record.severity == severity).count()
    }

    /// Writes warnings and errors, one per line, colored by severity.
    pub fn print<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for record in &self.records {
            match record.severity {
                Severity::Info => continue,
                Severity::Warning => writeln!(out, "{} {}", "warning:".yellow().bold(), record)?,
                Severity::Error => writeln!(out, "{} {}", "error:".red().bold(), record)?,
            }
        }

        Ok(())
    }
}
