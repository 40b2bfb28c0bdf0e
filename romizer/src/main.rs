use clap::{Parser, ValueEnum};
use colored::Colorize;
use romizer::config::{OutputMode, RomizerConfig};
use romizer::error::Result;
use romizer::provider::DirectoryProvider;
use romizer::{Romizer, RunSummary};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// The ROM image
    Image,
    /// Method declarations and native relocations
    Relocations,
    /// Native function table for non-romized builds
    Natives,
}

impl From<Mode> for OutputMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Image => OutputMode::Image,
            Mode::Relocations => OutputMode::Relocations,
            Mode::Natives => OutputMode::NativeTable,
        }
    }
}

#[derive(Parser)]
#[command(name = "romizer")]
#[command(about = "Links Java classes ahead of time into a KVM ROM image")]
#[command(version)]
struct Cli {
    /// Class files, multi-class bundles or directories of class files
    #[arg(value_name = "INPUT", required = true)]
    inputs: Vec<PathBuf>,

    /// Directories searched for classes the inputs refer to
    #[arg(short, long = "classpath", value_name = "DIR", value_delimiter = ':')]
    classpath: Vec<PathBuf>,

    /// Output file
    #[arg(short, long, value_name = "FILE", default_value = "ROMjavaUnix.c")]
    output: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Mode::Image)]
    mode: Mode,

    /// Keep section sizes small enough for a relocating loader
    #[arg(long)]
    relocatable: bool,

    /// Largest code section in bytes
    #[arg(long, value_name = "BYTES")]
    max_code_section: Option<usize>,

    /// Largest method table section in methods
    #[arg(long, value_name = "METHODS")]
    max_method_section: Option<usize>,

    /// Leave instructions in their symbolic form
    #[arg(long)]
    no_quicken: bool,

    /// Keep constant pool entries nothing refers to
    #[arg(long)]
    no_compact: bool,

    /// Do not read classes that are only named by class constants
    #[arg(long)]
    no_load: bool,

    /// Fixed generation date, for reproducible output
    #[arg(long, value_name = "DATE")]
    date: Option<String>,

    /// Print warnings about unresolved references
    #[arg(short, long)]
    warn: bool,

    /// Print space statistics when done
    #[arg(long)]
    stats: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> RomizerConfig {
        RomizerConfig {
            mode: self.mode.into(),
            quicken: !self.no_quicken,
            compact_pools: !self.no_compact,
            relocatable: self.relocatable,
            max_code_section: self.max_code_section,
            max_method_section: self.max_method_section,
            load_referenced: !self.no_load,
            warn: self.warn,
            verbose: self.verbose,
            generation_date: self.date.clone(),
            output: self.output.clone(),
        }
    }
}

fn romize(cli: &Cli) -> Result<RunSummary> {
    let config = cli.config();
    let provider = DirectoryProvider::new(cli.classpath.clone());
    let mut romizer = Romizer::new(config, Box::new(provider));

    for input in &cli.inputs {
        romizer.add_path(input)?;
    }

    let file = BufWriter::new(File::create(&cli.output)?);
    let (mut file, summary) = romizer.run(file)?;
    file.flush()?;

    Ok(summary)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // --warn prints every diagnostic itself
    let filter = match (cli.verbose, cli.warn) {
        (true, _) => "debug",
        (false, true) => "off",
        (false, false) => "error",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .init();

    match romize(&cli) {
        Ok(summary) => {
            if cli.warn {
                let _ = summary.diagnostics.print(io::stderr());
            }

            if cli.stats {
                println!("{}", summary.stats);
                println!(
                    "{} classes fully quickened, {} partially",
                    summary.fully_quickened, summary.partially_quickened
                );
            }

            if summary.errors() > 0 {
                eprintln!(
                    "{} {} input(s) skipped, output written without them",
                    "error:".red().bold(),
                    summary.errors()
                );
                return ExitCode::FAILURE;
            }

            ExitCode::SUCCESS
        }
        Err(error) => {
            // partial output is unusable
            let _ = fs::remove_file(&cli.output);
            eprintln!("{} {}", "error:".red().bold(), error);
            ExitCode::FAILURE
        }
    }
}
