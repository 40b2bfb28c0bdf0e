//! Links a closed set of Java classes ahead of time and writes them out as
//! a C source file the KVM can be built with.

use crate::classfile::attribute::AttributeDecoders;
use crate::classfile::resolved::ClassId;
use crate::config::{OutputMode, RomizerConfig};
use crate::constant_pool::ConstantPool;
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::linker::Linker;
use crate::provider::ClassProvider;
use crate::reader::ClassReader;
use crate::registry::ClassRegistry;
use crate::writer::{ImageStats, ImageWriter};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::Path;

pub mod bytecode;
pub mod classfile;
pub mod compact;
pub mod config;
pub mod constant_pool;
pub mod diagnostics;
pub mod error;
pub mod keys;
pub mod linker;
pub mod provider;
pub mod quicken;
pub mod reader;
pub mod registry;
pub mod writer;

#[cfg(test)]
mod testing;
mod tests;

/// What a run did, for reporting.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub classes: usize,
    pub fully_quickened: usize,
    pub partially_quickened: usize,
    pub diagnostics: Diagnostics,
    pub stats: ImageStats,
}

impl RunSummary {
    pub fn warnings(&self) -> usize {
        self.diagnostics.count(diagnostics::Severity::Warning)
    }

    /// Inputs that were skipped because they could not be read.
    pub fn errors(&self) -> usize {
        self.diagnostics.count(diagnostics::Severity::Error)
    }
}

/// One romizer run: inputs are added, then [`Romizer::run`] links them with
/// whatever the provider can supply and writes the output.
pub struct Romizer {
    config: RomizerConfig,
    provider: Box<dyn ClassProvider>,
    decoders: AttributeDecoders,
    registry: ClassRegistry,
    pool: ConstantPool,
    diagnostics: Diagnostics,
}

impl Romizer {
    pub fn new(config: RomizerConfig, provider: Box<dyn ClassProvider>) -> Self {
        Self {
            config,
            provider,
            decoders: AttributeDecoders::default(),
            registry: ClassRegistry::new(),
            pool: ConstantPool::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn config(&self) -> &RomizerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Reads a class file or multi-class bundle. A malformed input fails as
    /// a whole and leaves nothing registered.
    pub fn add_bytes(&mut self, source_name: &str, bytes: &[u8]) -> Result<Vec<ClassId>> {
        let records = ClassReader::new(&mut self.pool, &self.decoders).read(source_name, bytes)?;
        Ok(Linker::register(&mut self.registry, &mut self.diagnostics, records))
    }

    /// Reads a file, or every `.class` file below a directory in path order.
    /// A file that is malformed is recorded as an error diagnostic and
    /// skipped; the rest are still read.
    pub fn add_path(&mut self, path: &Path) -> Result<Vec<ClassId>> {
        if !path.is_dir() {
            return self.add_file(path);
        }

        let mut files = Vec::new();
        collect_class_files(path, &mut files)?;
        files.sort();

        let mut ids = Vec::new();
        for file in files {
            ids.extend(self.add_file(&file)?);
        }

        log::debug!("read {} classes below {}", ids.len(), path.display());

        Ok(ids)
    }

    fn add_file(&mut self, path: &Path) -> Result<Vec<ClassId>> {
        let source_name = path.display().to_string();
        let bytes = fs::read(path)?;

        match self.add_bytes(&source_name, &bytes) {
            Err(error) if error.is_per_class() => {
                self.diagnostics.error(&source_name, format!("skipped: {}", error));
                Ok(Vec::new())
            }
            result => result,
        }
    }

    /// Links, quickens and compacts everything added so far, then writes the
    /// output selected by the config into `sink`.
    pub fn run<W: Write>(mut self, sink: W) -> Result<(W, RunSummary)> {
        Linker::new(
            &mut self.registry,
            &mut self.pool,
            self.provider.as_ref(),
            &self.decoders,
            &mut self.diagnostics,
        )
        .load_referenced(self.config.load_referenced)
        .link()?;

        let mut summary = RunSummary::default();

        if self.config.quicken {
            let quickened = quicken::quicken_all(&mut self.registry, &self.pool, &mut self.diagnostics, self.config.warn)?;

            summary.fully_quickened = quickened.iter().filter(|class| class.is_complete()).count();
            summary.partially_quickened = quickened.len() - summary.fully_quickened;
        }

        linker::materialise_arrays(&mut self.registry, &mut self.pool)?;
        compact::compact_pools(&mut self.registry, &mut self.pool, self.config.compact_pools)?;

        let date = self.config.generation_date.clone().unwrap_or_else(generation_date);
        let mut writer = ImageWriter::new(&self.registry, &self.pool, &self.config, date)?;

        let sink = match self.config.mode {
            OutputMode::Image => writer.write_image(sink)?,
            OutputMode::Relocations => writer.write_relocation_file(sink)?,
            OutputMode::NativeTable => writer.write_native_table(sink)?,
        };

        summary.stats = writer.stats();
        summary.classes = self.registry.len();
        summary.diagnostics = self.diagnostics;

        Ok((sink, summary))
    }
}

fn collect_class_files(directory: &Path, files: &mut Vec<std::path::PathBuf>) -> Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_class_files(&path, files)?;
        } else if path.extension().is_some_and(|extension| extension == "class") {
            files.push(path);
        }
    }

    Ok(())
}

/// The current time in the form `Sun Oct 18 09:41:07 UTC 2026`.
pub fn generation_date() -> String {
    format_date(Utc::now())
}

pub(crate) fn format_date(date: DateTime<Utc>) -> String {
    date.format("%a %b %d %H:%M:%S UTC %Y").to_string()
}
