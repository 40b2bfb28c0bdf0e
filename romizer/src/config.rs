use std::path::PathBuf;

/// Largest code section when relocation info is wanted.
pub const RELOCATABLE_CODE_SECTION: usize = 50_000;
/// Largest method table section when relocation info is wanted; roughly 40
/// bytes go into each method entry.
pub const RELOCATABLE_METHOD_SECTION: usize = 50_000 / 40;

/// Which file a run produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// The ROM image itself.
    #[default]
    Image,
    /// Method table declarations and the native relocation list.
    Relocations,
    /// Native function table for builds that load classes at run time.
    NativeTable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RomizerConfig {
    pub mode: OutputMode,
    /// Rewrite linked instructions into their fast forms.
    pub quicken: bool,
    /// Drop constant pool entries nothing refers to any more.
    pub compact_pools: bool,
    /// Emit relocation lists and keep sections small enough to relocate.
    pub relocatable: bool,
    pub max_code_section: Option<usize>,
    pub max_method_section: Option<usize>,
    /// Pull classes named by class constants in through the provider.
    pub load_referenced: bool,
    pub warn: bool,
    pub verbose: bool,
    /// Fixed date string for the image header, for reproducible output.
    pub generation_date: Option<String>,
    pub output: PathBuf,
}

impl Default for RomizerConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::Image,
            quicken: true,
            compact_pools: true,
            relocatable: false,
            max_code_section: None,
            max_method_section: None,
            load_referenced: true,
            warn: false,
            verbose: false,
            generation_date: None,
            output: PathBuf::from("ROMjavaUnix.c"),
        }
    }
}

impl RomizerConfig {
    /// Cap on one code section, in bytes. Unbounded unless relocating or set
    /// explicitly.
    pub fn code_section_cap(&self) -> usize {
        self.max_code_section.unwrap_or(if self.relocatable {
            RELOCATABLE_CODE_SECTION
        } else {
            usize::MAX
        })
    }

    /// Cap on one method table section, in methods.
    pub fn method_section_cap(&self) -> usize {
        self.max_method_section.unwrap_or(if self.relocatable {
            RELOCATABLE_METHOD_SECTION
        } else {
            usize::MAX
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_follow_relocation() {
        let mut config = RomizerConfig::default();
        assert_eq!(config.code_section_cap(), usize::MAX);

        config.relocatable = true;
        assert_eq!(config.code_section_cap(), 50_000);
        assert_eq!(config.method_section_cap(), 1250);

        config.max_code_section = Some(100);
        assert_eq!(config.code_section_cap(), 100);
    }
}
