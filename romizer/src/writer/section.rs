use super::output::CodeWriter;
use std::io::Write;

/// Whether a sectioned aggregate is being declared or initialised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionMode {
    Definition,
    Initialization,
}

/// Splits one large structure into numbered `sectionN` members, none of
/// which grows past `max` units. Items never straddle a boundary; a dummy
/// word keeps neighbouring sections apart.
#[derive(Debug)]
pub struct SectionCounter {
    max: usize,
    mode: SectionMode,
    offset: usize,
    total: usize,
    section: usize,
    sizes: Vec<usize>,
}

impl SectionCounter {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            mode: SectionMode::Definition,
            offset: 0,
            total: 0,
            section: 1,
            sizes: Vec::new(),
        }
    }

    pub fn start_first<W: Write>(&mut self, out: &mut CodeWriter<W>, mode: SectionMode) {
        self.mode = mode;
        self.offset = 0;
        self.total = 0;
        self.section = 1;
        self.sizes.clear();
        self.start(out);
    }

    fn start<W: Write>(&mut self, out: &mut CodeWriter<W>) {
        match self.mode {
            SectionMode::Definition => out.println("\tstruct {"),
            SectionMode::Initialization => out.println("\t{"),
        }
    }

    /// Makes room for an item of `length` units, opening a new section
    /// first if it would not fit. An empty section is never closed.
    pub fn maybe_next_section<W: Write>(&mut self, out: &mut CodeWriter<W>, length: usize) {
        if self.offset > 0 && self.offset.saturating_add(length) > self.max {
            self.end(out, false);
            self.section += 1;
            self.start(out);
        }
        self.offset += length;
    }

    /// Counts units that must stay in the current section, such as
    /// alignment padding.
    pub fn not_next_section(&mut self, length: usize) {
        self.offset += length;
    }

    pub fn end_last_section<W: Write>(&mut self, out: &mut CodeWriter<W>) {
        self.end(out, true);
    }

    fn end<W: Write>(&mut self, out: &mut CodeWriter<W>, last: bool) {
        let section = self.section;

        match (self.mode, last) {
            (SectionMode::Definition, true) => out.println(format_args!("\t}} section{};", section)),
            (SectionMode::Definition, false) => {
                out.println(format_args!("\t}} section{};", section));
                out.println(format_args!("\tlong dummy{};", section));
            }
            (SectionMode::Initialization, true) => {
                out.println(format_args!("\t}} /* section {} (size {}) */", section, self.offset))
            }
            (SectionMode::Initialization, false) => {
                out.println(format_args!("\t}}, /* section {} (size {}) */", section, self.offset));
                out.println("\t0, /* dummy separator */");
            }
        }

        self.total += self.offset;
        self.sizes.push(self.offset);
        self.offset = 0;
    }

    /// Units already placed in the open section.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of the section the last item went into.
    pub fn section(&self) -> usize {
        self.section
    }

    /// Units placed in every closed section.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Lists every section as a relocatable resource.
    pub fn print_relocation_info<W: Write>(&self, out: &mut CodeWriter<W>, structure: &str, resource: &str) {
        let count = self.sizes.len();

        out.println(format_args!("#define NUMBER_OF_{}_RESOURCES {}", resource, count));
        out.println(format_args!("#define ALL_{}_RESOURCES  \\", resource));

        for section in 1..=count {
            out.print(format_args!("\t\tSTRUCTURE_ENTRY({}.section{})", structure, section));
            if section < count {
                out.println(", \\");
            } else {
                out.newline();
            }
        }
        out.newline();
    }
}
