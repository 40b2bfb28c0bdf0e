use crate::error::{Error, Result};
use std::fmt::Display;
use std::io::{self, Write};

/// Line-oriented writer for generated C. The first I/O error is kept and
/// every later write is skipped, so emission code never has to check; the
/// error comes back from [`CodeWriter::finish`].
pub struct CodeWriter<W: Write> {
    inner: W,
    error: Option<io::Error>,
}

impl<W: Write> CodeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, error: None }
    }

    pub fn print(&mut self, text: impl Display) {
        if self.error.is_none() {
            if let Err(error) = write!(self.inner, "{}", text) {
                self.error = Some(error);
            }
        }
    }

    pub fn println(&mut self, text: impl Display) {
        self.print(text);
        self.newline();
    }

    pub fn newline(&mut self) {
        self.print('\n');
    }

    /// Page break between the major parts of an image.
    pub fn page(&mut self) {
        self.println('\u{c}');
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Prints `printer(i)` for `start..end`, `columns` to a line, separated
    /// by commas. Nothing is printed for an empty range.
    pub fn write_array(&mut self, start: usize, end: usize, columns: usize, indent: &str, mut printer: impl FnMut(usize) -> String) {
        if start >= end {
            return;
        }

        self.print(indent);
        let mut column = 0;

        for index in start..end {
            if column >= columns {
                self.print(format_args!("\n{}", indent));
                column = 1;
            } else {
                column += 1;
            }

            self.print(printer(index));

            if index + 1 < end {
                self.print(", ");
            } else {
                self.newline();
            }
        }
    }

    /// Flushes and hands back the sink, or the error that stopped output.
    pub fn finish(mut self, target: &str) -> Result<W> {
        if self.error.is_none() {
            if let Err(error) = self.inner.flush() {
                self.error = Some(error);
            }
        }

        match self.error {
            None => Ok(self.inner),
            Some(error) => {
                log::error!("{}: {}", target, error);
                Err(Error::OutputWrite {
                    target: target.to_string(),
                })
            }
        }
    }
}

pub fn hex(value: impl Into<u32>) -> String {
    format!("0x{:x}", value.into())
}

/// Integer literal; the most negative value is spelled so C compilers take
/// it without complaint.
pub fn int_literal(value: i32) -> String {
    if value == i32::MIN {
        "(long)0x80000000".to_string()
    } else {
        value.to_string()
    }
}

/// Body of a C string literal holding `bytes`.
pub fn safe_string(bytes: &[u8]) -> String {
    let mut safe = String::with_capacity(bytes.len());

    for byte in bytes {
        match byte {
            b'"' => safe.push_str("\\\""),
            b'\\' => safe.push_str("\\\\"),
            0x20..=0x7E => safe.push(*byte as char),
            _ => safe.push_str(&format!("\\{:03o}", byte)),
        }
    }

    safe
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(f: impl FnOnce(&mut CodeWriter<Vec<u8>>)) -> String {
        let mut out = CodeWriter::new(Vec::new());
        f(&mut out);
        String::from_utf8(out.finish("test").unwrap()).unwrap()
    }

    #[test]
    fn arrays_wrap_at_the_column_count() {
        let text = render(|out| out.write_array(0, 5, 2, "\t", |index| index.to_string()));
        assert_eq!(text, "\t0, 1, \n\t2, 3, \n\t4\n");
    }

    #[test]
    fn arrays_honour_their_start() {
        let text = render(|out| out.write_array(3, 5, 8, "  ", |index| format!("x{}", index)));
        assert_eq!(text, "  x3, x4\n");
        assert_eq!(render(|out| out.write_array(2, 2, 8, "  ", |_| unreachable!())), "");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(safe_string(b"a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(safe_string(&[1, b'x', 0xC0]), "\\001x\\300");
    }

    #[test]
    fn literals() {
        assert_eq!(hex(255u16), "0xff");
        assert_eq!(int_literal(-5), "-5");
        assert_eq!(int_literal(i32::MIN), "(long)0x80000000");
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_errors_stick() {
        let mut out = CodeWriter::new(Broken);
        out.println("first");
        out.println("second");

        assert!(out.failed());
        assert!(matches!(out.finish("image.c"), Err(Error::OutputWrite { target }) if target == "image.c"));
    }
}
