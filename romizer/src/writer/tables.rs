//! The shared tables of an image: UTF names, interned strings and the
//! bucket arrays the runtime hashes into.

use super::names::table_native_name;
use super::output::{hex, safe_string, CodeWriter};
use crate::error::Result;
use crate::keys::name_table::{key_suffix, ustring};
use crate::keys::string_table::reference;
use crate::keys::{ClassTable, NameTable, StringTable};
use std::collections::BTreeSet;
use std::io::Write;

const MAX_COMMENT: usize = 20;

/// Writes a ROM hashtable of `heads.len()` buckets, each the first entry
/// of its chain or `NULL`.
pub fn write_hashtable<W: Write>(out: &mut CodeWriter<W>, name: &str, count: usize, heads: &[Option<String>], columns: usize) {
    let size = heads.len();

    out.println(format_args!("static CONST HASHTABLE_X({}) {}Data = {{", size, name));
    out.println(format_args!("\tHASHTABLE_HEADER({}, {}),", size, count));
    out.println("\t{");
    out.write_array(0, size, columns, "\t\t", |bucket| {
        heads[bucket].clone().unwrap_or_else(|| "NULL".to_string())
    });
    out.println("\t}");
    out.println("};");
    out.println(format_args!("HASHTABLE {} = (HASHTABLE)&{}Data;", name, name));
    out.newline();
}

/// `AllUTFStrings` ordered by key, then the `UTFStringTable` over it.
pub fn write_name_table<W: Write>(out: &mut CodeWriter<W>, names: &NameTable, classes: &ClassTable) {
    let table = names.table();

    let mut all: Vec<(&Vec<u8>, u16)> = table.iter_buckets().collect();
    all.sort_by_key(|(_, key)| *key);

    let lengths: BTreeSet<usize> = all.iter().map(|(bytes, _)| bytes.len()).collect();
    for length in &lengths {
        out.println(format_args!("DECLARE_USTRING_STRUCT({});", length));
    }
    out.newline();
    out.newline();

    out.println("static CONST struct AllUTFStrings_Struct {");
    for (bytes, key) in &all {
        out.println(format_args!("\tstruct UTF_Hash_Entry_{} U{};", bytes.len(), key_suffix(*key)));
    }

    out.println("} AllUTFStrings = {");
    for (bytes, key) in &all {
        let next = table
            .next(*bytes)
            .and_then(|next| table.get(next))
            .map(ustring)
            .unwrap_or_else(|| "NULL".to_string());

        out.print(format_args!(
            "\tUSTRING({}, {}, {}, \"{}\"),",
            key_suffix(*key),
            next,
            bytes.len(),
            safe_string(bytes)
        ));

        if bytes.first().is_some_and(|first| *first < 20) {
            if let Some(signature) = classes.decode_method_signature(bytes) {
                out.print(format_args!(" /* {} */", signature));
            }
        }
        out.newline();
    }
    out.println("};");
    out.newline();

    let heads: Vec<Option<String>> = (0..table.size())
        .map(|bucket| table.first(bucket).and_then(|first| table.get(first)).map(ustring))
        .collect();
    write_hashtable(out, "UTFStringTable", table.len(), &heads, 4);
}

fn char_literal(c: u16) -> String {
    match c {
        0x5C => "'\\\\'".to_string(),
        0x27 => "'\\''".to_string(),
        0x20..=0x7E => format!("'{}' ", c as u8 as char),
        _ => hex(c),
    }
}

/// The characters of every interned string, the string instances over
/// them and the `InternStringTable`. Returns the number of strings.
pub fn write_string_table<W: Write>(out: &mut CodeWriter<W>, strings: &StringTable) -> Result<usize> {
    let (chars, ranges) = strings.arrange();

    if !chars.is_empty() {
        out.println(format_args!("static CONST CHARARRAY_X({}) stringCharArrayInternal = {{", chars.len()));
        out.println(format_args!("\tCHARARRAY_HEADER({}),", chars.len()));
        out.println("\t{");
        out.write_array(0, chars.len(), 10, "\t\t", |index| char_literal(chars[index]));
        out.println("\t}");
        out.println("};");
        out.newline();
    }

    out.println(format_args!(
        "static CONST struct internedStringInstanceStruct stringArrayInternal[{}] = {{",
        strings.len()
    ));

    for (string, range) in strings.strings().zip(&ranges) {
        let shown: String = if string.chars().count() > MAX_COMMENT {
            string.chars().take(MAX_COMMENT - 3).chain("...".chars()).collect()
        } else {
            string.to_string()
        };
        out.println(format_args!("\t\t/* {} */", safe_string(shown.as_bytes())));

        let next = strings.next(string).map(reference).unwrap_or_else(|| "0".to_string());
        out.println(format_args!("\tKVM_INIT_JAVA_STRING({}, {}, {}), ", range.offset, range.length, next));
    }

    out.println("};");
    out.newline();
    out.newline();

    let table = strings.table();
    let heads: Vec<Option<String>> = (0..table.size())
        .map(|bucket| table.first(bucket).and_then(|first| table.get(first)).map(reference))
        .collect();
    write_hashtable(out, "InternStringTable", table.len(), &heads, 4);

    Ok(strings.len())
}

/// The `ClassTable` over `AllClassblocks`.
pub fn write_class_table<W: Write>(out: &mut CodeWriter<W>, classes: &ClassTable) {
    let table = classes.table();

    let heads: Vec<Option<String>> = (0..table.size())
        .map(|bucket| {
            table
                .first(bucket)
                .map(|name| format!("&AllClassblocks.{} /* {} */", table_native_name(name), name))
        })
        .collect();

    write_hashtable(out, "ClassTable", table.len(), &heads, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn render(f: impl FnOnce(&mut CodeWriter<Vec<u8>>)) -> String {
        let mut out = CodeWriter::new(Vec::new());
        f(&mut out);
        String::from_utf8(out.finish("tables").unwrap()).unwrap()
    }

    #[test]
    fn hashtables_list_every_bucket() {
        let heads = vec![Some("&a".to_string()), None, None];
        let text = render(|out| write_hashtable(out, "T", 1, &heads, 4));

        assert_eq!(
            text,
            "static CONST HASHTABLE_X(3) TData = {\n\
             \tHASHTABLE_HEADER(3, 1),\n\
             \t{\n\
             \t\t&a, NULL, NULL\n\
             \t}\n\
             };\n\
             HASHTABLE T = (HASHTABLE)&TData;\n\n"
        );
    }

    #[test]
    fn names_are_sorted_by_key_and_chained() {
        let mut names = NameTable::new();
        let mut classes = ClassTable::new();
        // both in bucket 1
        names.key_bytes(vec![0, 1]).unwrap();
        names.key_bytes(vec![1]).unwrap();
        classes.encode_method_signature(&mut names, "()V").unwrap();
        names.key_bytes(vec![0, b'V']).unwrap();

        let text = render(|out| write_name_table(out, &names, &classes));

        assert!(text.starts_with("DECLARE_USTRING_STRUCT(1);\nDECLARE_USTRING_STRUCT(2);\n\n\n"));
        assert!(text.contains("\tUSTRING(0101, NULL, 2, \"\\000\\001\"),\n"));
        assert!(text.contains("\tUSTRING(0201, &AllUTFStrings.U0101, 1, \"\\001\"),\n"));
        assert!(text.contains(" /* ()V */\n"));
        assert!(text.find("U0101;").unwrap() < text.find("U0201;").unwrap());
        assert!(text.contains("\tHASHTABLE_HEADER(256, 3),\n"));
    }

    #[test]
    fn strings_share_one_character_array() {
        let mut strings = StringTable::new();
        strings.intern(Arc::new("a'b".to_string())).unwrap();
        strings.intern(Arc::new("A".to_string())).unwrap();

        let mut count = 0;
        let text = render(|out| count = write_string_table(out, &strings).unwrap());

        assert_eq!(count, 2);
        assert!(text.starts_with("static CONST CHARARRAY_X(4) stringCharArrayInternal = {\n\tCHARARRAY_HEADER(4),\n"));
        assert!(text.contains("\t\t'a' , '\\'', 'b' , 'A' \n"));
        assert!(text.contains("\tKVM_INIT_JAVA_STRING(0, 3, 0), \n"));
        assert!(text.contains("\tKVM_INIT_JAVA_STRING(3, 1, 0), \n"));
        assert!(text.contains("stringArrayInternal[2] = {"));
    }

    #[test]
    fn long_strings_are_abbreviated_in_comments() {
        let mut strings = StringTable::new();
        strings.intern(Arc::new("abcdefghijklmnopqrstuvwxyz".to_string())).unwrap();

        let text = render(|out| {
            write_string_table(out, &strings).unwrap();
        });

        assert!(text.contains("\t\t/* abcdefghijklmnopq... */\n"));
    }
}
