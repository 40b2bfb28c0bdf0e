//! C identifiers and human-readable names for classes and members.

use crate::classfile::resolved::{ClassRecord, Method};
use crate::keys::ClassName;
use std::collections::HashMap;

/// JNI-style escaping of a Java name into identifier characters.
pub fn mangle(name: &str) -> String {
    let mut mangled = String::with_capacity(name.len());

    for c in name.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => mangled.push(c),
            '/' => mangled.push('_'),
            '_' => mangled.push_str("_1"),
            ';' => mangled.push_str("_2"),
            '[' => mangled.push_str("_3"),
            _ => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    mangled.push_str(&format!("_0{:04x}", unit));
                }
            }
        }
    }

    mangled
}

fn primitive_word(c: u8) -> Option<&'static str> {
    Some(match c {
        b'Z' => "Boolean",
        b'B' => "Byte",
        b'C' => "Char",
        b'S' => "Short",
        b'I' => "Int",
        b'J' => "Long",
        b'F' => "Float",
        b'D' => "Double",
        _ => return None,
    })
}

fn element_suffix(element: &str) -> String {
    if let Some(inner) = element.strip_prefix('[') {
        return format!("ArrayOf{}", element_suffix(inner));
    }

    if let Some(class) = element.strip_prefix('L').and_then(|rest| rest.strip_suffix(';')) {
        return format!("_{}", mangle(class));
    }

    match element.as_bytes() {
        [c] => primitive_word(*c).map(String::from).unwrap_or_else(|| mangle(element)),
        _ => mangle(element),
    }
}

/// Member name of a class inside `AllClassblocks`.
pub fn class_native_name(name: &str) -> String {
    match name.strip_prefix('[') {
        Some(element) => format!("manufacturedArrayOf{}", element_suffix(element)),
        None => mangle(name),
    }
}

fn method_word(name: &str) -> String {
    match name {
        "<init>" => "init".to_string(),
        "<clinit>" => "clinit".to_string(),
        _ => mangle(name),
    }
}

/// Identifiers of one class's methods: the code block name of each method
/// and the C function implementing each native.
#[derive(Clone, Debug)]
pub struct MethodNames {
    pub class: String,
    pub code: Vec<String>,
    pub native: Vec<Option<String>>,
}

impl MethodNames {
    pub fn new(record: &ClassRecord) -> Self {
        let class = class_native_name(&record.name);

        let mut uses: HashMap<&str, usize> = HashMap::new();
        for method in &record.methods {
            *uses.entry(method.name.as_str()).or_default() += 1;
        }

        let code = record
            .methods
            .iter()
            .enumerate()
            .map(|(index, method)| {
                let base = format!("{}_{}", class, method_word(&method.name));
                if uses[method.name.as_str()] > 1 {
                    format!("{}_{}", base, index)
                } else {
                    base
                }
            })
            .collect();

        let native = record
            .methods
            .iter()
            .map(|method| method.is_native().then(|| native_function(&class, record, method)))
            .collect();

        Self { class, code, native }
    }
}

/// True when another native method of the class shares this one's name.
pub fn is_overloaded_native(record: &ClassRecord, method: &Method) -> bool {
    record
        .methods
        .iter()
        .any(|other| other.index != method.index && other.is_native() && other.name == method.name)
}

fn native_function(class: &str, record: &ClassRecord, method: &Method) -> String {
    let mut name = format!("Java_{}_{}", class, mangle(&method.name));

    if is_overloaded_native(record, method) {
        let args = method
            .descriptor
            .strip_prefix('(')
            .and_then(|rest| rest.split(')').next())
            .unwrap_or("");
        name.push_str("__");
        name.push_str(&mangle(args));
    }

    name
}

/// Readable form of one type starting at `index` of a descriptor. Returns
/// the index after it.
fn type_name(descriptor: &str, index: usize, result: &mut String) -> usize {
    let bytes = descriptor.as_bytes();

    let word = match bytes.get(index) {
        Some(b'V') => "void",
        Some(b'Z') => "boolean",
        Some(b'B') => "byte",
        Some(b'S') => "short",
        Some(b'C') => "char",
        Some(b'I') => "int",
        Some(b'J') => "long",
        Some(b'F') => "float",
        Some(b'D') => "double",
        Some(b'L') => {
            let end = descriptor[index..].find(';').map_or(descriptor.len(), |end| index + end);
            let class = &descriptor[index + 1..end];
            let class = class.strip_prefix("java/lang/").unwrap_or(class);
            result.push_str(&class.replace('/', "."));
            return end + 1;
        }
        Some(b'[') => {
            let end = type_name(descriptor, index + 1, result);
            result.push_str("[]");
            return end;
        }
        _ => {
            result.push('?');
            return descriptor.len();
        }
    };

    result.push_str(word);
    index + 1
}

/// `int get(String, long[])`, without a result type for constructors and
/// initializers.
pub fn pretty_method(name: &str, descriptor: &str) -> String {
    let close = descriptor.rfind(')').unwrap_or(descriptor.len());
    let mut result = String::new();

    if name != "<init>" && name != "<clinit>" && close < descriptor.len() {
        type_name(descriptor, close + 1, &mut result);
        result.push(' ');
    }

    result.push_str(name);
    result.push('(');

    let mut index = 1;
    while index < close {
        if index > 1 {
            result.push_str(", ");
        }
        index = type_name(descriptor, index, &mut result);
    }

    result.push(')');
    result
}

pub fn pretty_field(name: &str, descriptor: &str) -> String {
    let mut result = String::new();
    type_name(descriptor, 0, &mut result);
    result.push(' ');
    result.push_str(name);
    result
}

/// Native name for any entry of the class table.
pub fn table_native_name(name: &ClassName) -> String {
    class_native_name(&name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_mangle_like_jni() {
        assert_eq!(class_native_name("java/lang/Object"), "java_lang_Object");
        assert_eq!(class_native_name("a/b_c/D$E"), "a_b_1c_D_00024E");
    }

    #[test]
    fn array_names_are_manufactured() {
        assert_eq!(class_native_name("[C"), "manufacturedArrayOfChar");
        assert_eq!(class_native_name("[[I"), "manufacturedArrayOfArrayOfInt");
        assert_eq!(
            class_native_name("[Ljava/lang/String;"),
            "manufacturedArrayOf_java_lang_String"
        );
    }

    #[test]
    fn pretty_names_read_like_java() {
        assert_eq!(pretty_method("get", "(Ljava/lang/String;[J)I"), "int get(String, long[])");
        assert_eq!(pretty_method("<init>", "(Ljava/util/Vector;)V"), "<init>(java.util.Vector)");
        assert_eq!(pretty_method("run", "()V"), "void run()");
        assert_eq!(pretty_field("table", "[[Ljava/lang/Object;"), "Object[][] table");
    }

    #[test]
    fn mangling_escapes_separators() {
        assert_eq!(mangle("[Ljava/lang/String;"), "_3Ljava_lang_String_2");
        assert_eq!(mangle("a_b"), "a_1b");
    }
}
