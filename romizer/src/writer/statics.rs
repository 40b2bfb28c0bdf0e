use super::output::{int_literal, CodeWriter};
use crate::classfile::resolved::ClassKind;
use crate::constant_pool::{Constant, ConstantPool, FieldId};
use crate::error::{Error, Result};
use crate::keys::StringTable;
use crate::registry::ClassRegistry;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// Initial contents of one word of the static store.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Zero,
    /// Ints and floats, the latter by bit pattern.
    Int(i32),
    String(Arc<String>),
    /// First word of a long or double; the second is [`Cell::Low`].
    High { double: bool, value: i32 },
    Low(i32),
}

/// Every static field of every class in one array of words. Word 0 holds
/// the number of reference statics, which come next so the collector can
/// scan them as a flat root array; scalars follow.
#[derive(Debug)]
pub struct StaticStore {
    offsets: HashMap<FieldId, u16>,
    cells: Vec<Cell>,
    roots: usize,
}

impl StaticStore {
    pub fn layout(registry: &ClassRegistry, pool: &ConstantPool) -> Result<Self> {
        let statics = || {
            registry
                .iter()
                .filter(|record| record.kind == ClassKind::Instance)
                .flat_map(|record| record.fields.iter().filter(|field| field.is_static()))
        };

        let roots = statics().filter(|field| field.field_type.is_reference()).count();
        let words = 1 + statics().map(|field| field.cells() as usize).sum::<usize>();

        if words > u16::MAX as usize {
            return Err(Error::internal(format!("{} static words do not fit the store", words)));
        }

        let mut cells = vec![Cell::Zero; words];
        cells[0] = Cell::Int(roots as i32);

        let mut offsets = HashMap::new();
        let mut reference = 1;
        let mut scalar = 1 + roots;

        for field in statics() {
            let id = FieldId {
                class: field.class,
                index: field.index,
            };

            let offset = if field.field_type.is_reference() {
                reference += 1;
                reference - 1
            } else {
                scalar += field.cells() as usize;
                scalar - field.cells() as usize
            };
            offsets.insert(id, offset as u16);

            let Some(entry) = field.constant_value() else {
                continue;
            };

            match pool.constant(entry) {
                Constant::Integer(value) => cells[offset] = Cell::Int(*value),
                Constant::Float(value) => cells[offset] = Cell::Int(value.to_bits() as i32),
                Constant::String(_) => {
                    let string = pool
                        .string(entry)
                        .ok_or_else(|| Error::internal(format!("string constant of {} has no body", field.name)))?;
                    cells[offset] = Cell::String(string.clone());
                }
                Constant::Long(value) => split(&mut cells, offset, *value as u64, false),
                Constant::Double(value) => split(&mut cells, offset, value.to_bits(), true),
                other => {
                    let class = &registry.class(field.class).name;
                    return Err(Error::format(
                        class.as_str(),
                        format!("field {} has constant value of tag {}", field.name, other.tag()),
                    ));
                }
            }
        }

        Ok(Self { offsets, cells, roots })
    }

    pub fn offset(&self, field: FieldId) -> Option<u16> {
        self.offsets.get(&field).copied()
    }

    /// Words in the store, the count word included.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.len() == 1
    }

    pub fn roots(&self) -> usize {
        self.roots
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// String statics that need a place in the string table.
    pub fn strings(&self) -> impl Iterator<Item = &Arc<String>> {
        self.cells.iter().filter_map(|cell| match cell {
            Cell::String(string) => Some(string),
            _ => None,
        })
    }

    fn cell_text(&self, index: usize, strings: &StringTable) -> Result<String> {
        Ok(match &self.cells[index] {
            Cell::Zero => int_literal(0),
            Cell::Int(value) => format!("ROM_STATIC_INT({})", int_literal(*value)),
            Cell::String(string) => format!("ROM_STATIC_STRING({})", strings.reference(string)?),
            Cell::High { double, value } => format!(
                "ROM_STATIC_{}({}",
                if *double { "DOUBLE" } else { "LONG" },
                int_literal(*value)
            ),
            Cell::Low(value) => format!("{})", int_literal(*value)),
        })
    }

    pub fn write<W: Write>(&self, out: &mut CodeWriter<W>, strings: &StringTable) -> Result<()> {
        let words = self.cells.len();
        let roots = self.roots;

        let texts = (0..words)
            .map(|index| self.cell_text(index, strings))
            .collect::<Result<Vec<_>>>()?;

        out.println(format_args!("long KVM_staticData[{}];", words));
        out.println("struct {");
        out.println("\tlong count;");
        out.println(format_args!("\tINSTANCE roots[{}];", roots));
        out.println(format_args!("\tlong nonRoots[{}];", words - roots - 1));
        out.println("} KVM_masterStaticData= {");
        out.println(format_args!("\t{},", roots));
        out.println("\t{");
        out.write_array(1, roots + 1, 8, "\t\t", |index| texts[index].clone());
        out.println("\t},");
        out.println("\t{");
        out.write_array(roots + 1, words, 4, "\t\t", |index| texts[index].clone());
        out.println("\t}");
        out.println("};");
        out.newline();

        Ok(())
    }
}

fn split(cells: &mut [Cell], offset: usize, bits: u64, double: bool) {
    cells[offset] = Cell::High {
        double,
        value: (bits >> 32) as u32 as i32,
    };
    cells[offset + 1] = Cell::Low(bits as u32 as i32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClassBuilder, Fixture, Sym};
    use std::sync::Arc;

    fn fixture() -> Fixture {
        Fixture::linked(vec![
            ClassBuilder::root(),
            ClassBuilder::new("A")
                .static_field("count", "I", Some(Sym::Int(7)))
                .static_field("name", "Ljava/lang/String;", Some(Sym::string("hi")))
                .static_field("big", "J", Some(Sym::Long(0x1_0000_0002)))
                .field("x", "I", 0),
            ClassBuilder::new("B")
                .static_field("table", "[I", None)
                .static_field("ratio", "F", Some(Sym::Float(1.0))),
        ])
        .unwrap()
    }

    fn field(fixture: &Fixture, class: &str, index: usize) -> FieldId {
        FieldId {
            class: fixture.registry.id(class).unwrap(),
            index,
        }
    }

    #[test]
    fn references_come_first() {
        let fixture = fixture();
        let store = StaticStore::layout(&fixture.registry, &fixture.pool).unwrap();

        assert_eq!(store.roots(), 2);
        assert_eq!(store.len(), 1 + 2 + 1 + 2 + 1);

        assert_eq!(store.offset(field(&fixture, "A", 1)), Some(1));
        assert_eq!(store.offset(field(&fixture, "B", 0)), Some(2));
        assert_eq!(store.offset(field(&fixture, "A", 0)), Some(3));
        assert_eq!(store.offset(field(&fixture, "A", 2)), Some(4));
        assert_eq!(store.offset(field(&fixture, "B", 1)), Some(6));
        assert_eq!(store.offset(field(&fixture, "A", 3)), None);
    }

    #[test]
    fn initial_values_come_from_constants() {
        let fixture = fixture();
        let store = StaticStore::layout(&fixture.registry, &fixture.pool).unwrap();

        assert_eq!(store.cells()[0], Cell::Int(2));
        assert_eq!(store.cells()[1], Cell::String(Arc::new("hi".into())));
        assert_eq!(store.cells()[2], Cell::Zero);
        assert_eq!(store.cells()[3], Cell::Int(7));
        assert_eq!(store.cells()[4], Cell::High { double: false, value: 1 });
        assert_eq!(store.cells()[5], Cell::Low(2));
        assert_eq!(store.cells()[6], Cell::Int(1.0f32.to_bits() as i32));
    }

    #[test]
    fn store_is_written_roots_then_scalars() {
        let fixture = fixture();
        let store = StaticStore::layout(&fixture.registry, &fixture.pool).unwrap();

        let mut strings = StringTable::new();
        for string in store.strings() {
            strings.intern(string.clone()).unwrap();
        }

        let mut out = CodeWriter::new(Vec::new());
        store.write(&mut out, &strings).unwrap();
        let text = String::from_utf8(out.finish("statics").unwrap()).unwrap();

        assert_eq!(
            text,
            "long KVM_staticData[7];\n\
             struct {\n\
             \tlong count;\n\
             \tINSTANCE roots[2];\n\
             \tlong nonRoots[4];\n\
             } KVM_masterStaticData= {\n\
             \t2,\n\
             \t{\n\
             \t\tROM_STATIC_STRING(&stringArrayInternal[0]), 0\n\
             \t},\n\
             \t{\n\
             \t\tROM_STATIC_INT(7), ROM_STATIC_LONG(1, 2), ROM_STATIC_INT(1065353216)\n\
             \t}\n\
             };\n\n"
        );
    }

    #[test]
    fn strings_must_be_interned_before_writing() {
        let fixture = fixture();
        let store = StaticStore::layout(&fixture.registry, &fixture.pool).unwrap();

        let mut out = CodeWriter::new(Vec::new());
        assert!(store.write(&mut out, &StringTable::new()).is_err());
    }
}
