use crate::classfile::attribute::AttributeDecoders;
use crate::classfile::resolved::ClassRecord;
use crate::classfile::{ClassFile, MultiClass, CLASS_MAGIC, MULTICLASS_MAGIC, MULTICLASS_MAJOR, MULTICLASS_MINOR};
use crate::constant_pool::{ClassPool, ConstantPool};
use crate::error::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use romizer_types::JParse;
use std::io::Cursor;

/// Turns class files and multi-class bundles into [`ClassRecord`]s whose
/// constants live in one shared pool.
pub struct ClassReader<'a> {
    pool: &'a mut ConstantPool,
    decoders: &'a AttributeDecoders,
}

impl<'a> ClassReader<'a> {
    pub fn new(pool: &'a mut ConstantPool, decoders: &'a AttributeDecoders) -> Self {
        Self { pool, decoders }
    }

    /// Reads one input stream. `source_name` only labels errors.
    pub fn read(&mut self, source_name: &str, bytes: &[u8]) -> Result<Vec<ClassRecord>> {
        let mut header = Cursor::new(bytes);
        let magic = header
            .read_u32::<BigEndian>()
            .map_err(|error| Error::from_parse(source_name, error))?;

        match magic {
            CLASS_MAGIC => self.read_class(source_name, bytes).map(|record| vec![record]),
            MULTICLASS_MAGIC => {
                let minor = header.read_u16::<BigEndian>().map_err(|error| Error::from_parse(source_name, error))?;
                let major = header.read_u16::<BigEndian>().map_err(|error| Error::from_parse(source_name, error))?;

                if minor != MULTICLASS_MINOR || major != MULTICLASS_MAJOR {
                    return Err(Error::UnsupportedVersion {
                        source_name: source_name.to_string(),
                        major,
                        minor,
                    });
                }

                self.read_bundle(source_name, bytes)
            }
            magic => Err(Error::BadMagic {
                source_name: source_name.to_string(),
                magic,
            }),
        }
    }

    fn read_class(&mut self, source_name: &str, bytes: &[u8]) -> Result<ClassRecord> {
        let class_file = ClassFile::from_bytes(Cursor::new(bytes)).map_err(|error| Error::from_parse(source_name, error))?;

        let class_pool = ClassPool::from_raw(source_name, &class_file.constant_pool, self.pool)?;

        let record = ClassRecord::from_body(
            &class_file.body,
            &class_file.constant_pool,
            class_pool,
            self.pool,
            self.decoders,
        )?;

        log::debug!(
            "read {} ({}.{}, {} fields, {} methods)",
            record.name,
            class_file.major_version,
            class_file.minor_version,
            record.fields.len(),
            record.methods.len()
        );

        Ok(record)
    }

    fn read_bundle(&mut self, source_name: &str, bytes: &[u8]) -> Result<Vec<ClassRecord>> {
        let bundle = MultiClass::from_bytes(Cursor::new(bytes)).map_err(|error| Error::from_parse(source_name, error))?;

        let class_pool = ClassPool::from_raw(source_name, &bundle.constant_pool, self.pool)?;

        let records = bundle
            .classes
            .iter()
            .map(|body| {
                ClassRecord::from_body(
                    body,
                    &bundle.constant_pool,
                    class_pool.clone(),
                    self.pool,
                    self.decoders,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!("read {} classes from bundle {}", records.len(), source_name);

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ClassBuilder;

    #[test]
    fn bad_magic_is_rejected() {
        let mut pool = ConstantPool::new();
        let decoders = AttributeDecoders::default();
        let mut reader = ClassReader::new(&mut pool, &decoders);

        let error = reader.read("junk", &[0xDE, 0xAD, 0xBE, 0xEF, 0, 0]).unwrap_err();
        assert!(matches!(error, Error::BadMagic { magic: 0xDEAD_BEEF, .. }));
    }

    #[test]
    fn truncated_input_is_a_format_error() {
        let mut pool = ConstantPool::new();
        let decoders = AttributeDecoders::default();
        let mut reader = ClassReader::new(&mut pool, &decoders);

        let mut bytes = ClassBuilder::new("A").build();
        bytes.truncate(bytes.len() - 3);

        assert!(matches!(reader.read("A.class", &bytes).unwrap_err(), Error::Format { .. }));
    }

    #[test]
    fn bundle_version_is_checked() {
        let mut pool = ConstantPool::new();
        let decoders = AttributeDecoders::default();
        let mut reader = ClassReader::new(&mut pool, &decoders);

        let mut bytes = ClassBuilder::bundle(vec![ClassBuilder::new("A")]);
        bytes[5] = 2;

        assert!(matches!(
            reader.read("bundle", &bytes).unwrap_err(),
            Error::UnsupportedVersion { minor: 2, major: 0, .. }
        ));
    }

    #[test]
    fn bundle_classes_share_entries() {
        let mut pool = ConstantPool::new();
        let decoders = AttributeDecoders::default();
        let mut reader = ClassReader::new(&mut pool, &decoders);

        let bytes = ClassBuilder::bundle(vec![
            ClassBuilder::new("A").method("get", "()I", &[0x04, 0xAC]),
            ClassBuilder::new("B").superclass("A").method("get", "()I", &[0x05, 0xAC]),
        ]);

        let records = reader.read("bundle", &bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_str(), "A");
        assert_eq!(records[1].super_name.as_deref().map(String::as_str), Some("A"));
        assert_eq!(records[0].methods[0].name, records[1].methods[0].name);
        assert_eq!(records[0].pool, records[1].pool);
    }

    #[test]
    fn single_class_reads_members() {
        let mut pool = ConstantPool::new();
        let decoders = AttributeDecoders::default();
        let mut reader = ClassReader::new(&mut pool, &decoders);

        let bytes = ClassBuilder::new("A")
            .field("count", "I", 0)
            .method("get", "()I", &[0x04, 0xAC])
            .build();

        let records = reader.read("A.class", &bytes).unwrap();
        let record = &records[0];

        assert_eq!(record.super_name.as_deref().map(String::as_str), Some("java/lang/Object"));
        assert_eq!(record.fields[0].name.as_str(), "count");
        assert_eq!(record.methods[0].code().unwrap().bytes, vec![0x04, 0xAC]);
    }
}
