//! Minimal JVM class file reader.
//!
//! Only the structural metadata needed for entry-class discovery is decoded:
//! the class name, its super class and the descriptors of every annotation in
//! the `RuntimeVisibleAnnotations` and `RuntimeInvisibleAnnotations` class
//! attributes. Field and method bodies are skipped without interpretation.

const MAGIC: u32 = 0xCAFE_BABE;

const RUNTIME_VISIBLE_ANNOTATIONS: &str = "RuntimeVisibleAnnotations";
const RUNTIME_INVISIBLE_ANNOTATIONS: &str = "RuntimeInvisibleAnnotations";

/// Structural metadata of a single class file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Internal class name, e.g. `com/example/MyPlugin`.
    pub name: String,
    /// Internal super class name, `None` for `java/lang/Object` itself.
    pub super_name: Option<String>,
    /// Class file major version.
    pub major_version: u16,
    /// Descriptors of runtime-visible annotations.
    pub visible_annotations: Vec<String>,
    /// Descriptors of runtime-invisible annotations.
    pub invisible_annotations: Vec<String>,
}

impl ClassInfo {
    /// Fully qualified name with package separators normalized to dots.
    pub fn dotted_name(&self) -> String {
        self.name.replace('/', ".")
    }

    /// Iterate visible then invisible annotation descriptors.
    pub fn annotations(&self) -> impl Iterator<Item = &str> {
        self.visible_annotations
            .iter()
            .chain(self.invisible_annotations.iter())
            .map(String::as_str)
    }

    /// Check whether the class carries an annotation with the given descriptor.
    pub fn has_annotation(&self, descriptor: &str) -> bool {
        self.annotations().any(|a| a == descriptor)
    }
}

/// Error produced while decoding a class file.
///
/// Carries no path; callers attach the file location when converting into
/// [`crate::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFormatError(pub String);

impl std::fmt::Display for ClassFormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ClassFormatError {}

type ParseResult<T> = std::result::Result<T, ClassFormatError>;

#[derive(Debug, Clone)]
enum Constant {
    Utf8(String),
    Class(u16),
    Other,
    /// Second slot of a Long or Double entry.
    Unusable,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> ParseResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                ClassFormatError(format!(
                    "truncated class file: wanted {} bytes at offset {}",
                    len, self.pos
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> ParseResult<()> {
        self.take(len).map(|_| ())
    }

    fn u1(&mut self) -> ParseResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u2(&mut self) -> ParseResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u4(&mut self) -> ParseResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn read(reader: &mut Reader<'_>) -> ParseResult<Self> {
        let count = reader.u2()? as usize;
        // Index 0 is never valid.
        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);

        while entries.len() < count {
            let tag = reader.u1()?;
            match tag {
                1 => {
                    let len = reader.u2()? as usize;
                    let raw = reader.take(len)?;
                    entries.push(Constant::Utf8(decode_modified_utf8(raw)));
                }
                3 | 4 => {
                    reader.skip(4)?;
                    entries.push(Constant::Other);
                }
                5 | 6 => {
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    entries.push(Constant::Unusable);
                }
                7 => entries.push(Constant::Class(reader.u2()?)),
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    entries.push(Constant::Other);
                }
                9 | 10 | 11 | 12 | 17 | 18 => {
                    reader.skip(4)?;
                    entries.push(Constant::Other);
                }
                15 => {
                    reader.skip(3)?;
                    entries.push(Constant::Other);
                }
                other => {
                    return Err(ClassFormatError(format!(
                        "unknown constant pool tag {} at index {}",
                        other,
                        entries.len()
                    )))
                }
            }
        }

        Ok(Self { entries })
    }

    fn utf8(&self, index: u16) -> ParseResult<&str> {
        match self.entries.get(index as usize) {
            Some(Constant::Utf8(s)) => Ok(s),
            _ => Err(ClassFormatError(format!(
                "constant pool index {} is not a Utf8 entry",
                index
            ))),
        }
    }

    fn class_name(&self, index: u16) -> ParseResult<&str> {
        match self.entries.get(index as usize) {
            Some(Constant::Class(name_index)) => self.utf8(*name_index),
            _ => Err(ClassFormatError(format!(
                "constant pool index {} is not a Class entry",
                index
            ))),
        }
    }
}

/// Decode a class file's modified UTF-8 string.
///
/// Class and annotation names are plain ASCII in practice; anything the
/// standard decoder rejects (encoded NUL, surrogate pairs) is decoded lossily.
fn decode_modified_utf8(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Parse a class file's structural metadata.
pub fn parse_class(bytes: &[u8]) -> std::result::Result<ClassInfo, ClassFormatError> {
    let mut reader = Reader::new(bytes);

    let magic = reader.u4()?;
    if magic != MAGIC {
        return Err(ClassFormatError(format!("bad magic number {:#010x}", magic)));
    }
    let _minor = reader.u2()?;
    let major_version = reader.u2()?;

    let pool = ConstantPool::read(&mut reader)?;

    let _access_flags = reader.u2()?;
    let this_class = reader.u2()?;
    let super_class = reader.u2()?;

    let name = pool.class_name(this_class)?.to_string();
    let super_name = if super_class == 0 {
        None
    } else {
        Some(pool.class_name(super_class)?.to_string())
    };

    let interfaces = reader.u2()? as usize;
    reader.skip(interfaces * 2)?;

    skip_members(&mut reader)?; // fields
    skip_members(&mut reader)?; // methods

    let mut visible_annotations = Vec::new();
    let mut invisible_annotations = Vec::new();

    let attributes = reader.u2()?;
    for _ in 0..attributes {
        let name_index = reader.u2()?;
        let len = reader.u4()? as usize;
        let body = reader.take(len)?;

        match pool.utf8(name_index)? {
            RUNTIME_VISIBLE_ANNOTATIONS => {
                read_annotations(body, &pool, &mut visible_annotations)?
            }
            RUNTIME_INVISIBLE_ANNOTATIONS => {
                read_annotations(body, &pool, &mut invisible_annotations)?
            }
            _ => {}
        }
    }

    Ok(ClassInfo {
        name,
        super_name,
        major_version,
        visible_annotations,
        invisible_annotations,
    })
}

fn skip_members(reader: &mut Reader<'_>) -> ParseResult<()> {
    let count = reader.u2()?;
    for _ in 0..count {
        // access_flags, name_index, descriptor_index
        reader.skip(6)?;
        skip_attributes(reader)?;
    }
    Ok(())
}

fn skip_attributes(reader: &mut Reader<'_>) -> ParseResult<()> {
    let count = reader.u2()?;
    for _ in 0..count {
        reader.skip(2)?;
        let len = reader.u4()? as usize;
        reader.skip(len)?;
    }
    Ok(())
}

fn read_annotations(
    body: &[u8],
    pool: &ConstantPool,
    out: &mut Vec<String>,
) -> ParseResult<()> {
    let mut reader = Reader::new(body);
    let count = reader.u2()?;
    for _ in 0..count {
        let descriptor = read_annotation(&mut reader, pool)?;
        out.push(descriptor);
    }
    Ok(())
}

/// Read one `annotation` structure and return its type descriptor.
fn read_annotation(reader: &mut Reader<'_>, pool: &ConstantPool) -> ParseResult<String> {
    let type_index = reader.u2()?;
    let descriptor = pool.utf8(type_index)?.to_string();

    let pairs = reader.u2()?;
    for _ in 0..pairs {
        reader.skip(2)?; // element_name_index
        skip_element_value(reader, pool)?;
    }

    Ok(descriptor)
}

fn skip_element_value(reader: &mut Reader<'_>, pool: &ConstantPool) -> ParseResult<()> {
    let tag = reader.u1()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2),
        b'e' => reader.skip(4),
        b'@' => read_annotation(reader, pool).map(|_| ()),
        b'[' => {
            let values = reader.u2()?;
            for _ in 0..values {
                skip_element_value(reader, pool)?;
            }
            Ok(())
        }
        other => Err(ClassFormatError(format!(
            "unknown annotation element tag '{}'",
            other as char
        ))),
    }
}
