//! Canonical on-disk table format.
//!
//! A `<TableCollection>` root holds one `<Table>` per identity; entries are
//! `<CategoryDefinition>`, `<ElementDefinition>`, `<SequenceDefinition>`
//! (children `<SequenceElement>`) and `<CodeFlagDefinition>` (children
//! `<CodeFlagElement>`). Attributes are kebab-case versions of the entity
//! fields; absent optional fields are omitted. A file may also carry a single
//! bare `<Table>` root, which is what `convert-tables` emits.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::str::FromStr;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use crate::entities::{
    CategoryDefinition, CodeFlagDefinition, Condition, Descriptor, ElementDefinition, Entry,
    SequenceDefinition, SequenceElement,
};
use crate::{Error, Table, TableCollection, TableId, TableType};

pub fn read_xml_file(path: impl AsRef<Path>) -> Result<TableCollection, Error> {
    read_xml(BufReader::new(File::open(path)?))
}

/// Parse a canonical table file. Accepts either a `<TableCollection>` root or
/// a single `<Table>` root.
pub fn read_xml<R: BufRead>(src: R) -> Result<TableCollection, Error> {
    let mut reader = Reader::from_reader(src);
    let mut buf = Vec::new();
    let mut collection = TableCollection::new();
    let mut found = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let attrs = AttrMap::from_start(&e)?;
                match attrs.tag.as_str() {
                    "TableCollection" => {
                        read_collection(&mut reader, &mut collection)?;
                        found = true;
                    }
                    "Table" => {
                        collection.insert(read_table(&mut reader, &attrs, false)?);
                        found = true;
                    }
                    _ => return Err(unexpected("document root", &attrs.tag)),
                }
            }
            Event::Empty(e) => {
                let attrs = AttrMap::from_start(&e)?;
                match attrs.tag.as_str() {
                    "TableCollection" => found = true,
                    "Table" => {
                        collection.insert(read_table(&mut reader, &attrs, true)?);
                        found = true;
                    }
                    _ => return Err(unexpected("document root", &attrs.tag)),
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if found { Ok(collection) } else { Err(Error::NoTable) }
}

fn read_collection<R: BufRead>(
    reader: &mut Reader<R>,
    collection: &mut TableCollection,
) -> Result<(), Error> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let attrs = AttrMap::from_start(&e)?;
                if attrs.tag != "Table" {
                    return Err(unexpected("TableCollection", &attrs.tag));
                }
                collection.insert(read_table(reader, &attrs, false)?);
            }
            Event::Empty(e) => {
                let attrs = AttrMap::from_start(&e)?;
                if attrs.tag != "Table" {
                    return Err(unexpected("TableCollection", &attrs.tag));
                }
                collection.insert(read_table(reader, &attrs, true)?);
            }
            Event::End(_) => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn read_table<R: BufRead>(
    reader: &mut Reader<R>,
    attrs: &AttrMap,
    empty: bool,
) -> Result<Table, Error> {
    let table_type: TableType = attrs.required_str("table-type")?.parse()?;
    let id = TableId {
        table_type,
        master_table: attrs.optional("master-table")?,
        originating_center: attrs.optional("originating-center")?,
        table_version: attrs.optional("table-version")?,
    };
    let mut table = Table::new(id);
    if empty {
        return Ok(table);
    }

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let attrs = AttrMap::from_start(&e)?;
                match attrs.tag.as_str() {
                    "SequenceDefinition" => {
                        table.append(Entry::Sequence(read_sequence(reader, &attrs)?));
                    }
                    "CodeFlagDefinition" => {
                        table.append(Entry::CodeFlag(read_code_flag(reader, &attrs)?));
                    }
                    "CategoryDefinition" => {
                        table.append(Entry::Category(read_category(&attrs)?));
                        skip_to_end(reader)?;
                    }
                    "ElementDefinition" => {
                        table.append(Entry::Element(read_element(&attrs)?));
                        skip_to_end(reader)?;
                    }
                    _ => return Err(unexpected("Table", &attrs.tag)),
                }
            }
            Event::Empty(e) => {
                let attrs = AttrMap::from_start(&e)?;
                match attrs.tag.as_str() {
                    "CategoryDefinition" => table.append(Entry::Category(read_category(&attrs)?)),
                    "ElementDefinition" => table.append(Entry::Element(read_element(&attrs)?)),
                    "SequenceDefinition" => {
                        table.append(Entry::Sequence(sequence_header(&attrs)?));
                    }
                    "CodeFlagDefinition" => {
                        table.append(Entry::CodeFlag(code_flag_header(&attrs)?));
                    }
                    _ => return Err(unexpected("Table", &attrs.tag)),
                }
            }
            Event::End(_) => break,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(table)
}

fn read_category(attrs: &AttrMap) -> Result<CategoryDefinition, Error> {
    Ok(CategoryDefinition {
        code: attrs.required("code")?,
        description: attrs.string("description").unwrap_or_default(),
    })
}

fn read_element(attrs: &AttrMap) -> Result<ElementDefinition, Error> {
    Ok(ElementDefinition {
        descriptor: attrs.descriptor()?,
        scale: attrs.optional("scale")?.unwrap_or(0),
        reference_value: attrs.optional("reference-value")?.unwrap_or(0),
        bit_width: attrs.required("bit-width")?,
        unit: attrs.required_str("unit")?.to_owned(),
        mnemonic: attrs.string("mnemonic"),
        desc_code: attrs.string("desc-code"),
        name: attrs.string("name"),
    })
}

fn sequence_header(attrs: &AttrMap) -> Result<SequenceDefinition, Error> {
    let mut seq = SequenceDefinition::new(attrs.descriptor()?);
    seq.mnemonic = attrs.string("mnemonic");
    seq.dcod = attrs.string("dcod");
    seq.name = attrs.string("name");
    Ok(seq)
}

fn read_sequence<R: BufRead>(
    reader: &mut Reader<R>,
    attrs: &AttrMap,
) -> Result<SequenceDefinition, Error> {
    let mut seq = sequence_header(attrs)?;
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Empty(e) | Event::Start(e) => {
                let attrs = AttrMap::from_start(e)?;
                if attrs.tag != "SequenceElement" {
                    return Err(unexpected("SequenceDefinition", &attrs.tag));
                }
                seq.push(SequenceElement {
                    index: attrs.required("index")?,
                    descriptor: attrs.descriptor()?,
                    name: attrs.string("name"),
                });
                if matches!(event, Event::Start(_)) {
                    skip_to_end(reader)?;
                }
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(seq)
}

fn code_flag_header(attrs: &AttrMap) -> Result<CodeFlagDefinition, Error> {
    let condition = match (
        attrs.optional::<u8>("condition-f")?,
        attrs.optional::<u8>("condition-x")?,
        attrs.optional::<u8>("condition-y")?,
        attrs.optional::<i64>("condition-value")?,
    ) {
        (None, None, None, None) => None,
        (Some(f), Some(x), Some(y), Some(value)) => Some(Condition {
            descriptor: checked_descriptor(&attrs.tag, f, x, y)?,
            value,
        }),
        _ => {
            return Err(Error::MissingAttribute {
                tag: attrs.tag.clone(),
                attribute: "condition-*".to_owned(),
            });
        }
    };

    let is_flag = attrs
        .get("is-flag")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let mut def = CodeFlagDefinition::new(attrs.descriptor()?, is_flag, condition);
    def.mnemonic = attrs.string("mnemonic");
    Ok(def)
}

fn read_code_flag<R: BufRead>(
    reader: &mut Reader<R>,
    attrs: &AttrMap,
) -> Result<CodeFlagDefinition, Error> {
    let mut def = code_flag_header(attrs)?;
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Empty(e) | Event::Start(e) => {
                let attrs = AttrMap::from_start(e)?;
                if attrs.tag != "CodeFlagElement" {
                    return Err(unexpected("CodeFlagDefinition", &attrs.tag));
                }
                def.insert_code(
                    attrs.required("code")?,
                    attrs.string("meaning").unwrap_or_default(),
                );
                if matches!(event, Event::Start(_)) {
                    skip_to_end(reader)?;
                }
            }
            Event::End(_) | Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(def)
}

pub fn write_xml_file(collection: &TableCollection, path: impl AsRef<Path>) -> Result<(), Error> {
    write_xml(collection, File::create(path)?)
}

/// Serialize a whole collection under a `<TableCollection>` root.
pub fn write_xml<W: Write>(collection: &TableCollection, out: W) -> Result<(), Error> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    emit(&mut writer, Event::Start(BytesStart::new("TableCollection")))?;
    for table in collection.iter() {
        write_table(&mut writer, table)?;
    }
    emit(&mut writer, Event::End(BytesEnd::new("TableCollection")))
}

/// Serialize one table as the document root (the `convert-tables` output
/// form).
pub fn write_xml_table<W: Write>(table: &Table, out: W) -> Result<(), Error> {
    let mut writer = Writer::new_with_indent(out, b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_table(&mut writer, table)
}

fn write_table<W: Write>(writer: &mut Writer<W>, table: &Table) -> Result<(), Error> {
    let id = table.id();
    let mut start = BytesStart::new("Table");
    start.push_attribute(("table-type", id.table_type.as_str()));
    push_num(&mut start, "master-table", id.master_table);
    push_num(&mut start, "originating-center", id.originating_center);
    push_num(&mut start, "table-version", id.table_version);

    if table.is_empty() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    for entry in table.entries() {
        write_entry(writer, entry)?;
    }
    emit(writer, Event::End(BytesEnd::new("Table")))
}

fn write_entry<W: Write>(writer: &mut Writer<W>, entry: &Entry) -> Result<(), Error> {
    match entry {
        Entry::Category(c) => {
            let mut e = BytesStart::new("CategoryDefinition");
            e.push_attribute(("code", c.code.to_string().as_str()));
            e.push_attribute(("description", c.description.as_str()));
            emit(writer, Event::Empty(e))
        }
        Entry::Element(def) => {
            let mut e = BytesStart::new("ElementDefinition");
            push_descriptor(&mut e, def.descriptor);
            e.push_attribute(("scale", def.scale.to_string().as_str()));
            e.push_attribute(("reference-value", def.reference_value.to_string().as_str()));
            e.push_attribute(("bit-width", def.bit_width.to_string().as_str()));
            e.push_attribute(("unit", def.unit.as_str()));
            push_opt(&mut e, "mnemonic", def.mnemonic.as_deref());
            push_opt(&mut e, "desc-code", def.desc_code.as_deref());
            push_opt(&mut e, "name", def.name.as_deref());
            emit(writer, Event::Empty(e))
        }
        Entry::Sequence(def) => {
            let mut e = BytesStart::new("SequenceDefinition");
            push_descriptor(&mut e, def.descriptor);
            push_opt(&mut e, "mnemonic", def.mnemonic.as_deref());
            push_opt(&mut e, "dcod", def.dcod.as_deref());
            push_opt(&mut e, "name", def.name.as_deref());

            if def.is_empty() {
                return emit(writer, Event::Empty(e));
            }
            emit(writer, Event::Start(e))?;
            for child in def.elements() {
                let mut c = BytesStart::new("SequenceElement");
                c.push_attribute(("index", child.index.to_string().as_str()));
                push_descriptor(&mut c, child.descriptor);
                push_opt(&mut c, "name", child.name.as_deref());
                emit(writer, Event::Empty(c))?;
            }
            emit(writer, Event::End(BytesEnd::new("SequenceDefinition")))
        }
        Entry::CodeFlag(def) => {
            let mut e = BytesStart::new("CodeFlagDefinition");
            push_descriptor(&mut e, def.descriptor);
            push_opt(&mut e, "mnemonic", def.mnemonic.as_deref());
            e.push_attribute(("is-flag", if def.is_flag { "true" } else { "false" }));
            if let Some(cond) = def.condition {
                e.push_attribute(("condition-f", cond.descriptor.f.to_string().as_str()));
                e.push_attribute(("condition-x", cond.descriptor.x.to_string().as_str()));
                e.push_attribute(("condition-y", cond.descriptor.y.to_string().as_str()));
                e.push_attribute(("condition-value", cond.value.to_string().as_str()));
            }

            if def.is_empty() {
                return emit(writer, Event::Empty(e));
            }
            emit(writer, Event::Start(e))?;
            for (code, meaning) in def.codes() {
                let mut c = BytesStart::new("CodeFlagElement");
                c.push_attribute(("code", code.to_string().as_str()));
                c.push_attribute(("meaning", meaning));
                emit(writer, Event::Empty(c))?;
            }
            emit(writer, Event::End(BytesEnd::new("CodeFlagDefinition")))
        }
    }
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> Result<(), Error> {
    writer
        .write_event(event)
        .map_err(|e| Error::XmlWrite(e.to_string()))
}

fn push_num<T: ToString>(start: &mut BytesStart<'_>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        start.push_attribute((key, v.to_string().as_str()));
    }
}

fn push_opt(start: &mut BytesStart<'_>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        start.push_attribute((key, v));
    }
}

fn push_descriptor(start: &mut BytesStart<'_>, d: Descriptor) {
    start.push_attribute(("f", d.f.to_string().as_str()));
    start.push_attribute(("x", d.x.to_string().as_str()));
    start.push_attribute(("y", d.y.to_string().as_str()));
}

/// Drain events until the element whose `Start` was just consumed closes.
fn skip_to_end<R: BufRead>(reader: &mut Reader<R>) -> Result<(), Error> {
    let mut depth = 1usize;
    let mut buf = Vec::new();
    while depth > 0 {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => depth += 1,
            Event::End(_) => depth -= 1,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn unexpected(parent: &str, tag: &str) -> Error {
    Error::UnexpectedTag {
        parent: parent.to_owned(),
        tag: tag.to_owned(),
    }
}

fn checked_descriptor(tag: &str, f: u8, x: u8, y: u8) -> Result<Descriptor, Error> {
    if f > crate::entities::MAX_F || x > crate::entities::MAX_X {
        return Err(Error::InvalidDescriptor(format!("{f}-{x}-{y} (<{tag}>)")));
    }
    Ok(Descriptor { f, x, y })
}

/// Attributes of one start tag, decoded and unescaped up front.
struct AttrMap {
    tag: String,
    attrs: Vec<(String, String)>,
}

impl AttrMap {
    fn from_start(e: &BytesStart<'_>) -> Result<Self, Error> {
        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| Error::InvalidAttribute {
                    tag: tag.clone(),
                    attribute: key.clone(),
                    value: err.to_string(),
                })?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(Self { tag, attrs })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn string(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_owned)
    }

    fn required_str(&self, key: &str) -> Result<&str, Error> {
        self.get(key).ok_or_else(|| Error::MissingAttribute {
            tag: self.tag.clone(),
            attribute: key.to_owned(),
        })
    }

    fn required<T: FromStr>(&self, key: &str) -> Result<T, Error> {
        self.parse(key, self.required_str(key)?)
    }

    fn optional<T: FromStr>(&self, key: &str) -> Result<Option<T>, Error> {
        self.get(key).map(|v| self.parse(key, v)).transpose()
    }

    fn parse<T: FromStr>(&self, key: &str, value: &str) -> Result<T, Error> {
        value.trim().parse().map_err(|_| Error::InvalidAttribute {
            tag: self.tag.clone(),
            attribute: key.to_owned(),
            value: value.to_owned(),
        })
    }

    fn descriptor(&self) -> Result<Descriptor, Error> {
        checked_descriptor(
            &self.tag,
            self.required("f")?,
            self.required("x")?,
            self.required("y")?,
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::entities::{Condition, SequenceElement};

    use super::*;

    fn sample_collection() -> TableCollection {
        let mut b = Table::new(TableId::new(TableType::B).with_master(0).with_version(36));
        b.append(Entry::Element(ElementDefinition {
            descriptor: Descriptor::new(0, 1, 1),
            scale: 0,
            reference_value: 0,
            bit_width: 7,
            unit: "Numeric".to_owned(),
            mnemonic: Some("WMOB".to_owned()),
            desc_code: None,
            name: Some("WMO block number".to_owned()),
        }));
        b.append(Entry::Element(ElementDefinition {
            descriptor: Descriptor::new(0, 12, 101),
            scale: 2,
            reference_value: -10000,
            bit_width: 16,
            unit: "K".to_owned(),
            mnemonic: Some("TMDB".to_owned()),
            desc_code: None,
            name: None,
        }));

        let mut d = Table::new(TableId::new(TableType::D).with_master(0).with_version(36));
        let mut seq = SequenceDefinition::new(Descriptor::new(3, 1, 1));
        seq.mnemonic = Some("WMOBLKSTN".to_owned());
        seq.push(SequenceElement {
            index: 0,
            descriptor: Descriptor::new(0, 1, 1),
            name: None,
        });
        seq.push(SequenceElement {
            index: 1,
            descriptor: Descriptor::new(0, 1, 2),
            name: None,
        });
        d.append(Entry::Sequence(seq));

        let mut f = Table::new(
            TableId::new(TableType::F)
                .with_master(0)
                .with_center(7)
                .with_version(1),
        );
        let mut cf = CodeFlagDefinition::new(Descriptor::new(0, 2, 1), false, None);
        cf.insert_code(0, "Automatic <station>");
        cf.insert_code(1, "Manned & \"mixed\" station");
        f.append(Entry::CodeFlag(cf));
        let mut cond = CodeFlagDefinition::new(
            Descriptor::new(0, 2, 2),
            true,
            Some(Condition {
                descriptor: Descriptor::new(0, 2, 1),
                value: 1,
            }),
        );
        cond.insert_code(1, "First bit");
        f.append(Entry::CodeFlag(cond));

        let mut a = Table::new(TableId::new(TableType::A));
        a.append(Entry::Category(CategoryDefinition {
            code: 2,
            description: "Vertical soundings (other than satellite)".to_owned(),
        }));

        let mut collection = TableCollection::new();
        for t in [a, b, d, f] {
            collection.insert(t);
        }
        collection
    }

    #[test]
    fn test_round_trip() -> Result<(), Error> {
        let original = sample_collection();

        let mut bytes = Vec::new();
        write_xml(&original, &mut bytes)?;
        let reread = read_xml(&bytes[..])?;

        assert_eq!(reread, original);

        // a second pass is byte-for-byte stable
        let mut again = Vec::new();
        write_xml(&reread, &mut again)?;
        assert_eq!(again, bytes);

        Ok(())
    }

    #[test]
    fn test_single_table_root() -> Result<(), Error> {
        let original = sample_collection();
        let table = original
            .get(&TableId::new(TableType::B).with_master(0).with_version(36))
            .cloned()
            .ok_or(Error::NoTable)?;

        let mut bytes = Vec::new();
        write_xml_table(&table, &mut bytes)?;
        let reread = read_xml(&bytes[..])?;

        assert_eq!(reread.len(), 1);
        assert_eq!(reread.iter().next(), Some(&table));
        Ok(())
    }

    #[test]
    fn test_attribute_order_is_not_significant() -> Result<(), Error> {
        let src = r#"<?xml version="1.0"?>
            <Table table-version="36" table-type="B" master-table="0">
              <ElementDefinition unit="Numeric" y="1" x="1" f="0" bit-width="7"/>
            </Table>"#;

        let collection = read_xml(src.as_bytes())?;
        let table = collection.iter().next().ok_or(Error::NoTable)?;
        assert!(table.element(Descriptor::new(0, 1, 1)).is_some());
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_tags() {
        let src = r#"<TableCollection><Banana/></TableCollection>"#;
        assert!(matches!(
            read_xml(src.as_bytes()),
            Err(Error::UnexpectedTag { .. })
        ));
    }

    #[test]
    fn test_empty_document_is_an_error() {
        assert!(matches!(read_xml(&b"<x/>"[..]), Err(Error::UnexpectedTag { .. })));
        assert!(matches!(read_xml(&b""[..]), Err(Error::NoTable)));
    }
}
