//! Ingestion of the XML table exports published by WMO.
//!
//! The exports are flat: a root element holds one row element per entry, and
//! each row holds simple text fields (`FXY`, `BUFR_Scale`, `CodeFigure`, …).
//! Row and field names vary between publication cycles, so rows are
//! recognized by the fields they carry rather than by tag name:
//!
//! - `FXY` + `BUFR_DataWidth_Bits` → Table B element
//! - `FXY1` + `FXY2` → Table D sequence slot (indices in file order)
//! - `FXY` + `CodeFigure` or `BitNo` → Table F row (`BitNo` means flag table)
//!
//! The table identity is supplied by the caller; the export files do not
//! carry it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::entities::{
    CodeFlagDefinition, Descriptor, ElementDefinition, Entry, EntryId, SequenceDefinition,
    SequenceElement,
};
use crate::{Error, Table, TableId};

pub fn convert_wmo_file(path: impl AsRef<Path>, id: TableId) -> Result<Table, Error> {
    convert_wmo_table(BufReader::new(File::open(path)?), id)
}

pub fn convert_wmo_table<R: BufRead>(src: R, id: TableId) -> Result<Table, Error> {
    let mut reader = Reader::from_reader(src);
    let mut table = Table::new(id);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut row: HashMap<String, String> = HashMap::new();
    let mut text = String::new();
    let mut rows = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(_) => {
                depth += 1;
                match depth {
                    2 => row.clear(),
                    3 => text.clear(),
                    _ => {}
                }
            }
            Event::Text(t) => {
                if depth >= 3 {
                    let decoded = t.decode().map_err(|e| Error::XmlText(e.to_string()))?;
                    let unescaped = quick_xml::escape::unescape(&decoded)
                        .map_err(|e| Error::XmlText(e.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Event::End(e) => {
                if depth == 3 {
                    let field = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    row.insert(field, text.trim().to_owned());
                } else if depth == 2 {
                    if apply_row(&mut table, &row)? {
                        rows += 1;
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Empty(_) => {}
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if rows == 0 {
        return Err(Error::NoTable);
    }
    Ok(table)
}

/// Interpret one collected row; returns whether it contributed an entry.
fn apply_row(table: &mut Table, row: &HashMap<String, String>) -> Result<bool, Error> {
    let get = |key: &str| row.get(key).filter(|v| !v.is_empty());

    if let (Some(fxy), Some(width)) = (get("FXY"), get("BUFR_DataWidth_Bits")) {
        let descriptor = Descriptor::from_fxy_digits(fxy)?;
        table.append(Entry::Element(ElementDefinition {
            descriptor,
            scale: parse(row, "BUFR_Scale")?.unwrap_or(0),
            reference_value: parse(row, "BUFR_ReferenceValue")?.unwrap_or(0),
            bit_width: parse_field(width, "BUFR_DataWidth_Bits")?,
            unit: get("BUFR_Unit").cloned().unwrap_or_else(|| "Numeric".to_owned()),
            mnemonic: None,
            desc_code: None,
            name: get("ElementName_en").cloned(),
        }));
        return Ok(true);
    }

    if let (Some(parent), Some(child)) = (get("FXY1"), get("FXY2")) {
        let parent = Descriptor::from_fxy_digits(parent)?;
        let child = Descriptor::from_fxy_digits(child)?;

        let mut seq = match table
            .get(&EntryId::Sequence { descriptor: parent })
            .and_then(Entry::as_sequence)
        {
            Some(existing) => existing.clone(),
            None => {
                let mut seq = SequenceDefinition::new(parent);
                seq.name = get("Title_en").cloned();
                seq
            }
        };
        let index = u8::try_from(seq.len()).map_err(|_| Error::InvalidDescriptor(
            format!("{parent} has too many sequence children"),
        ))?;
        seq.push(SequenceElement {
            index,
            descriptor: child,
            name: get("ElementName_en").cloned(),
        });
        table.append(Entry::Sequence(seq));
        return Ok(true);
    }

    if let Some(fxy) = get("FXY") {
        let (code, is_flag) = match (get("CodeFigure"), get("BitNo")) {
            (_, Some(bit)) => (parse_field::<u32>(bit, "BitNo")?, true),
            (Some(code), None) => (parse_field::<u32>(code, "CodeFigure")?, false),
            // ranges like "All 12" and reserved rows carry no figure
            (None, None) => return Ok(false),
        };

        let descriptor = Descriptor::from_fxy_digits(fxy)?;
        let mut def = match table
            .get(&EntryId::CodeFlag {
                descriptor,
                is_flag,
                condition: None,
            })
            .and_then(Entry::as_code_flag)
        {
            Some(existing) => existing.clone(),
            None => CodeFlagDefinition::new(descriptor, is_flag, None),
        };
        def.insert_code(code, get("EntryName_en").map(String::as_str).unwrap_or(""));
        table.append(Entry::CodeFlag(def));
        return Ok(true);
    }

    Ok(false)
}

fn parse<T: std::str::FromStr>(
    row: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, Error> {
    row.get(key)
        .filter(|v| !v.is_empty())
        .map(|v| parse_field(v, key))
        .transpose()
}

fn parse_field<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, Error> {
    value.trim().parse().map_err(|_| Error::InvalidAttribute {
        tag: "WMO row".to_owned(),
        attribute: key.to_owned(),
        value: value.to_owned(),
    })
}
