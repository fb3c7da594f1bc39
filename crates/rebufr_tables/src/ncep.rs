//! NCEP-style pipe-delimited text tables.
//!
//! A file defines exactly one table. The first content line is the header
//! `Table <TYPE> | <master> [| <center>] | <version>`; `#` comments and blank
//! lines are skipped and a literal `END` line terminates the file. Row shapes
//! depend on the table type:
//!
//! | Type | Row | Child row |
//! |------|-----|-----------|
//! | A    | `code \| description` | — |
//! | B    | `F-XX-YYY \| scale \| reference \| bit-width \| unit \| mnemonic [\| desc-code [\| name]]` | — |
//! | D    | `F-XX-YYY \| mnemonic [\| dcod [\| name]]` | `> F-XX-YYY [\| name]` |
//! | F    | `F-XX-YYY \| code\|flag \| mnemonic [\| F-XX-YYY=value]` | `> code \| meaning` |

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::entities::{
    CategoryDefinition, CodeFlagDefinition, Condition, Descriptor, ElementDefinition, Entry,
    SequenceDefinition, SequenceElement,
};
use crate::{Error, Table, TableId, TableType};

pub fn convert_ncep_file(path: impl AsRef<Path>) -> Result<Table, Error> {
    convert_ncep_table(BufReader::new(File::open(path)?))
}

pub fn convert_ncep_table<R: BufRead>(src: R) -> Result<Table, Error> {
    let mut parser = Parser::default();

    for (idx, line) in src.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "END" {
            break;
        }
        parser.feed(idx + 1, line)?;
    }

    parser.finish()
}

#[derive(Default)]
struct Parser {
    table: Option<Table>,
    // container row currently accepting `>` continuations
    pending: Option<Entry>,
}

impl Parser {
    fn feed(&mut self, line_no: usize, line: &str) -> Result<(), Error> {
        let Some(table) = &self.table else {
            self.table = Some(parse_header(line_no, line)?);
            return Ok(());
        };
        let table_type = table.id().table_type;

        if let Some(rest) = line.strip_prefix('>') {
            return self.feed_child(line_no, rest.trim());
        }

        self.flush_pending();
        let fields = split_fields(line);

        match table_type {
            TableType::A | TableType::AX => {
                let entry = parse_category(line_no, &fields)?;
                self.append(Entry::Category(entry));
            }
            TableType::B | TableType::BX => {
                let entry = parse_element(line_no, &fields)?;
                self.append(Entry::Element(entry));
            }
            TableType::D | TableType::DX => {
                self.pending = Some(Entry::Sequence(parse_sequence(line_no, &fields)?));
            }
            TableType::F | TableType::FX => {
                self.pending = Some(Entry::CodeFlag(parse_code_flag(line_no, &fields)?));
            }
        }

        Ok(())
    }

    fn feed_child(&mut self, line_no: usize, rest: &str) -> Result<(), Error> {
        let fields = split_fields(rest);
        match &mut self.pending {
            Some(Entry::Sequence(seq)) => {
                let descriptor = parse_descriptor(line_no, field(line_no, &fields, 0)?)?;
                let index = u8::try_from(seq.len()).map_err(|_| Error::Row {
                    line: line_no,
                    reason: "sequence has too many children".to_owned(),
                })?;
                seq.push(SequenceElement {
                    index,
                    descriptor,
                    name: opt_field(&fields, 1),
                });
                Ok(())
            }
            Some(Entry::CodeFlag(def)) => {
                let code = parse_num::<u32>(line_no, field(line_no, &fields, 0)?, "code")?;
                def.insert_code(code, opt_field(&fields, 1).unwrap_or_default());
                Ok(())
            }
            _ => Err(Error::Row {
                line: line_no,
                reason: "continuation line without a preceding sequence or code/flag row"
                    .to_owned(),
            }),
        }
    }

    fn append(&mut self, entry: Entry) {
        if let Some(table) = &mut self.table {
            table.append(entry);
        }
    }

    fn flush_pending(&mut self) {
        if let Some(entry) = self.pending.take() {
            self.append(entry);
        }
    }

    fn finish(mut self) -> Result<Table, Error> {
        self.flush_pending();
        self.table.ok_or(Error::NoTable)
    }
}

fn parse_header(line_no: usize, line: &str) -> Result<Table, Error> {
    let header = |reason: &str| Error::Header {
        line: line_no,
        reason: reason.to_owned(),
    };

    let fields = split_fields(line);
    let kind = fields
        .first()
        .and_then(|f| f.strip_prefix("Table "))
        .ok_or_else(|| header("expected `Table <TYPE>`"))?;
    let table_type: TableType = kind.parse()?;

    let mut id = TableId::new(table_type);
    match fields.len() {
        3 => {
            id.master_table = Some(parse_num(line_no, &fields[1], "master table")?);
            id.table_version = Some(parse_num(line_no, &fields[2], "version")?);
        }
        4 => {
            id.master_table = Some(parse_num(line_no, &fields[1], "master table")?);
            id.originating_center = Some(parse_num(line_no, &fields[2], "center")?);
            id.table_version = Some(parse_num(line_no, &fields[3], "version")?);
        }
        _ => return Err(header("expected `<master> [| <center>] | <version>`")),
    }

    Ok(Table::new(id))
}

fn parse_category(line_no: usize, fields: &[String]) -> Result<CategoryDefinition, Error> {
    Ok(CategoryDefinition {
        code: parse_num(line_no, field(line_no, fields, 0)?, "category code")?,
        description: opt_field(fields, 1).unwrap_or_default(),
    })
}

fn parse_element(line_no: usize, fields: &[String]) -> Result<ElementDefinition, Error> {
    Ok(ElementDefinition {
        descriptor: parse_descriptor(line_no, field(line_no, fields, 0)?)?,
        scale: parse_num(line_no, field(line_no, fields, 1)?, "scale")?,
        reference_value: parse_num(line_no, field(line_no, fields, 2)?, "reference value")?,
        bit_width: parse_num(line_no, field(line_no, fields, 3)?, "bit width")?,
        unit: field(line_no, fields, 4)?.clone(),
        mnemonic: Some(field(line_no, fields, 5)?.clone()),
        desc_code: opt_field(fields, 6),
        name: opt_field(fields, 7),
    })
}

fn parse_sequence(line_no: usize, fields: &[String]) -> Result<SequenceDefinition, Error> {
    let mut seq = SequenceDefinition::new(parse_descriptor(line_no, field(line_no, fields, 0)?)?);
    seq.mnemonic = opt_field(fields, 1);
    seq.dcod = opt_field(fields, 2);
    seq.name = opt_field(fields, 3);
    Ok(seq)
}

fn parse_code_flag(line_no: usize, fields: &[String]) -> Result<CodeFlagDefinition, Error> {
    let descriptor = parse_descriptor(line_no, field(line_no, fields, 0)?)?;
    let is_flag = match field(line_no, fields, 1)?.to_ascii_lowercase().as_str() {
        "code" => false,
        "flag" => true,
        other => {
            return Err(Error::Row {
                line: line_no,
                reason: format!("expected `code` or `flag`, got {other:?}"),
            });
        }
    };

    let condition = match opt_field(fields, 3) {
        None => None,
        Some(qualifier) => Some(parse_condition(line_no, &qualifier)?),
    };

    let mut def = CodeFlagDefinition::new(descriptor, is_flag, condition);
    def.mnemonic = opt_field(fields, 2);
    Ok(def)
}

/// A `F-XX-YYY=value` qualifier on a code/flag row.
fn parse_condition(line_no: usize, qualifier: &str) -> Result<Condition, Error> {
    let (descriptor, value) = qualifier.split_once('=').ok_or_else(|| Error::Row {
        line: line_no,
        reason: format!("expected `F-XX-YYY=value`, got {qualifier:?}"),
    })?;
    Ok(Condition {
        descriptor: parse_descriptor(line_no, descriptor)?,
        value: parse_num(line_no, value, "condition value")?,
    })
}

fn split_fields(line: &str) -> Vec<String> {
    line.split('|').map(|f| f.trim().to_owned()).collect()
}

fn field<'a>(line_no: usize, fields: &'a [String], idx: usize) -> Result<&'a String, Error> {
    fields.get(idx).filter(|f| !f.is_empty()).ok_or(Error::Row {
        line: line_no,
        reason: format!("missing field {}", idx + 1),
    })
}

fn opt_field(fields: &[String], idx: usize) -> Option<String> {
    fields.get(idx).filter(|f| !f.is_empty()).cloned()
}

fn parse_num<T: std::str::FromStr>(line_no: usize, raw: &str, what: &str) -> Result<T, Error> {
    raw.trim().parse().map_err(|_| Error::Row {
        line: line_no,
        reason: format!("invalid {what} {raw:?}"),
    })
}

fn parse_descriptor(line_no: usize, raw: &str) -> Result<Descriptor, Error> {
    raw.parse().map_err(|_| Error::Row {
        line: line_no,
        reason: format!("invalid descriptor {raw:?}"),
    })
}
