mod collection;
mod entities;
mod errors;
mod ncep;
mod table;
mod wmo;
mod xml;

pub use collection::TableCollection;
pub use entities::{
    CategoryDefinition, CodeFlagDefinition, Condition, Descriptor, ElementDefinition, Entry,
    EntryId, SequenceDefinition, SequenceElement, UnitKind,
};
pub use errors::Error;
pub use ncep::{convert_ncep_file, convert_ncep_table};
pub use table::{Table, TableId, TableType};
pub use wmo::{convert_wmo_file, convert_wmo_table};
pub use xml::{read_xml, read_xml_file, write_xml, write_xml_file, write_xml_table};

/// Element unit string selecting ASCII decoding.
pub const UNIT_CCITT_IA5: &str = "CCITT IA5";
/// Element unit string selecting discrete code-meaning lookup.
pub const UNIT_CODE_TABLE: &str = "Code table";
/// Element unit string selecting bitmask-to-meanings lookup.
pub const UNIT_FLAG_TABLE: &str = "Flag table";
