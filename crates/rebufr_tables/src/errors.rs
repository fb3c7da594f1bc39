#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    #[error("XML error: {0}")]
    #[diagnostic(
        code(rebufr::tables::xml),
        help("The table file is not well-formed XML.")
    )]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed XML attribute: {0}")]
    #[diagnostic(
        code(rebufr::tables::xml_attribute),
        help("An attribute in the table file could not be parsed.")
    )]
    XmlAttribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("Failed to write XML: {0}")]
    #[diagnostic(code(rebufr::tables::xml_write))]
    XmlWrite(String),

    #[error("Malformed XML text: {0}")]
    #[diagnostic(code(rebufr::tables::xml_text))]
    XmlText(String),

    #[error("Unexpected tag <{tag}> inside <{parent}>")]
    #[diagnostic(
        code(rebufr::tables::unexpected_tag),
        help("Only the canonical table entities are allowed at this position.")
    )]
    UnexpectedTag { parent: String, tag: String },

    #[error("<{tag}> is missing the required attribute {attribute}")]
    #[diagnostic(code(rebufr::tables::missing_attribute))]
    MissingAttribute { tag: String, attribute: String },

    #[error("Invalid value {value:?} for attribute {attribute} on <{tag}>")]
    #[diagnostic(code(rebufr::tables::invalid_attribute))]
    InvalidAttribute {
        tag: String,
        attribute: String,
        value: String,
    },

    #[error("Unknown table type {0:?}")]
    #[diagnostic(
        code(rebufr::tables::unknown_table_type),
        help("Valid table types are A, B, D, F and their local X variants.")
    )]
    UnknownTableType(String),

    #[error("Invalid descriptor {0:?}")]
    #[diagnostic(
        code(rebufr::tables::invalid_descriptor),
        help("Descriptors are written F-XX-YYY with F in 0..=3, X in 0..=63, Y in 0..=255.")
    )]
    InvalidDescriptor(String),

    #[error("Malformed table header at line {line}: {reason}")]
    #[diagnostic(
        code(rebufr::tables::header),
        help("The first content line must read `Table <TYPE> | <master> [| <center>] | <version>`.")
    )]
    Header { line: usize, reason: String },

    #[error("Malformed table row at line {line}: {reason}")]
    #[diagnostic(code(rebufr::tables::row))]
    Row { line: usize, reason: String },

    #[error("File contains no table")]
    #[diagnostic(
        code(rebufr::tables::empty),
        help("The input parsed cleanly but defined no table.")
    )]
    NoTable,

    #[error(transparent)]
    #[diagnostic(code(rebufr::tables::io))]
    IO(#[from] std::io::Error),
}
