use rebufr_tables::Descriptor;

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum Error {
    #[error("No BUFR message found before end of stream")]
    #[diagnostic(
        code(rebufr::decode::no_message),
        help("The input contains no `BUFR` start marker past the given offset.")
    )]
    NoMessage,

    #[error("Truncated BUFR message: needs {declared} bytes, {available} available")]
    #[diagnostic(
        code(rebufr::decode::truncated),
        help("The declared message length runs past the end of the input.")
    )]
    Truncated { declared: u64, available: u64 },

    #[error("Unsupported BUFR edition {0}")]
    #[diagnostic(
        code(rebufr::decode::edition),
        help("Only editions 3 and 4 are supported.")
    )]
    InvalidEdition(u8),

    #[error("Unsupported feature: {0}")]
    #[diagnostic(code(rebufr::decode::unsupported))]
    Unsupported(&'static str),

    #[error("Byte source already closed")]
    #[diagnostic(
        code(rebufr::decode::closed),
        help("Identification fields read through the underlying file; reopen it to keep using the message.")
    )]
    ClosedSource,

    #[error("Data section exhausted mid-value: {0}")]
    #[diagnostic(
        code(rebufr::decode::overrun),
        help("The bit-packed payload ended before the expanded descriptors were satisfied.")
    )]
    Overrun(#[from] rebufr_io::Error),

    #[error("Value does not fit element {descriptor}: {reason}")]
    #[diagnostic(code(rebufr::decode::value_range))]
    InvalidValue {
        descriptor: Descriptor,
        reason: String,
    },

    #[error(transparent)]
    #[diagnostic(code(rebufr::decode::io))]
    IO(#[from] std::io::Error),
}
