mod bit_cursor;
mod bit_writer;
mod reader;

pub use bit_cursor::{BitCursor, is_missing};
pub use bit_writer::BitWriter;
pub use reader::{ReadBeU16, ReadBeU24, ReadU8};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Bit read of {requested} bits exceeds the {remaining} bits remaining")]
    OutOfRange { requested: usize, remaining: usize },

    #[error(transparent)]
    IO(#[from] std::io::Error),
}
