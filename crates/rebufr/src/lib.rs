//! Umbrella crate: the BUFR table model, bit-level IO and message decoding
//! under one roof.

pub use rebufr_decode as decode;
pub use rebufr_io as io;
pub use rebufr_tables as tables;
