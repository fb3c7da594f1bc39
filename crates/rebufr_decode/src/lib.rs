mod errors;
mod expand;
mod message;
mod subset;
mod values;

pub use errors::Error;
pub use expand::{Expander, PlanNode};
pub use message::{ByteSource, Message, MessageStream, MessageTables};
pub use subset::{Group, Node, Replication, Subset, SubsetDecoder};
pub use values::{
    CodeValue, FlagValue, MissingValue, NumericData, NumericValue, RawBits, StringValue, Value,
    encode_numeric, encode_string,
};
