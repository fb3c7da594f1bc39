use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;

use rebufr_foundation::const_assert;
use rebufr_io::{BitCursor, ReadBeU16, ReadBeU24, ReadU8};
use rebufr_tables::{Descriptor, Table, TableCollection, TableType};

use crate::expand::Expander;
use crate::subset::{Subset, SubsetDecoder};
use crate::Error;

const MARKER: &[u8; 4] = b"BUFR";
// section 5; never parsed, it only bounds the message
const TRAILER: &[u8; 4] = b"7777";
const SECTION0_LEN: u64 = 8;
const_assert!(MARKER.len() + 3 + 1 == SECTION0_LEN as usize);
const_assert!(TRAILER.len() == MARKER.len());

/// A shared, closable handle over the underlying byte stream. Messages keep a
/// clone and read identification fields through it on demand; once
/// [ByteSource::close] runs, further reads fail with [Error::ClosedSource].
#[derive(Debug)]
pub struct ByteSource<R> {
    inner: Rc<RefCell<Option<R>>>,
}

impl<R> Clone for ByteSource<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Read + Seek> ByteSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Some(reader))),
        }
    }

    /// Drop the underlying reader. Every clone of this handle observes the
    /// closure.
    pub fn close(&self) {
        self.inner.borrow_mut().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().is_none()
    }

    fn with<T>(&self, f: impl FnOnce(&mut R) -> std::io::Result<T>) -> Result<T, Error> {
        let mut guard = self.inner.borrow_mut();
        let reader = guard.as_mut().ok_or(Error::ClosedSource)?;
        f(reader).map_err(Error::from)
    }

    fn len(&self) -> Result<u64, Error> {
        self.with(|r| r.seek(SeekFrom::End(0)))
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        self.with(|r| {
            r.seek(SeekFrom::Start(offset))?;
            r.read_exact(buf)
        })
    }

    fn range(&self, start: u64, end: u64) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; end.saturating_sub(start) as usize];
        self.read_at(start, &mut buf)?;
        Ok(buf)
    }

    fn u8_at(&self, offset: u64) -> Result<u8, Error> {
        self.with(|r| {
            r.seek(SeekFrom::Start(offset))?;
            r.read_u8()
        })
    }

    fn be_u16_at(&self, offset: u64) -> Result<u16, Error> {
        self.with(|r| {
            r.seek(SeekFrom::Start(offset))?;
            r.read_be_u16()
        })
    }

    fn be_u24_at(&self, offset: u64) -> Result<u32, Error> {
        self.with(|r| {
            r.seek(SeekFrom::Start(offset))?;
            r.read_be_u24()
        })
    }

    /// The next occurrence of the `BUFR` start marker at or after `offset`.
    fn find_marker(&self, offset: u64) -> Result<Option<u64>, Error> {
        self.with(|r| {
            let len = r.seek(SeekFrom::End(0))?;
            let mut chunk = vec![0u8; 4096];
            let mut pos = offset;

            while pos + MARKER.len() as u64 <= len {
                let take = chunk.len().min((len - pos) as usize);
                r.seek(SeekFrom::Start(pos))?;
                r.read_exact(&mut chunk[..take])?;

                if let Some(hit) = chunk[..take].windows(MARKER.len()).position(|w| w == MARKER)
                {
                    return Ok(Some(pos + hit as u64));
                }
                if take <= MARKER.len() - 1 {
                    break;
                }
                // markers can straddle chunk boundaries
                pos += (take - (MARKER.len() - 1)) as u64;
            }

            Ok(None)
        })
    }
}

/// The merged per-message tables a message decodes against. Decoded values
/// borrow the element definitions owned here, so the tables must outlive the
/// value trees.
#[derive(Debug, Clone)]
pub struct MessageTables {
    pub table_a: Table,
    pub table_b: Table,
    pub table_d: Table,
    pub table_f: Table,
}

/// One framed BUFR message inside a byte stream.
///
/// Framing records only the section offsets; every identification field is
/// read from the underlying bytes when asked for.
///
/// Section 0 wire layout:
///
/// | Bytes | Field |
/// |-------|-------|
/// | 0-3   | `BUFR` |
/// | 4-6   | total message length (big-endian) |
/// | 7     | edition (3 or 4) |
#[derive(Debug)]
pub struct Message<R> {
    src: ByteSource<R>,
    start: u64,
    total_len: u32,
    edition: u8,
    section1: u64,
    section2: Option<u64>,
    section3: u64,
    section4: u64,
    section5: u64,
}

impl<R: Read + Seek> Message<R> {
    /// Frame the first message at or after `offset`.
    pub fn frame(src: &ByteSource<R>, offset: u64) -> Result<Self, Error> {
        let len = src.len()?;
        let start = src.find_marker(offset)?.ok_or(Error::NoMessage)?;

        if len - start < SECTION0_LEN {
            return Err(Error::Truncated {
                declared: SECTION0_LEN,
                available: len - start,
            });
        }
        let total_len = src.be_u24_at(start + 4)?;
        let edition = src.u8_at(start + 7)?;
        if !matches!(edition, 3 | 4) {
            return Err(Error::InvalidEdition(edition));
        }
        if start + u64::from(total_len) > len {
            return Err(Error::Truncated {
                declared: u64::from(total_len),
                available: len - start,
            });
        }

        let section1 = start + SECTION0_LEN;
        let flags_offset = if edition == 4 { 9 } else { 7 };
        let has_section2 = src.u8_at(section1 + flags_offset)? & 0x80 != 0;

        let mut next = section1 + u64::from(src.be_u24_at(section1)?);
        let section2 = if has_section2 {
            let s2 = next;
            next = s2 + u64::from(src.be_u24_at(s2)?);
            Some(s2)
        } else {
            None
        };
        let section3 = next;
        let section4 = section3 + u64::from(src.be_u24_at(section3)?);
        let section5 = section4 + u64::from(src.be_u24_at(section4)?);

        Ok(Self {
            src: src.clone(),
            start,
            total_len,
            edition,
            section1,
            section2,
            section3,
            section4,
            section5,
        })
    }

    pub const fn start_offset(&self) -> u64 {
        self.start
    }

    /// First byte past this message; the next framing scan starts here.
    pub const fn end_offset(&self) -> u64 {
        self.start + self.total_len as u64
    }

    pub const fn total_length(&self) -> u32 {
        self.total_len
    }

    pub const fn edition(&self) -> u8 {
        self.edition
    }

    pub const fn has_section2(&self) -> bool {
        self.section2.is_some()
    }

    pub const fn section1_length(&self) -> u64 {
        (match self.section2 {
            Some(s2) => s2,
            None => self.section3,
        }) - self.section1
    }

    pub const fn section2_length(&self) -> u64 {
        match self.section2 {
            Some(s2) => self.section3 - s2,
            None => 0,
        }
    }

    pub const fn section3_length(&self) -> u64 {
        self.section4 - self.section3
    }

    pub const fn section4_length(&self) -> u64 {
        self.section5 - self.section4
    }

    /// Byte offset inside section 1, accounting for the edition-4 layout.
    const fn s1(&self, ed3: u64, ed4: u64) -> u64 {
        self.section1 + if self.edition == 4 { ed4 } else { ed3 }
    }

    // Section 1 wire layout (by edition):
    //
    // | Field                      | ed.3 | ed.4 |
    // |----------------------------|------|------|
    // | length                     | 0 (3B) | 0 (3B) |
    // | master table               | 3    | 3    |
    // | originating center         | 5 (1B) | 4 (2B) |
    // | originating subcenter      | 4 (1B) | 6 (2B) |
    // | update sequence number     | 6    | 8    |
    // | flags (bit 7: section 2)   | 7    | 9    |
    // | data category              | 8    | 10   |
    // | international sub-category | —    | 11   |
    // | local sub-category         | 9    | 12   |
    // | master table version       | 10   | 13   |
    // | local table version        | 11   | 14   |
    // | year                       | 12 (1B) | 15 (2B) |
    // | month / day / hour / minute| 13.. | 17.. |
    // | second                     | —    | 21   |
    // | local data                 | 17.. | 22.. |

    pub fn master_table(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(3, 3))
    }

    pub fn originating_center(&self) -> Result<u16, Error> {
        if self.edition == 4 {
            self.src.be_u16_at(self.s1(0, 4))
        } else {
            self.src.u8_at(self.s1(5, 0)).map(u16::from)
        }
    }

    pub fn originating_subcenter(&self) -> Result<u16, Error> {
        if self.edition == 4 {
            self.src.be_u16_at(self.s1(0, 6))
        } else {
            self.src.u8_at(self.s1(4, 0)).map(u16::from)
        }
    }

    pub fn update_sequence_number(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(6, 8))
    }

    pub fn data_category(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(8, 10))
    }

    /// The merged Table A description for [Message::data_category], when the
    /// tables define it.
    pub fn data_category_description(
        &self,
        tables: &MessageTables,
    ) -> Result<Option<String>, Error> {
        let code = self.data_category()?;
        Ok(tables
            .table_a
            .category(u16::from(code))
            .map(str::to_owned))
    }

    /// Edition 4 only.
    pub fn international_sub_category(&self) -> Result<Option<u8>, Error> {
        if self.edition == 4 {
            self.src.u8_at(self.s1(0, 11)).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn local_sub_category(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(9, 12))
    }

    pub fn master_table_version(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(10, 13))
    }

    pub fn local_table_version(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(11, 14))
    }

    /// Full year in edition 4, year of century in edition 3.
    pub fn year(&self) -> Result<u16, Error> {
        if self.edition == 4 {
            self.src.be_u16_at(self.s1(0, 15))
        } else {
            self.src.u8_at(self.s1(12, 0)).map(u16::from)
        }
    }

    pub fn month(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(13, 17))
    }

    pub fn day(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(14, 18))
    }

    pub fn hour(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(15, 19))
    }

    pub fn minute(&self) -> Result<u8, Error> {
        self.src.u8_at(self.s1(16, 20))
    }

    /// Edition 3 has no seconds field and reports zero.
    pub fn second(&self) -> Result<u8, Error> {
        if self.edition == 4 {
            self.src.u8_at(self.s1(0, 21))
        } else {
            Ok(0)
        }
    }

    /// Bytes of section 1 past the fixed identification fields.
    pub fn section1_local_data(&self) -> Result<Vec<u8>, Error> {
        let from = self.s1(17, 22);
        let end = self.section2.unwrap_or(self.section3);
        self.src.range(from.min(end), end)
    }

    /// The opaque payload of section 2, empty when the section is absent.
    pub fn section2_local_data(&self) -> Result<Vec<u8>, Error> {
        match self.section2 {
            Some(s2) => self.src.range(s2 + 4, self.section3),
            None => Ok(Vec::new()),
        }
    }

    // Section 3: length (3B) | reserved (1B) | subset count (2B) |
    // flags (1B, bit 7 observed, bit 6 compressed) | descriptors (2B each) |
    // optional pad byte.

    pub fn number_of_subsets(&self) -> Result<u16, Error> {
        self.src.be_u16_at(self.section3 + 4)
    }

    pub fn observed_data(&self) -> Result<bool, Error> {
        Ok(self.src.u8_at(self.section3 + 6)? & 0x80 != 0)
    }

    pub fn compressed(&self) -> Result<bool, Error> {
        Ok(self.src.u8_at(self.section3 + 6)? & 0x40 != 0)
    }

    /// The raw descriptor list of section 3. A trailing odd byte is padding.
    pub fn descriptors(&self) -> Result<Vec<Descriptor>, Error> {
        let bytes = self.src.range(self.section3 + 7, self.section4)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| Descriptor::from_u16(u16::from_be_bytes([pair[0], pair[1]])))
            .collect())
    }

    /// The bit-packed subset payload of section 4.
    pub fn payload(&self) -> Result<Vec<u8>, Error> {
        self.src.range(self.section4 + 4, self.section5)
    }

    /// Build the merged A/B/D/F tables for this message's identification.
    pub fn tables(&self, collection: &TableCollection) -> Result<MessageTables, Error> {
        let master = self.master_table()?;
        let center = self.originating_center()?;
        let master_version = self.master_table_version()?;
        let local_version = self.local_table_version()?;

        let merged = |table_type| {
            collection.message_table(table_type, master, master_version, center, local_version)
        };
        Ok(MessageTables {
            table_a: merged(TableType::A),
            table_b: merged(TableType::B),
            table_d: merged(TableType::D),
            table_f: merged(TableType::F),
        })
    }

    /// Decode every uncompressed subset of this message.
    pub fn decode<'t>(&self, tables: &'t MessageTables) -> Result<Vec<Subset<'t>>, Error> {
        if self.compressed()? {
            return Err(Error::Unsupported("compressed data subsets"));
        }

        let descriptors = self.descriptors()?;
        let plan = Expander::new(&tables.table_b, &tables.table_d).expand(&descriptors);

        let payload = self.payload()?;
        let mut cursor = BitCursor::new(&payload);
        let mut decoder = SubsetDecoder::new(&tables.table_f);

        (0..self.number_of_subsets()?)
            .map(|_| decoder.decode(&plan, &mut cursor))
            .collect()
    }
}

/// Iterates the framed messages of a byte stream, skipping garbage between
/// them. Exhausting the stream ends iteration; any other framing failure
/// surfaces and ends it too.
#[derive(Debug)]
pub struct MessageStream<R> {
    src: ByteSource<R>,
    offset: u64,
    done: bool,
}

impl<R: Read + Seek> MessageStream<R> {
    pub fn new(reader: R) -> Self {
        Self::from_source(ByteSource::new(reader))
    }

    pub const fn from_source(src: ByteSource<R>) -> Self {
        Self {
            src,
            offset: 0,
            done: false,
        }
    }

    pub const fn source(&self) -> &ByteSource<R> {
        &self.src
    }

    pub fn next_message(&mut self) -> Result<Option<Message<R>>, Error> {
        if self.done {
            return Ok(None);
        }
        match Message::frame(&self.src, self.offset) {
            Ok(message) => {
                self.offset = message.end_offset();
                Ok(Some(message))
            }
            Err(Error::NoMessage) => {
                self.done = true;
                Ok(None)
            }
            Err(err) => {
                self.done = true;
                Err(err)
            }
        }
    }

    /// Drain the stream. Fails with [Error::NoMessage] when the stream held
    /// no message at all.
    pub fn collect_messages(mut self) -> Result<Vec<Message<R>>, Error> {
        let mut messages = Vec::new();
        while let Some(message) = self.next_message()? {
            messages.push(message);
        }
        if messages.is_empty() {
            return Err(Error::NoMessage);
        }
        Ok(messages)
    }
}

impl<R: Read + Seek> Iterator for MessageStream<R> {
    type Item = Result<Message<R>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message().transpose()
    }
}
