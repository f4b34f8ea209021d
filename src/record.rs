//! Binary codec for bin files.
//!
//! A bin starts with a [`Header`] of nine single-byte fields, followed by
//! [`Record`]s. Every record field is stored big-endian in exactly the number
//! of bytes its header declares, so two bins may encode the same logical field
//! with different widths. A width of zero stores nothing and decodes as zero.

use anyhow::{Context, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::constants::{HEADER_SIZE, MAX_FIELD_BYTES};
use crate::errors::MergeError;

/// Largest encoded record: five fields of [`MAX_FIELD_BYTES`].
const MAX_RECORD_SIZE: usize = 5 * MAX_FIELD_BYTES as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub sample_id_size_bytes: u8,
    pub barcode_size_bytes: u8,
    pub anchor_size_bytes: u8,
    pub target_size_bytes: u8,
    pub counter_size_bytes: u8,
    pub barcode_len_symbols: u8,
    pub anchor_len_symbols: u8,
    pub target_len_symbols: u8,
    pub gap_len_symbols: u8,
}

impl Header {
    /// Reads and validates a header from the start of a bin.
    pub fn load<R: Read>(reader: &mut R) -> Result<Header> {
        let mut buf = [0u8; HEADER_SIZE];
        let read = read_full(reader, &mut buf).context("read bin header")?;
        if read != HEADER_SIZE {
            return Err(MergeError::MalformedHeader(format!(
                "expected {HEADER_SIZE} bytes, found {read}"
            ))
            .into());
        }
        let header = Header {
            sample_id_size_bytes: buf[0],
            barcode_size_bytes: buf[1],
            anchor_size_bytes: buf[2],
            target_size_bytes: buf[3],
            counter_size_bytes: buf[4],
            barcode_len_symbols: buf[5],
            anchor_len_symbols: buf[6],
            target_len_symbols: buf[7],
            gap_len_symbols: buf[8],
        };
        header.validate()?;
        Ok(header)
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_all(&[
                self.sample_id_size_bytes,
                self.barcode_size_bytes,
                self.anchor_size_bytes,
                self.target_size_bytes,
                self.counter_size_bytes,
                self.barcode_len_symbols,
                self.anchor_len_symbols,
                self.target_len_symbols,
                self.gap_len_symbols,
            ])
            .context("write bin header")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MergeError> {
        let widths = [
            ("sample id", self.sample_id_size_bytes),
            ("barcode", self.barcode_size_bytes),
            ("anchor", self.anchor_size_bytes),
            ("target", self.target_size_bytes),
            ("counter", self.counter_size_bytes),
        ];
        for (name, width) in widths {
            if width > MAX_FIELD_BYTES {
                return Err(MergeError::MalformedHeader(format!(
                    "{name} width {width} exceeds {MAX_FIELD_BYTES} bytes"
                )));
            }
        }
        let symbols = [
            ("barcode", self.barcode_len_symbols),
            ("anchor", self.anchor_len_symbols),
            ("target", self.target_len_symbols),
        ];
        for (name, len) in symbols {
            if len > 32 {
                return Err(MergeError::MalformedHeader(format!(
                    "{name} length {len} does not fit a packed 64-bit k-mer"
                )));
            }
        }
        if self.record_size() == 0 {
            return Err(MergeError::MalformedHeader("all field widths are zero".to_string()));
        }
        Ok(())
    }

    pub fn record_size(&self) -> usize {
        self.sample_id_size_bytes as usize
            + self.barcode_size_bytes as usize
            + self.anchor_size_bytes as usize
            + self.target_size_bytes as usize
            + self.counter_size_bytes as usize
    }
}

/// One observation. Field order gives the derived ordering
/// `(anchor, target, sample_id, barcode, count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Record {
    pub anchor: u64,
    pub target: u64,
    pub sample_id: u64,
    pub barcode: u64,
    pub count: u64,
}

impl Record {
    /// Decodes the next record, `None` at a clean end of stream.
    pub fn load<R: Read>(reader: &mut R, header: &Header) -> Result<Option<Record>> {
        let size = header.record_size();
        let mut buf = [0u8; MAX_RECORD_SIZE];
        let read = read_full(reader, &mut buf[..size]).context("read record")?;
        if read == 0 {
            return Ok(None);
        }
        if read != size {
            anyhow::bail!("truncated record: expected {size} bytes, found {read}");
        }
        let mut fields = &buf[..size];
        let sample_id = read_field(&mut fields, header.sample_id_size_bytes)?;
        let barcode = read_field(&mut fields, header.barcode_size_bytes)?;
        let anchor = read_field(&mut fields, header.anchor_size_bytes)?;
        let target = read_field(&mut fields, header.target_size_bytes)?;
        let count = read_field(&mut fields, header.counter_size_bytes)?;
        Ok(Some(Record { anchor, target, sample_id, barcode, count }))
    }

    pub fn serialize<W: Write>(&self, writer: &mut W, header: &Header) -> Result<()> {
        let mut buf = Cursor::new([0u8; MAX_RECORD_SIZE]);
        let fields = [
            ("sample id", self.sample_id, header.sample_id_size_bytes),
            ("barcode", self.barcode, header.barcode_size_bytes),
            ("anchor", self.anchor, header.anchor_size_bytes),
            ("target", self.target, header.target_size_bytes),
            ("counter", self.count, header.counter_size_bytes),
        ];
        for (name, value, width) in fields {
            write_field(&mut buf, name, value, width)?;
        }
        let len = buf.position() as usize;
        writer.write_all(&buf.get_ref()[..len]).context("write record")?;
        Ok(())
    }
}

fn read_field(fields: &mut &[u8], width: u8) -> io::Result<u64> {
    if width == 0 {
        return Ok(0);
    }
    fields.read_uint::<BigEndian>(width as usize)
}

fn write_field<W: Write>(out: &mut W, field: &'static str, value: u64, width: u8) -> Result<()> {
    if width == 0 && value == 0 {
        return Ok(());
    }
    if width < 8 && value >> (8 * width as u32) != 0 {
        return Err(MergeError::ValueTooWide { field, value, width }.into());
    }
    out.write_uint::<BigEndian>(value, width as usize)?;
    Ok(())
}

/// Like `read_exact`, but reports how many bytes were available instead of
/// failing on a short read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match reader.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}
