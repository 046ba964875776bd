//! Record serialiser: encodes one row as a SQLite record — a header of
//! serial-type varints followed by the column bodies — and decodes the same
//! shape back into typed values.

use crate::varint::{self, bits_to_double, double_to_bits};

/// SQLite's column-body serial type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    I8,
    I16,
    I24,
    I32,
    I48,
    I64,
    F64,
    Zero,
    One,
    Blob(u64),
    Text(u64),
}

impl SerialType {
    pub fn code(self) -> u64 {
        match self {
            SerialType::Null => 0,
            SerialType::I8 => 1,
            SerialType::I16 => 2,
            SerialType::I24 => 3,
            SerialType::I32 => 4,
            SerialType::I48 => 5,
            SerialType::I64 => 6,
            SerialType::F64 => 7,
            SerialType::Zero => 8,
            SerialType::One => 9,
            SerialType::Blob(n) => n * 2 + 12,
            SerialType::Text(n) => n * 2 + 13,
        }
    }

    /// The number of body bytes a serial type occupies.
    pub fn data_len(self) -> u32 {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One => 0,
            SerialType::I8 => 1,
            SerialType::I16 => 2,
            SerialType::I24 => 3,
            SerialType::I32 => 4,
            SerialType::I48 => 6,
            SerialType::I64 | SerialType::F64 => 8,
            SerialType::Blob(n) => n as u32,
            SerialType::Text(n) => n as u32,
        }
    }
}

/// Same as `SerialType::data_len`, operating directly on the raw on-disk
/// code without decoding a full `SerialType` first.
pub fn derive_data_len(serial_type: u64) -> u32 {
    SerialType::from_code(serial_type).data_len()
}

impl SerialType {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => SerialType::Null,
            1 => SerialType::I8,
            2 => SerialType::I16,
            3 => SerialType::I24,
            4 => SerialType::I32,
            5 => SerialType::I48,
            6 => SerialType::I64,
            7 => SerialType::F64,
            8 => SerialType::Zero,
            9 => SerialType::One,
            n if n % 2 == 0 => SerialType::Blob((n - 12) / 2),
            n => SerialType::Text((n - 13) / 2),
        }
    }
}

/// A decoded column value, owning its bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    I8(i8),
    I16(i16),
    I24(i32),
    I32(i32),
    I48(i64),
    I64(i64),
    F64(f64),
    Zero,
    One,
    Blob(Vec<u8>),
    Text(String),
}

impl ColumnValue {
    pub fn read(ty: SerialType, data: &[u8]) -> (Self, usize) {
        match ty {
            SerialType::Null => (ColumnValue::Null, 0),
            SerialType::I8 => (ColumnValue::I8(data[0] as i8), 1),
            SerialType::I16 => (ColumnValue::I16(varint::read_u16(data) as i16), 2),
            SerialType::I24 => {
                let raw = varint::read_u24(data);
                let signed = sign_extend(raw.into(), 24);
                (ColumnValue::I24(signed as i32), 3)
            }
            SerialType::I32 => (ColumnValue::I32(varint::read_u32(data) as i32), 4),
            SerialType::I48 => {
                let raw = varint::read_u48(data);
                let signed = sign_extend(raw, 48);
                (ColumnValue::I48(signed), 6)
            }
            SerialType::I64 => (ColumnValue::I64(varint::read_u64(data) as i64), 8),
            SerialType::F64 => (ColumnValue::F64(bits_to_double(varint::read_u64(data))), 8),
            SerialType::Zero => (ColumnValue::Zero, 0),
            SerialType::One => (ColumnValue::One, 0),
            SerialType::Blob(n) => (ColumnValue::Blob(data[..n as usize].to_vec()), n as usize),
            SerialType::Text(n) => (
                ColumnValue::Text(String::from_utf8_lossy(&data[..n as usize]).into_owned()),
                n as usize,
            ),
        }
    }

    pub fn serial_type(&self) -> SerialType {
        match self {
            ColumnValue::Null => SerialType::Null,
            ColumnValue::I8(_) => SerialType::I8,
            ColumnValue::I16(_) => SerialType::I16,
            ColumnValue::I24(_) => SerialType::I24,
            ColumnValue::I32(_) => SerialType::I32,
            ColumnValue::I48(_) => SerialType::I48,
            ColumnValue::I64(_) => SerialType::I64,
            ColumnValue::F64(_) => SerialType::F64,
            ColumnValue::Zero => SerialType::Zero,
            ColumnValue::One => SerialType::One,
            ColumnValue::Blob(b) => SerialType::Blob(b.len() as u64),
            ColumnValue::Text(s) => SerialType::Text(s.len() as u64),
        }
    }
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((raw << shift) as i64) >> shift
}

/// Parses the cell's record bytes into a sequence of `(SerialType, body)`.
pub fn parse_record(data: &[u8]) -> Vec<(SerialType, &[u8])> {
    let (header_len, header_varint_len) = varint::read_varint(data);
    let mut header_pos = header_varint_len;
    let mut body_pos = header_len as usize;
    let mut out = Vec::new();

    while header_pos < header_len as usize {
        let (code, len) = varint::read_varint(&data[header_pos..]);
        header_pos += len;
        let ty = SerialType::from_code(code);
        let body_len = ty.data_len() as usize;
        out.push((ty, &data[body_pos..body_pos + body_len]));
        body_pos += body_len;
    }

    out
}

/// A typed column value the writer has been handed, as a
/// `(type_tag, value, length_hint)` triple. INT length hints of 1/2/4/8
/// select serial types 1/2/4/6; widths 3 and 6 are reader-only.
#[derive(Debug, Clone)]
pub enum ColumnRef<'a> {
    Null,
    Int { bytes: &'a [u8] },
    Real { bytes: &'a [u8] },
    Text(&'a [u8]),
    Blob(&'a [u8]),
}

impl<'a> ColumnRef<'a> {
    fn serial_type(&self) -> Result<SerialType, crate::error::Error> {
        Ok(match self {
            ColumnRef::Null => SerialType::Null,
            ColumnRef::Int { bytes } => match bytes.len() {
                1 => SerialType::I8,
                2 => SerialType::I16,
                4 => SerialType::I32,
                8 => SerialType::I64,
                n => return Err(crate::error::Error::Malformed(int_width_msg(n))),
            },
            ColumnRef::Real { bytes } => {
                if bytes.len() != 8 {
                    return Err(crate::error::Error::Malformed("REAL column must be 8 bytes"));
                }
                SerialType::F64
            }
            ColumnRef::Text(bytes) => SerialType::Text(bytes.len() as u64),
            ColumnRef::Blob(bytes) => SerialType::Blob(bytes.len() as u64),
        })
    }

    fn body(&self) -> &[u8] {
        match self {
            ColumnRef::Null => &[],
            ColumnRef::Int { bytes } | ColumnRef::Real { bytes } => bytes,
            ColumnRef::Text(bytes) | ColumnRef::Blob(bytes) => bytes,
        }
    }
}

fn int_width_msg(n: usize) -> &'static str {
    match n {
        0 => "INT column must be 1, 2, 4 or 8 bytes (got 0)",
        3 => "INT column must be 1, 2, 4 or 8 bytes (got 3; width 3 is reader-only)",
        6 => "INT column must be 1, 2, 4 or 8 bytes (got 6; width 6 is reader-only)",
        _ => "INT column must be 1, 2, 4 or 8 bytes",
    }
}

/// Two-phase record builder: `measure` first (to decide whether the row fits
/// the current leaf), then `write_into` once placement is decided.
pub struct RecordWriter<'a> {
    columns: &'a [ColumnRef<'a>],
    serial_types: Vec<SerialType>,
    header_len: usize,
    body_len: usize,
}

impl<'a> RecordWriter<'a> {
    pub fn new(columns: &'a [ColumnRef<'a>]) -> Result<Self, crate::error::Error> {
        let serial_types = columns
            .iter()
            .map(|c| c.serial_type())
            .collect::<Result<Vec<_>, _>>()?;

        // The header itself starts with a varint of its own total length,
        // which can recursively affect that length; SQLite resolves this by
        // trying lengths until the varint size stabilises (it never takes
        // more than one extra byte in practice for realistic column counts).
        let type_varints_len: usize = serial_types.iter().map(|t| varint::varint_len(t.code())).sum();
        let mut header_len = varint::varint_len(type_varints_len as u64) + type_varints_len;
        loop {
            let candidate = varint::varint_len(header_len as u64) + type_varints_len;
            if candidate == header_len {
                break;
            }
            header_len = candidate;
        }

        let body_len: usize = serial_types.iter().map(|t| t.data_len() as usize).sum();

        Ok(Self {
            columns,
            serial_types,
            header_len,
            body_len,
        })
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn body_len(&self) -> usize {
        self.body_len
    }

    pub fn total_len(&self) -> usize {
        self.header_len + self.body_len
    }

    /// Writes the full record (header + body) into `out`, which must be at
    /// least `total_len()` bytes.
    pub fn write_into(&self, out: &mut [u8]) {
        let mut pos = varint::write_varint(self.header_len as u64, out);
        for ty in &self.serial_types {
            pos += varint::write_varint(ty.code(), &mut out[pos..]);
        }
        debug_assert_eq!(pos, self.header_len);

        for column in self.columns {
            let body = column.body();
            out[pos..pos + body.len()].copy_from_slice(body);
            pos += body.len();
        }
        debug_assert_eq!(pos, self.header_len + self.body_len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_width_selects_serial_type() {
        let v127: [u8; 1] = [127];
        let v128: [u8; 2] = 128i16.to_be_bytes();
        let v32768: [u8; 4] = 32768i32.to_be_bytes();
        let v_big: [u8; 8] = 2147483648i64.to_be_bytes();

        let cols = [
            ColumnRef::Int { bytes: &v127 },
            ColumnRef::Int { bytes: &v128 },
            ColumnRef::Int { bytes: &v32768 },
            ColumnRef::Int { bytes: &v_big },
        ];
        let writer = RecordWriter::new(&cols).unwrap();
        assert_eq!(
            writer.serial_types,
            vec![SerialType::I8, SerialType::I16, SerialType::I32, SerialType::I64]
        );
    }

    #[test]
    fn write_then_parse_round_trips() {
        let text = b"hello".to_vec();
        let real: [u8; 8] = double_to_bits(3.5).to_be_bytes();
        let cols = [ColumnRef::Text(&text), ColumnRef::Real { bytes: &real }, ColumnRef::Null];
        let writer = RecordWriter::new(&cols).unwrap();
        let mut buf = vec![0u8; writer.total_len()];
        writer.write_into(&mut buf);

        let parsed = parse_record(&buf);
        assert_eq!(parsed.len(), 3);
        let (ty0, body0) = parsed[0];
        assert_eq!(ty0, SerialType::Text(5));
        assert_eq!(body0, b"hello");
        let (value, _) = ColumnValue::read(parsed[1].0, parsed[1].1);
        assert_eq!(value, ColumnValue::F64(3.5));
        assert_eq!(parsed[2].0, SerialType::Null);
    }

    #[test]
    fn rejects_bad_int_width() {
        let v: [u8; 3] = [1, 2, 3];
        let cols = [ColumnRef::Int { bytes: &v }];
        assert!(RecordWriter::new(&cols).is_err());
    }
}
