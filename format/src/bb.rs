use std::borrow::Cow;
use std::str;

/// A big-endian byte buffer meant for reading resource data.
///
/// Example usage:
///
/// ```
/// use std::borrow::Cow;
/// let mut bb = kdl_format::ByteBuffer::new(&[0x01, 0x02, 3, b'a', b'b', b'c']);
/// assert_eq!(bb.read_u16(), Ok(0x0102));
/// assert_eq!(bb.read_pstr(), Ok(Cow::Borrowed("abc")));
/// ```
///
pub struct ByteBuffer<'a> {
    data: &'a [u8],
    index: usize,
}

impl<'a> ByteBuffer<'a> {
    /// Create a new ByteBuffer that wraps the provided byte slice. The lifetime
    /// of the returned ByteBuffer must not outlive the lifetime of the byte
    /// slice.
    pub fn new(data: &[u8]) -> ByteBuffer {
        ByteBuffer { data, index: 0 }
    }

    /// Retrieves the underlying byte slice.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Retrieves the current index into the underlying byte slice. This starts
    /// off as 0 and ends up as `self.data().len()` when everything has been
    /// read.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns `true` once every byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.index >= self.data.len()
    }

    /// Try to read a boolean value starting at the current index.
    pub fn read_bool(&mut self) -> Result<bool, ()> {
        match self.read_byte() {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            _ => Err(()),
        }
    }

    /// Try to read a byte starting at the current index.
    pub fn read_byte(&mut self) -> Result<u8, ()> {
        if self.index >= self.data.len() {
            Err(())
        } else {
            let value = self.data[self.index];
            self.index += 1;
            Ok(value)
        }
    }

    /// Try to read `len` bytes starting at the current index.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ()> {
        if self.index + len > self.data.len() {
            Err(())
        } else {
            let value = &self.data[self.index..self.index + len];
            self.index += len;
            Ok(value)
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ()> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_i8(&mut self) -> Result<i8, ()> {
        Ok(self.read_byte()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, ()> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ()> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ()> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ()> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ()> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ()> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    /// Try to read a NUL-terminated string (`CSTR`) starting at the current
    /// index.
    pub fn read_cstr(&mut self) -> Result<Cow<'a, str>, ()> {
        let start = self.index;

        while self.index < self.data.len() {
            if self.data[self.index] == 0 {
                self.index += 1;
                return Ok(String::from_utf8_lossy(&self.data[start..self.index - 1]));
            }

            self.index += 1;
        }

        Err(())
    }

    /// Try to read a length-byte prefixed string (`PSTR`).
    pub fn read_pstr(&mut self) -> Result<Cow<'a, str>, ()> {
        let len = self.read_byte()? as usize;
        Ok(String::from_utf8_lossy(self.read_bytes(len)?))
    }

    /// Try to read a `PSTR` that was padded to an even total size (`OSTR`).
    pub fn read_ostr(&mut self) -> Result<Cow<'a, str>, ()> {
        let len = self.read_byte()? as usize;
        let value = String::from_utf8_lossy(self.read_bytes(len)?);
        if (len + 1) % 2 != 0 {
            self.read_byte()?;
        }
        Ok(value)
    }

    /// Try to read a u32 length prefixed string (`LSTR`).
    pub fn read_lstr(&mut self) -> Result<Cow<'a, str>, ()> {
        let len = self.read_u32()? as usize;
        Ok(String::from_utf8_lossy(self.read_bytes(len)?))
    }

    /// Try to read a fixed-width NUL padded string (`Cnnn`).
    pub fn read_fixed_str(&mut self, width: usize) -> Result<Cow<'a, str>, ()> {
        let bytes = self.read_bytes(width)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]))
    }

    /// Returns everything that has not been read yet.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let value = &self.data[self.index.min(self.data.len())..];
        self.index = self.data.len();
        value
    }
}

#[test]
fn read_bool() {
    let read = |bytes| ByteBuffer::new(bytes).read_bool();
    assert_eq!(read(&[]), Err(()));
    assert_eq!(read(&[0]), Ok(false));
    assert_eq!(read(&[1]), Ok(true));
    assert_eq!(read(&[2]), Err(()));
}

#[test]
fn read_byte() {
    let read = |bytes| ByteBuffer::new(bytes).read_byte();
    assert_eq!(read(&[]), Err(()));
    assert_eq!(read(&[0]), Ok(0));
    assert_eq!(read(&[254]), Ok(254));
    assert_eq!(read(&[255]), Ok(255));
}

#[test]
fn read_bytes() {
    let mut bb = ByteBuffer::new(&[1, 2, 3, 4, 5]);
    assert_eq!(bb.read_bytes(3), Ok(vec![1, 2, 3].as_slice()));
    assert_eq!(bb.read_bytes(2), Ok(vec![4, 5].as_slice()));
    assert_eq!(bb.read_bytes(1), Err(()));
    assert!(bb.is_exhausted());
}

#[test]
fn read_integers_big_endian() {
    let mut bb = ByteBuffer::new(&[
        0xFF, 0x12, 0x34, 0xFF, 0xFE, 0x00, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2A,
    ]);
    assert_eq!(bb.read_i8(), Ok(-1));
    assert_eq!(bb.read_u16(), Ok(0x1234));
    assert_eq!(bb.read_i16(), Ok(-2));
    assert_eq!(bb.read_u32(), Ok(256));
    assert_eq!(bb.read_i64(), Ok(i64::MIN));
    assert_eq!(bb.read_u64(), Ok(42));
    assert_eq!(bb.read_u16(), Err(()));
}

#[test]
fn read_strings() {
    assert_eq!(ByteBuffer::new(&[]).read_cstr(), Err(()));
    assert_eq!(ByteBuffer::new(&[97, 0]).read_cstr(), Ok(Cow::Borrowed("a")));
    assert_eq!(ByteBuffer::new(&[97]).read_cstr(), Err(()));
    assert_eq!(ByteBuffer::new(&[2, 104, 105]).read_pstr(), Ok(Cow::Borrowed("hi")));
    assert_eq!(ByteBuffer::new(&[3, 104, 105]).read_pstr(), Err(()));
    assert_eq!(ByteBuffer::new(&[0, 0, 0, 1, 122]).read_lstr(), Ok(Cow::Borrowed("z")));
    assert_eq!(
        ByteBuffer::new(&[104, 105, 0, 0]).read_fixed_str(4),
        Ok(Cow::Borrowed("hi"))
    );

    let mut bb = ByteBuffer::new(&[2, 104, 105, 0, 7]);
    assert_eq!(bb.read_ostr(), Ok(Cow::Borrowed("hi")));
    assert_eq!(bb.read_byte(), Ok(7));
}

/// A big-endian byte buffer meant for writing resource data.
///
/// Example usage:
///
/// ```
/// let mut bb = kdl_format::ByteBufferMut::new();
/// bb.write_u16(0x0102);
/// bb.write_pstr("abc");
/// assert_eq!(bb.data(), [0x01, 0x02, 3, b'a', b'b', b'c']);
/// ```
///
#[derive(Default)]
pub struct ByteBufferMut {
    data: Vec<u8>,
}

impl ByteBufferMut {
    /// Creates an empty ByteBufferMut ready for writing.
    pub fn new() -> ByteBufferMut {
        ByteBufferMut { data: vec![] }
    }

    /// Consumes this buffer and returns the underlying backing store. Use this
    /// to get the data out when you're done writing to the buffer.
    pub fn data(self) -> Vec<u8> {
        self.data
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write a boolean value to the end of the buffer.
    pub fn write_bool(&mut self, value: bool) {
        self.data.push(if value { 1 } else { 0 });
    }

    /// Write a byte to the end of the buffer.
    pub fn write_byte(&mut self, value: u8) {
        self.data.push(value);
    }

    /// Write a raw byte slice to the end of the buffer.
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.data.extend_from_slice(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.data.push(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a NUL-terminated UTF-8 string (`CSTR`).
    pub fn write_cstr(&mut self, value: &str) {
        self.data.extend_from_slice(value.as_bytes());
        self.data.push(0);
    }

    /// Write a length-byte prefixed string (`PSTR`). Strings longer than 255
    /// bytes are truncated.
    pub fn write_pstr(&mut self, value: &str) {
        let bytes = &value.as_bytes()[..value.len().min(u8::MAX as usize)];
        self.data.push(bytes.len() as u8);
        self.data.extend_from_slice(bytes);
    }

    /// Write a `PSTR` padded so that the total size is even (`OSTR`).
    pub fn write_ostr(&mut self, value: &str) {
        self.write_pstr(value);
        let len = value.len().min(u8::MAX as usize);
        if (len + 1) % 2 != 0 {
            self.data.push(0);
        }
    }

    /// Write a u32 length prefixed string (`LSTR`).
    pub fn write_lstr(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Write a fixed-width NUL padded string (`Cnnn`). The value is truncated
    /// so that at least one terminating NUL always fits.
    pub fn write_fixed_str(&mut self, value: &str, width: usize) {
        if width == 0 {
            return;
        }
        let bytes = &value.as_bytes()[..value.len().min(width - 1)];
        self.data.extend_from_slice(bytes);
        self.data.resize(self.data.len() + (width - bytes.len()), 0);
    }
}

#[cfg(test)]
fn write_once(cb: fn(&mut ByteBufferMut)) -> Vec<u8> {
    let mut bb = ByteBufferMut::new();
    cb(&mut bb);
    bb.data()
}

#[test]
fn write_bool() {
    assert_eq!(write_once(|bb| bb.write_bool(false)), [0]);
    assert_eq!(write_once(|bb| bb.write_bool(true)), [1]);
}

#[test]
fn write_integers_big_endian() {
    assert_eq!(write_once(|bb| bb.write_i8(-1)), [0xFF]);
    assert_eq!(write_once(|bb| bb.write_u16(0x1234)), [0x12, 0x34]);
    assert_eq!(write_once(|bb| bb.write_i16(-2)), [0xFF, 0xFE]);
    assert_eq!(write_once(|bb| bb.write_u32(256)), [0, 0, 1, 0]);
    assert_eq!(write_once(|bb| bb.write_i32(-1)), [0xFF, 0xFF, 0xFF, 0xFF]);
    assert_eq!(write_once(|bb| bb.write_u64(42)), [0, 0, 0, 0, 0, 0, 0, 42]);
    assert_eq!(
        write_once(|bb| bb.write_i64(i64::MIN)),
        [0x80, 0, 0, 0, 0, 0, 0, 0]
    );
}

#[test]
fn write_strings() {
    assert_eq!(write_once(|bb| bb.write_cstr("")), [0]);
    assert_eq!(write_once(|bb| bb.write_cstr("abc")), [97, 98, 99, 0]);
    assert_eq!(write_once(|bb| bb.write_pstr("hi")), [2, 104, 105]);
    assert_eq!(write_once(|bb| bb.write_ostr("hi")), [2, 104, 105, 0]);
    assert_eq!(write_once(|bb| bb.write_ostr("abc")), [3, 97, 98, 99]);
    assert_eq!(write_once(|bb| bb.write_lstr("z")), [0, 0, 0, 1, 122]);
    assert_eq!(write_once(|bb| bb.write_fixed_str("hi", 4)), [104, 105, 0, 0]);
    assert_eq!(write_once(|bb| bb.write_fixed_str("hello", 4)), [104, 101, 108, 0]);
}

#[test]
fn write_pstr_truncates_long_values() {
    let long = "x".repeat(300);
    let mut bb = ByteBufferMut::new();
    bb.write_pstr(&long);
    let data = bb.data();
    assert_eq!(data[0], 255);
    assert_eq!(data.len(), 256);
}

#[test]
fn write_sequence() {
    let mut bb = ByteBufferMut::new();
    bb.write_u16(2);
    bb.write_pstr("ok");
    bb.write_i32(-3);
    let data = bb.data();

    let mut reader = ByteBuffer::new(&data);
    assert_eq!(reader.read_u16(), Ok(2));
    assert_eq!(reader.read_pstr(), Ok(Cow::Borrowed("ok")));
    assert_eq!(reader.read_i32(), Ok(-3));
    assert!(reader.is_exhausted());
}
