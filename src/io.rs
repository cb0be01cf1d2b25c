use crate::result::{LoadError, LoadResult, Section};

/// Seekable big-endian reader over the module bytes.
///
/// The whole module is resident in memory, so seeking never fails by itself.
/// Reading past the end does.
pub struct Reader<'a> {
    pub data: &'a [u8],
    pub cur: usize,
}

#[derive(Debug)]
pub struct ReadError;

pub trait SectionExt<T> {
    /// Attribute a short read to a section of the module
    fn section(self, section: Section) -> LoadResult<T>;
}

impl<T> SectionExt<T> for Result<T, ReadError> {
    fn section(self, section: Section) -> LoadResult<T> {
        self.map_err(|ReadError| LoadError::Truncated(section))
    }
}

impl<'a> Reader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, cur: 0 }
    }
    pub const fn seek(&mut self, pos: usize) {
        self.cur = pos;
    }
    pub const fn skip(&mut self, amount: usize) {
        self.cur = self.cur.saturating_add(amount);
    }
    pub fn next<T: bytemuck::AnyBitPattern>(&mut self) -> Result<T, ReadError> {
        let amount = size_of::<T>();
        let bytes = self.data.get(self.cur..self.cur + amount).ok_or(ReadError)?;
        self.cur += amount;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
    pub fn u8(&mut self) -> Result<u8, ReadError> {
        self.next()
    }
    pub fn i8(&mut self) -> Result<i8, ReadError> {
        self.next()
    }
    pub fn u16_be(&mut self) -> Result<u16, ReadError> {
        self.next().map(u16::from_be_bytes)
    }
    pub fn i16_be(&mut self) -> Result<i16, ReadError> {
        self.next().map(i16::from_be_bytes)
    }
    pub fn u32_be(&mut self) -> Result<u32, ReadError> {
        self.next().map(u32::from_be_bytes)
    }
    pub fn fill_i8(&mut self, dst: &mut [i8]) -> Result<(), ReadError> {
        let src = self.bytes(dst.len())?;
        dst.copy_from_slice(bytemuck::cast_slice(src));
        Ok(())
    }
    pub fn bytes(&mut self, amount: usize) -> Result<&'a [u8], ReadError> {
        let end = self.cur.checked_add(amount).ok_or(ReadError)?;
        let src = self.data.get(self.cur..end).ok_or(ReadError)?;
        self.cur = end;
        Ok(src)
    }
    /// Read `len` bytes of signed 8 bit PCM
    pub fn sample_data(&mut self, len: usize) -> Result<Vec<i8>, ReadError> {
        self.bytes(len).map(bytemuck::pod_collect_to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian() {
        let data = [0x12, 0x34, 0xff, 0xfe, 0x00, 0x00, 0x01, 0x00];
        let mut rd = Reader::new(&data);
        assert_eq!(rd.u16_be().unwrap(), 0x1234);
        assert_eq!(rd.i16_be().unwrap(), -2);
        assert_eq!(rd.u32_be().unwrap(), 0x100);
        assert!(rd.u8().is_err());
    }

    #[test]
    fn short_read_keeps_cursor() {
        let data = [1, 2, 3];
        let mut rd = Reader::new(&data);
        rd.seek(2);
        assert!(rd.u16_be().is_err());
        assert_eq!(rd.cur, 2);
        assert_eq!(rd.sample_data(1).unwrap(), vec![3]);
        assert_eq!(
            rd.u8().section(Section::Samples),
            Err(LoadError::Truncated(Section::Samples))
        );
    }

    #[test]
    fn sample_data_is_signed() {
        let data = [0x80, 0x7f, 0xff];
        let mut rd = Reader::new(&data);
        assert_eq!(rd.sample_data(3).unwrap(), vec![-128, 127, -1]);
    }
}
