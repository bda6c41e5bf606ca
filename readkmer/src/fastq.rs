use crate::reader::{dyn_reader, trim_end, SeqReader, BUFSIZE};
use std::io::{BufRead, BufReader, Read, Result};
use std::path::Path;

/// FastqReader
pub struct FastqReader<R: Read + Send> {
    reader: BufReader<R>,
    header: Vec<u8>,
    seq: Vec<u8>,
    plus: Vec<u8>,
    quals: Vec<u8>,
}

impl<R> FastqReader<R>
where
    R: Read + Send,
{
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, BUFSIZE)
    }

    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        assert!(capacity >= 3);
        Self {
            reader: BufReader::with_capacity(capacity, reader),
            header: Vec::new(),
            seq: Vec::new(),
            plus: Vec::new(),
            quals: Vec::new(),
        }
    }

    pub fn read_next(&mut self) -> Result<Option<()>> {
        self.header.clear();
        if self.reader.read_until(b'\n', &mut self.header)? == 0 {
            return Ok(None);
        }
        self.seq.clear();
        if self.reader.read_until(b'\n', &mut self.seq)? == 0 {
            return Ok(None);
        }
        trim_end(&mut self.seq);
        self.plus.clear();
        if self.reader.read_until(b'\n', &mut self.plus)? == 0 {
            return Ok(None);
        }
        self.quals.clear();
        if self.reader.read_until(b'\n', &mut self.quals)? == 0 {
            return Ok(None);
        }
        Ok(Some(()))
    }
}

impl FastqReader<Box<dyn Read + Send>> {
    #[inline]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = dyn_reader(path)?;
        Ok(Self::new(reader))
    }
}

impl<R> SeqReader for FastqReader<R>
where
    R: Read + Send,
{
    fn next_seq(&mut self) -> Result<Option<Vec<u8>>> {
        if self.read_next()?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.seq.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records() {
        let data = b"@r1\nACGT\n+\nFFFF\n@r2\nTTTTT\n+\nFFFFF\n";
        let mut reader = FastqReader::new(&data[..]);
        assert_eq!(reader.next_seq().unwrap(), Some(b"ACGT".to_vec()));
        assert_eq!(reader.next_seq().unwrap(), Some(b"TTTTT".to_vec()));
        assert_eq!(reader.next_seq().unwrap(), None);
    }
}
