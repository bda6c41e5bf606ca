use crate::reader::{dyn_reader, trim_end, SeqReader, BUFSIZE};
use std::io::{BufRead, BufReader, Read, Result};
use std::path::Path;

/// FastaReader
pub struct FastaReader<R>
where
    R: Read + Send,
{
    reader: BufReader<R>,
    header: Vec<u8>,
    seq: Vec<u8>,
}

impl<R> FastaReader<R>
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
        }
    }

    pub fn read_next(&mut self) -> Result<Option<()>> {
        self.header.clear();
        if self.reader.read_until(b'\n', &mut self.header)? == 0 {
            return Ok(None);
        }
        // sequence runs to the next record marker; line breaks are dropped
        self.seq.clear();
        if self.reader.read_until(b'>', &mut self.seq)? == 0 {
            return Ok(None);
        }
        if self.seq.last() == Some(&b'>') {
            self.seq.pop();
        }
        self.seq.retain(|&c| c != b'\n' && c != b'\r');
        trim_end(&mut self.header);
        Ok(Some(()))
    }
}

impl FastaReader<Box<dyn Read + Send>> {
    #[inline]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = dyn_reader(path)?;
        Ok(Self::new(reader))
    }
}

impl<R: Read + Send> SeqReader for FastaReader<R> {
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
    fn test_multi_record() {
        let data = b">r1 desc\nACGT\nACGT\n>r2\nTTTT\n";
        let mut reader = FastaReader::new(&data[..]);
        assert_eq!(reader.next_seq().unwrap(), Some(b"ACGTACGT".to_vec()));
        assert_eq!(reader.next_seq().unwrap(), Some(b"TTTT".to_vec()));
        assert_eq!(reader.next_seq().unwrap(), None);
    }
}
