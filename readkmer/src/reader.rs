use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, Read, Result, Seek};
use std::path::Path;

pub const BUFSIZE: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqFormat {
    Fasta,
    Fastq,
}

pub fn open_file<P: AsRef<Path>>(path: P) -> Result<File> {
    File::open(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            io::Error::new(e.kind(), format!("File not found: {:?}", path.as_ref()))
        } else {
            e
        }
    })
}

pub fn is_gzipped(file: &mut File) -> Result<bool> {
    let mut buffer = [0; 2];
    let gz = match file.read_exact(&mut buffer) {
        Ok(()) => buffer == [0x1F, 0x8B],
        Err(_) => false, // shorter than two bytes
    };
    file.rewind()?;
    Ok(gz)
}

/// Opens a file for reading, transparently decompressing gzip.
pub fn dyn_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn Read + Send>> {
    let mut file = open_file(path)?;
    if is_gzipped(&mut file)? {
        let decoder = GzDecoder::new(file);
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(file))
    }
}

/// Detects FASTA/FASTQ from the first byte of the (decompressed) stream.
pub fn detect_seq_format<P: AsRef<Path>>(path: P) -> Result<SeqFormat> {
    let mut reader = dyn_reader(&path)?;
    let mut first = [0u8; 1];
    reader.read_exact(&mut first)?;
    match first[0] {
        b'>' => Ok(SeqFormat::Fasta),
        b'@' => Ok(SeqFormat::Fastq),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Unrecognized sequence format: {:?}", path.as_ref()),
        )),
    }
}

pub fn trim_end(buffer: &mut Vec<u8>) {
    while let Some(&b'\n' | &b'\r') = buffer.last() {
        buffer.pop();
    }
}

/// A reader producing raw read sequences one at a time.
pub trait SeqReader: Send {
    fn next_seq(&mut self) -> Result<Option<Vec<u8>>>;
}
