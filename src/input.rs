use crate::ReadPack;
use log::{info, warn};
use readkmer::{base_code, detect_seq_format, FastaReader, FastqReader, ReadHolder, SeqFormat, SeqReader};
use std::io::{Error, ErrorKind, Result};
use std::path::{Path, PathBuf};

/// Longest run of ACGT bases, uppercased. Empty when nothing is left.
pub fn clip_to_valid(read: &[u8]) -> Vec<u8> {
    let mut best = (0usize, 0usize);
    let mut start = 0usize;
    let mut len = 0usize;
    for (i, &c) in read.iter().enumerate() {
        if base_code(c).is_some() {
            if len == 0 {
                start = i;
            }
            len += 1;
            if len > best.1 {
                best = (start, len);
            }
        } else {
            len = 0;
        }
    }
    read[best.0..best.0 + best.1]
        .iter()
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn reader_for(path: &Path) -> Result<Box<dyn SeqReader>> {
    match detect_seq_format(path)? {
        SeqFormat::Fasta => Ok(Box::new(FastaReader::from_path(path)?)),
        SeqFormat::Fastq => Ok(Box::new(FastqReader::from_path(path)?)),
    }
}

/// Resolves an SRA accession to a local `fasterq-dump`-style file.
pub fn resolve_sra_run(accession: &str) -> Result<PathBuf> {
    for suffix in ["fastq", "fastq.gz", "fasta", "fasta.gz"] {
        let candidate = PathBuf::from(format!("{}.{}", accession, suffix));
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(Error::new(
        ErrorKind::NotFound,
        format!(
            "Unknown SRA run {}: no local {}.fastq[.gz]/{}.fasta[.gz] found (run fasterq-dump first)",
            accession, accession, accession
        ),
    ))
}

/// Reads every input file into `ncores` read packs ([paired, unpaired] per
/// pack) so downstream jobs parallelize over the packs. With paired ends,
/// consecutive reads of a file are mates; reads are clipped to their
/// longest valid run and empty ones are dropped together with their mate.
pub fn gather_reads(
    fasta: &[PathBuf],
    fastq: &[PathBuf],
    sra_runs: &[String],
    use_paired_ends: bool,
    ncores: usize,
) -> Result<Vec<ReadPack>> {
    let mut files: Vec<PathBuf> = Vec::new();
    files.extend(fasta.iter().cloned());
    files.extend(fastq.iter().cloned());
    for accession in sra_runs {
        files.push(resolve_sra_run(accession)?);
    }

    let chunks = ncores.max(1);
    let mut packs: Vec<ReadPack> = (0..chunks)
        .map(|_| [ReadHolder::new(true), ReadHolder::new(false)])
        .collect();
    let mut chunk = 0usize;
    let mut clipped = 0usize;

    for file in &files {
        let mut reader = reader_for(file)?;
        if use_paired_ends {
            loop {
                let first = match reader.next_seq()? {
                    Some(seq) => seq,
                    None => break,
                };
                let second = match reader.next_seq()? {
                    Some(seq) => seq,
                    None => {
                        // odd trailing read
                        let read = clip_to_valid(&first);
                        if !read.is_empty() {
                            packs[chunk][1].push(&read);
                        }
                        break;
                    }
                };
                let read1 = clip_to_valid(&first);
                let read2 = clip_to_valid(&second);
                if read1.len() != first.len() || read2.len() != second.len() {
                    clipped += 1;
                }
                if !read1.is_empty() && !read2.is_empty() {
                    packs[chunk][0].push_pair(&read1, &read2);
                } else if !read1.is_empty() {
                    packs[chunk][1].push(&read1);
                } else if !read2.is_empty() {
                    packs[chunk][1].push(&read2);
                }
                chunk = (chunk + 1) % chunks;
            }
        } else {
            while let Some(seq) = reader.next_seq()? {
                let read = clip_to_valid(&seq);
                if read.len() != seq.len() {
                    clipped += 1;
                }
                if !read.is_empty() {
                    packs[chunk][1].push(&read);
                    chunk = (chunk + 1) % chunks;
                }
            }
        }
    }

    if clipped > 0 {
        warn!("{} read(s) were clipped to their longest run of ACGT bases", clipped);
    }
    let total_reads: usize = packs
        .iter()
        .map(|pack| pack[0].read_num() + pack[1].read_num())
        .sum();
    let total_seq: usize = packs
        .iter()
        .map(|pack| pack[0].total_seq() + pack[1].total_seq())
        .sum();
    info!("Reads: {} Total sequence: {}", total_reads, total_seq);
    if total_reads == 0 {
        return Err(Error::new(ErrorKind::InvalidData, "No reads available in the input"));
    }

    Ok(packs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_clip_to_valid() {
        assert_eq!(clip_to_valid(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(clip_to_valid(b"acgt"), b"ACGT".to_vec());
        assert_eq!(clip_to_valid(b"NNACGTNAAN"), b"ACGT".to_vec());
        assert_eq!(clip_to_valid(b"NACGTTTNAC"), b"ACGTTT".to_vec());
        assert_eq!(clip_to_valid(b"NNN"), Vec::<u8>::new());
    }

    #[test]
    fn test_gather_fastq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reads.fastq");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "@r1\nACGTACGT\n+\nFFFFFFFF\n@r2\nTTNTT\n+\nFFFFF\n").unwrap();
        drop(file);

        let packs = gather_reads(&[], &[path], &[], false, 2).unwrap();
        let total: usize = packs.iter().map(|p| p[1].read_num()).sum();
        assert_eq!(total, 2);
        let mut seqs: Vec<Vec<u8>> = packs
            .iter()
            .flat_map(|p| p[1].reads().map(|r| r.seq()).collect::<Vec<_>>())
            .collect();
        seqs.sort();
        assert_eq!(seqs, vec![b"ACGTACGT".to_vec(), b"TT".to_vec()]);
    }

    #[test]
    fn test_gather_paired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pairs.fasta");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, ">p1/1\nAAAA\n>p1/2\nCCCC\n>p2/1\nGGGG\n>p2/2\nTTTT\n").unwrap();
        drop(file);

        let packs = gather_reads(&[path], &[], &[], true, 1).unwrap();
        assert_eq!(packs[0][0].read_num(), 4);
        assert_eq!(packs[0][1].read_num(), 0);
        let reads: Vec<Vec<u8>> = packs[0][0].reads().map(|r| r.seq()).collect();
        assert_eq!(reads[0], b"AAAA");
        assert_eq!(reads[1], b"CCCC");
    }

    #[test]
    fn test_missing_sra_run_is_config_error() {
        let err = gather_reads(&[], &[], &["SRR0000000".to_string()], false, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
