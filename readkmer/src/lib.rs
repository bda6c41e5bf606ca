mod codec;
mod fasta;
mod fastq;
mod kmer;
mod parallel;
mod reader;
mod reads;

pub use codec::*;
pub use fasta::*;
pub use fastq::*;
pub use kmer::*;
pub use parallel::*;
pub use reader::*;
pub use reads::*;
