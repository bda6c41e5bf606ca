use crate::assembler::Assembler;
use crate::graph::DBGraph;
use readkmer::ReadHolder;
use serde::{Deserialize, Serialize};
use std::io::{Result, Write};

/// Per-iteration assembly stats, collected for the JSON run summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationStats {
    pub kmer_len: usize,
    pub contigs: usize,
    pub total_len: usize,
    pub n50: usize,
    pub l50: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub genome_size_estimate: u64,
    pub iterations: Vec<IterationStats>,
}

impl RunSummary {
    pub fn from_assembler(assembler: &Assembler) -> RunSummary {
        let genome_size_estimate = assembler
            .graphs()
            .values()
            .next()
            .map(|graph| graph.genome_size())
            .unwrap_or(0);
        RunSummary {
            genome_size_estimate,
            iterations: assembler.stats().to_vec(),
        }
    }

    pub fn write_json<W: Write>(&self, out: &mut W) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        out.write_all(json.as_bytes())?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Mean abundance of a contig's kmers against a graph (normally the
/// smallest-K graph).
pub fn contig_abundance(contig: &[u8], graph: &DBGraph) -> f64 {
    let kmer_len = graph.kmer_len();
    if contig.len() < kmer_len {
        return 0.0;
    }
    let mut rh = ReadHolder::new(false);
    rh.push(contig);
    let mut abundance = 0.0;
    for kmer in rh.kmers(kmer_len) {
        let node = graph.get_node(&kmer);
        abundance += graph.abundance(node) as f64;
    }
    abundance / (contig.len() + 1 - kmer_len) as f64
}

/// Writes the kept contigs as FASTA: `>Contig_<n>_<avg_abundance>`.
pub fn write_contigs_fasta<W: Write>(
    out: &mut W,
    contigs: &[Vec<u8>],
    first_graph: &DBGraph,
    min_contig: usize,
) -> Result<()> {
    let mut num = 0;
    for contig in contigs {
        if contig.len() >= min_contig {
            num += 1;
            let abundance = contig_abundance(contig, first_graph);
            writeln!(out, ">Contig_{}_{}", num, abundance)?;
            out.write_all(contig)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Writes every iteration's contigs, labeled with the kmer length used.
pub fn write_all_iterations<W: Write>(out: &mut W, assembler: &Assembler) -> Result<()> {
    for (kmer_len, contigs) in assembler.graphs().keys().zip(assembler.all_iterations()) {
        let mut num = 0;
        for contig in contigs {
            num += 1;
            writeln!(out, ">kmer{}_{}", kmer_len, num)?;
            out.write_all(contig)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// Histogram TSV: kmer length, count, bin size.
pub fn write_histograms<W: Write>(out: &mut W, assembler: &Assembler) -> Result<()> {
    for (kmer_len, graph) in assembler.graphs() {
        for &(count, bin_size) in graph.bins() {
            writeln!(out, "{}\t{}\t{}", kmer_len, count, bin_size)?;
        }
    }
    Ok(())
}

/// Connected-reads FASTA.
pub fn write_connected_reads<W: Write>(out: &mut W, assembler: &Assembler) -> Result<()> {
    let connected = assembler.connected_reads();
    for (num, read) in connected.reads().enumerate() {
        writeln!(out, ">ConnectedRead_{}", num + 1)?;
        out.write_all(&read.seq())?;
        writeln!(out)?;
    }
    Ok(())
}

/// Serialized graphs, min-K first.
pub fn write_graphs<W: Write>(out: &mut W, assembler: &Assembler) -> Result<()> {
    for graph in assembler.graphs().values() {
        graph.save(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::KmerCounter;
    use crate::graph::Bins;

    fn tiny_graph() -> DBGraph {
        let mut unpaired = ReadHolder::new(false);
        unpaired.push(b"ACGGTCAT");
        unpaired.push(b"ACGGTCAT");
        let packs = vec![[ReadHolder::new(true), unpaired]];
        let mut counter = KmerCounter::new(&packs, 5, 1, true, 16_000_000_000, 1).unwrap();
        counter.get_branches(1);
        let bins: Bins = counter.histogram();
        DBGraph::new(counter.into_kmers(), bins, true)
    }

    #[test]
    fn test_contig_abundance() {
        let graph = tiny_graph();
        assert!((contig_abundance(b"ACGGTCAT", &graph) - 2.0).abs() < 1e-9);
        assert_eq!(contig_abundance(b"ACG", &graph), 0.0);
    }

    #[test]
    fn test_fasta_format() {
        let graph = tiny_graph();
        let contigs = vec![b"ACGGTCAT".to_vec(), b"ACGGT".to_vec()];
        let mut out = Vec::new();
        write_contigs_fasta(&mut out, &contigs, &graph, 6).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, ">Contig_1_2\nACGGTCAT\n");
    }
}
