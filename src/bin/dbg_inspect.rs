use clap::Parser;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;
use tern::graph::DBGraph;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[clap(version, about = "Inspect serialized de Bruijn graph files")]
struct Args {
    /// Graph file produced with --dbg_out (may hold several graphs)
    file: PathBuf,

    /// Look up a kmer and report its node
    #[clap(long)]
    kmer: Option<String>,
}

fn at_eof<R: Read>(reader: &mut BufReader<R>) -> bool {
    use std::io::BufRead;
    matches!(reader.fill_buf(), Ok(buffer) if buffer.is_empty())
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(&args.file)?;
    let mut reader = BufReader::new(file);

    let mut graph_num = 0;
    while !at_eof(&mut reader) {
        let graph = match DBGraph::load(&mut reader) {
            Ok(graph) => graph,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        graph_num += 1;
        println!(
            "graph {}: kmer_len {} entries {} stranded {} valley {} genome_size {}",
            graph_num,
            graph.kmer_len(),
            graph.graph_size(),
            graph.is_stranded(),
            graph.histogram_minimum(),
            graph.genome_size()
        );

        if let Some(kmer) = &args.kmer {
            if kmer.len() == graph.kmer_len() {
                let node = graph.get_node_from_seq(kmer.as_bytes());
                if node == 0 {
                    println!("  {}: not in graph", kmer);
                } else {
                    println!(
                        "  {}: node {} abundance {} plus_fraction {:.4}",
                        kmer,
                        node,
                        graph.abundance(node),
                        graph.plus_fraction(node)
                    );
                    for successor in graph.successors(node) {
                        println!(
                            "    -> {} node {} abundance {}",
                            successor.base as char,
                            successor.node,
                            graph.abundance(successor.node)
                        );
                    }
                }
            }
        }
    }
    if graph_num == 0 {
        return Err("No graphs found in the file".into());
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
