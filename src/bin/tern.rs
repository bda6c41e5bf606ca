use clap::Parser;
use env_logger::Env;
use log::warn;
use readkmer::MAX_KMER;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tern::assembler::{Assembler, AssemblerParams};
use tern::input::gather_reads;
use tern::report;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "TERN: an iterative de Bruijn graph assembler for short sequencing reads")]
struct Args {
    /// Input fasta file(s) (could be used multiple times for different runs)
    #[clap(long)]
    fasta: Vec<PathBuf>,

    /// Input fastq file(s) (could be used multiple times for different runs)
    #[clap(long)]
    fastq: Vec<PathBuf>,

    /// Input sra run accession(s), resolved to a local fasterq-dump output
    #[clap(long)]
    sra_run: Vec<String>,

    /// Use pairing information from consecutive reads in input
    #[clap(long)]
    use_paired_ends: bool,

    /// Expected insert size for paired reads (if not provided, it will be estimated)
    #[clap(long, default_value_t = 0)]
    insert_size: usize,

    /// Minimal kmer length for assembly (odd number >= 21)
    #[clap(long, default_value_t = 21)]
    kmer: usize,

    /// Minimal count for kmers retained for comparing alternate choices
    #[clap(long, default_value_t = 2)]
    min_count: u32,

    /// Number of assembly iterations from minimal to maximal kmer length in reads
    #[clap(long, default_value_t = 11)]
    steps: usize,

    /// Minimum acceptable average count for estimating the maximal kmer length in reads
    #[clap(long, default_value_t = 10)]
    max_kmer_count: u32,

    /// Maximum noise to signal ratio acceptable for extension [0,1)
    #[clap(long, default_value_t = 0.1)]
    fraction: f64,

    /// Ignore dead end paths shorter than this when comparing alternate extensions
    #[clap(long, default_value_t = 50)]
    min_dead_end: usize,

    /// Minimal count for kmers used in assembly
    #[clap(long, default_value_t = 6)]
    low_count: u32,

    /// Minimal contig length reported in output
    #[clap(long, default_value_t = 200)]
    min_contig: usize,

    /// Memory available (GB)
    #[clap(long, default_value_t = 32)]
    memory: i64,

    /// Number of cores to use (default all)
    #[clap(long, default_value_t = 0)]
    cores: usize,

    /// Count kmers in one pass through a Bloom filter and a concurrent hash
    #[clap(long)]
    hash_count: bool,

    /// Output file for contigs (stdout if not specified)
    #[clap(long)]
    contigs_out: Option<PathBuf>,

    /// Output fasta for each iteration
    #[clap(long)]
    all: Option<PathBuf>,

    /// File for histogram
    #[clap(long)]
    hist: Option<PathBuf>,

    /// File for connected paired reads
    #[clap(long)]
    connected_reads: Option<PathBuf>,

    /// Output kmer file
    #[clap(long)]
    dbg_out: Option<PathBuf>,

    /// JSON run summary
    #[clap(long)]
    stats: Option<PathBuf>,
}

fn dedup_sorted<T: Ord + Clone>(list: &mut Vec<T>, what: &str) {
    let before = list.len();
    list.sort();
    list.dedup();
    if list.len() != before {
        warn!("Duplicate input entries were removed from {} list", what);
    }
}

fn validate(args: &mut Args) -> Result<(), String> {
    if args.fasta.is_empty() && args.fastq.is_empty() && args.sra_run.is_empty() {
        return Err("Provide some input reads (--fasta, --fastq or --sra_run)".to_string());
    }
    dedup_sorted(&mut args.fasta, "fasta file");
    dedup_sorted(&mut args.fastq, "fastq file");
    dedup_sorted(&mut args.sra_run, "SRA run");

    if args.steps == 0 {
        return Err("Value of --steps must be > 0".to_string());
    }
    if !(0.0..1.0).contains(&args.fraction) {
        return Err("Value of --fraction must be in [0, 1)".to_string());
    }
    if args.low_count == 0 {
        return Err("Value of --low_count must be > 0".to_string());
    }
    if args.min_contig == 0 {
        return Err("Value of --min_contig must be > 0".to_string());
    }
    if args.min_count == 0 {
        return Err("Value of --min_count must be > 0".to_string());
    }
    if args.low_count < args.min_count {
        warn!(
            "--low_count changed from {} to {} as that is the minimum count retained",
            args.low_count, args.min_count
        );
        args.low_count = args.min_count;
    }
    if args.kmer < 21 || args.kmer % 2 == 0 || args.kmer > MAX_KMER {
        return Err(format!("Kmer must be an odd number >= 21 and <= {}", MAX_KMER));
    }
    if args.max_kmer_count == 0 {
        return Err("Value of --max_kmer_count must be > 0".to_string());
    }
    if args.memory <= 0 {
        return Err("Value of --memory must be > 0".to_string());
    }

    let hardware = num_cpus::get();
    if args.cores == 0 {
        args.cores = hardware;
    } else if args.cores > hardware {
        warn!(
            "Number of cores was reduced to the hardware limit of {} cores",
            hardware
        );
        args.cores = hardware;
    }
    Ok(())
}

fn open_out(path: &PathBuf) -> Result<BufWriter<File>, Box<dyn std::error::Error>> {
    let file =
        File::create(path).map_err(|e| format!("Can't open file {:?}: {}", path, e))?;
    Ok(BufWriter::new(file))
}

fn run(mut args: Args) -> Result<(), Box<dyn std::error::Error>> {
    validate(&mut args)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.cores)
        .build_global()
        .ok();

    let reads = gather_reads(
        &args.fasta,
        &args.fastq,
        &args.sra_run,
        args.use_paired_ends,
        args.cores,
    )?;

    let params = AssemblerParams {
        fraction: args.fraction,
        jump: args.min_dead_end,
        low_count: args.low_count,
        steps: args.steps,
        min_count: args.min_count,
        min_kmer: args.kmer,
        use_paired_ends: args.use_paired_ends,
        max_kmer_paired: args.insert_size,
        max_kmer_count: args.max_kmer_count,
        memory: args.memory,
        ncores: args.cores,
        hash_counting: args.hash_count,
    };
    let assembler = Assembler::run(params, reads)?;

    let first_graph = assembler
        .graphs()
        .values()
        .next()
        .ok_or("No graph was built")?;

    match &args.contigs_out {
        Some(path) => {
            let mut out = open_out(path)?;
            report::write_contigs_fasta(&mut out, assembler.contigs(), first_graph, args.min_contig)?;
            out.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            report::write_contigs_fasta(&mut out, assembler.contigs(), first_graph, args.min_contig)?;
            out.flush()?;
        }
    }

    if let Some(path) = &args.all {
        let mut out = open_out(path)?;
        report::write_all_iterations(&mut out, &assembler)?;
        out.flush()?;
    }
    if let Some(path) = &args.hist {
        let mut out = open_out(path)?;
        report::write_histograms(&mut out, &assembler)?;
        out.flush()?;
    }
    if let Some(path) = &args.connected_reads {
        let mut out = open_out(path)?;
        report::write_connected_reads(&mut out, &assembler)?;
        out.flush()?;
    }
    if let Some(path) = &args.dbg_out {
        let mut out = open_out(path)?;
        report::write_graphs(&mut out, &assembler)?;
        out.flush()?;
    }
    if let Some(path) = &args.stats {
        let mut out = open_out(path)?;
        report::RunSummary::from_assembler(&assembler).write_json(&mut out)?;
        out.flush()?;
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
