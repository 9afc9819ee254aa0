use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use fatcat::analysis::{self, ChainAnalysis};
use fatcat::display;
use fatcat::fs::{open_image, FatPath, FatVolume, OpenOptions};
use fatcat::logging;

const USAGE: &str = "\
Usage: fatcat <verb> <image> [path] [options]

Verbs:
  info                      volume geometry and free space
  list [path]               list a directory (-c N: directory at cluster N)
  tree                      recursive listing (-c N: start at cluster N)
  read [path]               write a file to -o FILE or stdout
                            (-c N -s SIZE: read by cluster)
  extract -o DIR            extract the tree (-c N: start at cluster N)
  search -c N               find entries referencing cluster N
  chains                    report orphaned chains
  chain -c N                length and layout of the chain at N
  fix                       relink chains claimed by entries but marked free

Options:
  -O, --offset BYTES        volume offset inside the image
  -d, --deleted             include erased entries / read in recovery mode
  -c, --cluster N           cluster number
  -s, --size BYTES          size for read -c
  -o, --output PATH         output file or directory
      --json                machine-readable output
  -v                        more logging (repeatable, see FATCAT_LOG)
  -h, --help                this help";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Info,
    List,
    Tree,
    Read,
    Extract,
    Search,
    Chains,
    Chain,
    Fix,
}

impl Verb {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "info" => Verb::Info,
            "list" | "ls" => Verb::List,
            "tree" => Verb::Tree,
            "read" | "cat" => Verb::Read,
            "extract" => Verb::Extract,
            "search" => Verb::Search,
            "chains" => Verb::Chains,
            "chain" => Verb::Chain,
            "fix" => Verb::Fix,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Args {
    verb: Verb,
    image: PathBuf,
    path: Option<String>,
    offset: u64,
    deleted: bool,
    cluster: Option<u32>,
    size: Option<u64>,
    output: Option<PathBuf>,
    json: bool,
    verbosity: usize,
}

/// `None` when help was requested.
fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut positional = Vec::new();
    let mut offset = 0;
    let mut deleted = false;
    let mut cluster = None;
    let mut size = None;
    let mut output = None;
    let mut json = false;
    let mut verbosity = 0;

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .with_context(|| format!("option {name} expects a value"))
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-O" | "--offset" => offset = parse_number(&value(&arg)?)?,
            "-d" | "--deleted" => deleted = true,
            "-c" | "--cluster" => {
                let n = parse_number(&value(&arg)?)?;
                cluster = Some(u32::try_from(n).context("cluster number too large")?);
            }
            "-s" | "--size" => size = Some(parse_number(&value(&arg)?)?),
            "-o" | "--output" => output = Some(PathBuf::from(value(&arg)?)),
            "--json" => json = true,
            v if v.len() > 1 && v.starts_with('-') && v[1..].chars().all(|c| c == 'v') => {
                verbosity += v.len() - 1
            }
            other if other.starts_with('-') && other.len() > 1 => bail!("unknown option {other}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let verb = match positional.next() {
        Some(v) => Verb::parse(&v).with_context(|| format!("unknown verb '{v}'"))?,
        None => return Ok(None),
    };
    let image = positional.next().context("missing image path")?;
    let path = positional.next();
    if let Some(extra) = positional.next() {
        bail!("unexpected argument '{extra}'");
    }

    Ok(Some(Args {
        verb,
        image: PathBuf::from(image),
        path,
        offset,
        deleted,
        cluster,
        size,
        output,
        json,
        verbosity,
    }))
}

/// Decimal or 0x-prefixed hexadecimal.
fn parse_number(s: &str) -> Result<u64> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.with_context(|| format!("invalid number '{s}'"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value).context("failed to write JSON")?;
    writeln!(out)?;
    Ok(())
}

fn run(args: &Args) -> Result<()> {
    let options = OpenOptions {
        offset: args.offset,
        writable: args.verb == Verb::Fix,
        cache_table: matches!(args.verb, Verb::Chains | Verb::Fix),
        ..OpenOptions::default()
    };
    let mut volume = open_image(&args.image, options)
        .with_context(|| format!("failed to open {}", args.image.display()))?;

    match args.verb {
        Verb::Info => {
            let info = volume.info()?;
            if args.json {
                print_json(&info)?;
            } else {
                print!("{}", display::format_info(&info));
            }
        }
        Verb::List => list(&mut volume, args)?,
        Verb::Tree => {
            let start = args.cluster.unwrap_or(0);
            let entries = analysis::list_tree(&mut volume, start, args.deleted)?;
            if args.json {
                print_json(&entries)?;
            } else {
                for entry in &entries {
                    println!("{}", display::format_list_entry(entry));
                }
            }
        }
        Verb::Read => read(&mut volume, args)?,
        Verb::Extract => {
            let target = args.output.as_ref().context("extract needs -o DIR")?;
            let start = args.cluster.unwrap_or(0);
            let stats = analysis::extract_tree(&mut volume, start, target, args.deleted)?;
            eprintln!(
                "Extracted {} files, {} directories ({})",
                stats.files,
                stats.directories,
                display::format_size(stats.bytes)
            );
        }
        Verb::Search => {
            let cluster = args.cluster.context("search needs -c N")?;
            let hits = analysis::search_cluster(&mut volume, cluster)?;
            if args.json {
                print_json(&hits)?;
            } else if hits.is_empty() {
                println!("No entry references cluster {cluster}");
            } else {
                for hit in &hits {
                    println!("{}", display::format_search_hit(hit));
                }
            }
        }
        Verb::Chains => {
            let chains = ChainAnalysis::run(&mut volume)?;
            let orphans = chains.orphans(volume.bytes_per_cluster());
            if args.json {
                print_json(&orphans)?;
            } else {
                println!("Found {} orphaned chains", orphans.len());
                for chain in &orphans {
                    println!("{}", display::format_chain(chain));
                    if let Some(entries) = chains.entries_of(chain.start) {
                        for entry in analysis::list_entries(entries, args.deleted) {
                            println!("    {}", display::format_list_entry(&entry));
                        }
                    }
                }
            }
        }
        Verb::Chain => {
            let cluster = args.cluster.context("chain needs -c N")?;
            let extent = volume.chain_extent(cluster)?;
            if args.json {
                print_json(&extent)?;
            } else {
                println!(
                    "Chain length: {} ({} bytes), {}",
                    extent.length,
                    extent.length as u64 * volume.bytes_per_cluster(),
                    if extent.contiguous { "contiguous" } else { "fragmented" }
                );
            }
        }
        Verb::Fix => {
            let stats = analysis::fix_volume(&mut volume)?;
            println!(
                "{} damaged entries found, {} chains repaired",
                stats.damaged, stats.fixed
            );
        }
    }
    Ok(())
}

fn list(volume: &mut FatVolume<File>, args: &Args) -> Result<()> {
    let (cluster, listing) = match args.cluster {
        Some(cluster) => (cluster, volume.read_directory(cluster)?),
        None => {
            let path = FatPath::parse(args.path.as_deref().unwrap_or("/"));
            let dir = volume.find_directory(&path)?;
            (dir.cluster, volume.read_directory(dir.cluster)?)
        }
    };
    let entries = analysis::list_entries(&listing.entries, args.deleted);
    if args.json {
        return print_json(&entries);
    }

    println!("Directory cluster: {cluster}");
    if listing.has_free_clusters {
        println!("Warning: this directory has free clusters that were read contiguously");
    }
    for entry in &entries {
        println!("{}", display::format_list_entry(entry));
    }
    Ok(())
}

fn read(volume: &mut FatVolume<File>, args: &Args) -> Result<()> {
    let mut sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    match (args.cluster, &args.path) {
        (Some(cluster), _) => {
            let size = args.size.context("read -c needs -s SIZE")?;
            volume.read_file(cluster, size, &mut sink, args.deleted)?;
        }
        (None, Some(path)) => {
            volume.read_path(&FatPath::parse(path), &mut sink)?;
        }
        (None, None) => bail!("read needs a path or -c N -s SIZE"),
    }
    sink.flush()?;
    Ok(())
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("fatcat {}\n\n{USAGE}", env!("APP_VERSION"));
            return;
        }
        Err(e) => {
            eprintln!("Error: {e:#}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = logging::init(args.verbosity) {
        eprintln!("Warning: failed to install logger: {e}");
    }

    if let Err(e) = run(&args) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
