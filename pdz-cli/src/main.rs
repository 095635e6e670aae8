use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::parser::ValueSource;
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use tracing_subscriber::{fmt, EnvFilter};

use pdz::{CompressOptions, CompressionStrategy, DecompressOptions};

fn cli() -> Command {
    Command::new("pdz")
        .about("Converts PDB debug containers to and from the compressed MSFZ format")
        .arg(
            Arg::new("compress")
                .short('c')
                .long("compress")
                .action(ArgAction::SetTrue)
                .help("Compress a PDB input file into an MSFZ output file"),
        )
        .arg(
            Arg::new("decompress")
                .short('x')
                .long("decompress")
                .action(ArgAction::SetTrue)
                .help("Decompress an MSFZ input file into a PDB output file"),
        )
        .group(
            ArgGroup::new("mode")
                .args(["compress", "decompress"])
                .required(true),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the input file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the output file"),
        )
        .arg(
            Arg::new("strategy")
                .short('s')
                .long("strategy")
                .value_parser(["NoCompression", "SingleFragment", "MultiFragment"])
                .help("Compression strategy to use with --compress"),
        )
        .arg(
            Arg::new("level")
                .short('l')
                .long("level")
                .value_parser(value_parser!(i32).range(1..=22))
                .default_value("3")
                .help("ZSTD compression level to use with --compress"),
        )
        .arg(
            Arg::new("fragment_size")
                .short('f')
                .long("fragment-size")
                .value_parser(value_parser!(u32).range(1..))
                .default_value("4096")
                .help("Fragment size for --strategy=MultiFragment"),
        )
        .arg(
            Arg::new("max_fragments")
                .short('m')
                .long("max-frps")
                .value_parser(value_parser!(u32).range(2..))
                .default_value("4096")
                .help("Maximum number of fragments per stream for --strategy=MultiFragment"),
        )
        .arg(
            Arg::new("block_size")
                .short('b')
                .long("block-size")
                .value_parser(["512", "1024", "2048", "4096", "8192"])
                .default_value("4096")
                .help("Block size of the PDB produced by --decompress"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u32).range(1..))
                .help("Number of worker threads (default: 3/4 of the processor count)"),
        )
}

fn given(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

fn execute(matches: &ArgMatches) -> Result<()> {
    let input = matches.get_one::<PathBuf>("input").unwrap();
    let output = matches.get_one::<PathBuf>("output").unwrap();
    let num_threads = matches.get_one::<u32>("threads").copied();

    if matches.get_flag("compress") {
        let Some(strategy) = matches.get_one::<String>("strategy") else {
            bail!("--compress requires --strategy");
        };
        let strategy: CompressionStrategy = strategy.parse()?;
        if strategy != CompressionStrategy::MultiFragment {
            if given(matches, "fragment_size") {
                bail!("--fragment-size is only meaningful with --strategy=MultiFragment");
            }
            if given(matches, "max_fragments") {
                bail!("--max-frps is only meaningful with --strategy=MultiFragment");
            }
        }
        if given(matches, "block_size") {
            bail!("--block-size only applies to --decompress");
        }

        let mut options = CompressOptions::new(strategy);
        options.level = *matches.get_one::<i32>("level").unwrap();
        options.fragment_size = *matches.get_one::<u32>("fragment_size").unwrap();
        options.max_fragments_per_stream = *matches.get_one::<u32>("max_fragments").unwrap();
        options.num_threads = num_threads;

        pdz::compress(input, output, &options)?;
    } else {
        if given(matches, "strategy") {
            bail!("--strategy only applies to --compress");
        }
        if given(matches, "level") {
            bail!("--level only applies to --compress");
        }

        let options = DecompressOptions {
            block_size: matches.get_one::<String>("block_size").unwrap().parse()?,
            num_threads,
        };

        pdz::decompress(input, output, &options)?;
    }

    Ok(())
}

fn main() -> Result<()> {
    // Tracing subscriber controlled by `RUST_LOG`
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .event_format(
            tracing_subscriber::fmt::format()
                .compact()
                .with_target(false)
                .without_time(),
        )
        .init();

    execute(&cli().get_matches())
}
