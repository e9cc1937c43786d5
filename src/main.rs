use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use realign::config::SearchConfig;
use realign::format::OutputFormat;
use realign::parser::GoblinParser;
use realign::registry::Registry;
use realign::search::GadgetFinder;
use realign::{Architecture, SegmentSource};

/// Find ROP gadgets by realigning disassembly backward from a target sequence
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// ELF or PE binary to search
    file: PathBuf,

    /// Target byte sequence in hex, e.g. `c3` or `ff e0`
    #[arg(short, long, default_value = "c3")]
    bytes: String,

    /// Override the architecture detected from the file header
    #[arg(short, long, value_enum)]
    arch: Option<Architecture>,

    /// Use only this decoder backend
    #[arg(long)]
    backend: Option<String>,

    /// Change a backend's rank before resolving (repeatable)
    #[arg(long = "backend-rank", value_name = "NAME=RANK", value_parser = parse_rank)]
    backend_rank: Vec<(String, i32)>,

    /// Maximum bytes to search backward from each occurrence
    #[arg(short = 'n', long)]
    max_back: Option<usize>,

    /// Search occurrences in parallel
    #[arg(short, long)]
    parallel: bool,

    /// Keep gadgets containing undecodable or privileged instructions
    #[arg(long)]
    allow_invalid: bool,

    /// Keep gadgets containing calls to fixed addresses
    #[arg(long)]
    allow_direct_calls: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// JSON search configuration; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Parse `NAME=RANK`.
fn parse_rank(s: &str) -> Result<(String, i32), String> {
    let (name, rank) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=RANK, got {:?}", s))?;
    let rank = rank
        .trim()
        .parse()
        .map_err(|e| format!("bad rank {:?}: {}", rank, e))?;
    Ok((name.trim().to_string(), rank))
}

/// Parse hex bytes, allowing whitespace and `0x` / `\x` prefixes per byte.
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits: String = s
        .split_whitespace()
        .map(|tok| {
            tok.split("\\x")
                .map(|part| part.trim_start_matches("0x").trim_start_matches("0X"))
                .collect::<String>()
        })
        .collect();

    if digits.is_empty() {
        bail!("empty byte sequence");
    }
    if !digits.is_ascii() {
        bail!("invalid hex byte in {:?}", s);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits in {:?}", s);
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).with_context(|| format!("invalid hex byte in {:?}", s))
        })
        .collect()
}

fn build_config(cli: &Cli) -> Result<SearchConfig> {
    let mut config = match &cli.config {
        Some(path) => SearchConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SearchConfig::default(),
    };

    if let Some(max_back) = cli.max_back {
        config.max_back = max_back;
    }
    config.parallel |= cli.parallel;
    if cli.allow_invalid {
        config.policy.reject_invalid = false;
    }
    if cli.allow_direct_calls {
        config.policy.reject_direct_calls = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let target = parse_hex(&cli.bytes)?;
    let config = build_config(&cli)?;

    let image = fs::read(&cli.file).with_context(|| format!("reading {}", cli.file.display()))?;
    let parsed = GoblinParser::new()
        .segments(&image)
        .with_context(|| format!("parsing {}", cli.file.display()))?;
    let arch = cli.arch.unwrap_or(parsed.architecture);
    log::info!(
        "{}: {} executable segments, architecture {}",
        cli.file.display(),
        parsed.segments.len(),
        arch
    );

    let mut registry = Registry::with_default_backends();
    for (name, rank) in &cli.backend_rank {
        registry.set_rank(name, *rank)?;
    }
    log::debug!("backend order: {:?}", registry.backend_names());

    let finder = match &cli.backend {
        Some(name) => GadgetFinder::with_disassembler(registry.resolve_with(name, arch)?, config)?,
        None => GadgetFinder::new(&registry, arch, config)?,
    };

    let gadgets = finder.collect(&parsed.segments, &target);
    print!("{}", cli.format.formatter().format(&gadgets)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("c3", vec![0xc3])]
    #[case("ff e0", vec![0xff, 0xe0])]
    #[case("0xc2 0x08 0x00", vec![0xc2, 0x08, 0x00])]
    #[case("\\x0f\\x05", vec![0x0f, 0x05])]
    #[case("C3", vec![0xc3])]
    fn test_parse_hex(#[case] input: &str, #[case] expected: Vec<u8>) {
        assert_eq!(parse_hex(input).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("c")]
    #[case("zz")]
    fn test_parse_hex_rejects(#[case] input: &str) {
        assert!(parse_hex(input).is_err());
    }

    #[test]
    fn test_parse_rank() {
        assert_eq!(parse_rank("iced=20"), Ok(("iced".to_string(), 20)));
        assert_eq!(parse_rank("capstone = -1"), Ok(("capstone".to_string(), -1)));
        assert!(parse_rank("capstone").is_err());
        assert!(parse_rank("capstone=high").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from(["realign", "a.out", "-n", "8", "--parallel", "--allow-direct-calls"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.max_back, 8);
        assert!(config.parallel);
        assert!(config.policy.reject_invalid);
        assert!(!config.policy.reject_direct_calls);
        assert_eq!(cli.format, OutputFormat::Text);
        assert_eq!(cli.bytes, "c3");
    }

    #[test]
    fn test_cli_values() {
        let cli = Cli::parse_from([
            "realign",
            "a.out",
            "--arch",
            "x86",
            "--format",
            "jsonl",
            "--backend-rank",
            "iced=20",
            "--backend-rank",
            "capstone=1",
        ]);
        assert_eq!(cli.arch, Some(Architecture::X86_32));
        assert_eq!(cli.format, OutputFormat::JsonLines);
        assert_eq!(cli.backend_rank.len(), 2);
    }
}
