//! dicom-scene CLI
//!
//! Usage:
//!   dicom-scene scene FILES...          Collate slices and print the scene geometry
//!   dicom-scene scene -l LIST           Same, reading file names from LIST
//!   dicom-scene contours FILE           Print the ROIs and contours of a structure set
//!   dicom-scene element FILE TAG        Decode one element and report the lookup pass
//!   dicom-scene dump FILE               List the top-level elements

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dicom::core::Tag;
use dicom_scene::{
    ArchType, CollateOptions, ContourSetExtractor, ElementValue, LookupPolicy, ParserSession,
    SeriesCollator, SliceOrder, ValueType, VolumeAssembler,
};
use serde::Serialize;
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dicom-scene")]
#[command(about = "Scene geometry and structure-set contours from ACR-NEMA/DICOM slices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone)]
struct ParseArgs {
    /// Receiver architecture (1-8) of files without a Part 10 header
    #[arg(long, default_value = "3")]
    arch: u8,

    /// Scan every element instead of stopping past the target group
    #[arg(long = "no-fast-pass")]
    no_fast_pass: bool,

    /// Fail instead of retrying with an exhaustive scan
    #[arg(long = "no-fallback")]
    no_fallback: bool,
}

impl ParseArgs {
    fn arch(&self) -> Result<ArchType> {
        ArchType::from_legacy_code(self.arch)
            .ok_or_else(|| anyhow!("architecture must be 1-8, got {}", self.arch))
    }

    fn policy(&self) -> LookupPolicy {
        LookupPolicy {
            group_ordered_first: !self.no_fast_pass,
            exhaustive_fallback: !self.no_fallback,
        }
    }

    fn open(&self, file: &Path) -> Result<ParserSession<std::io::BufReader<fs::File>>> {
        ParserSession::open_with(file, self.arch()?, self.policy())
            .with_context(|| format!("cannot open {}", file.display()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Collate slice files and print the scene geometry as JSON
    Scene {
        /// Slice files
        files: Vec<PathBuf>,

        /// File holding one slice file name per line
        #[arg(short = 'l', long = "list")]
        list: Option<PathBuf>,

        /// Order slices by Acquisition Time
        #[arg(long)]
        time: bool,

        /// Sort by Acquisition Number before location
        #[arg(long)]
        acquisition: bool,

        /// Slice spacing used for slices without a location
        #[arg(long)]
        spacing: Option<f32>,

        /// Include the collated series in the output
        #[arg(short, long)]
        verbose: bool,

        #[command(flatten)]
        parse: ParseArgs,
    },
    /// Print the ROIs and contours of an RT Structure Set as JSON
    Contours {
        file: PathBuf,

        /// Include contour points
        #[arg(short, long)]
        points: bool,

        #[command(flatten)]
        parse: ParseArgs,
    },
    /// Decode one element, e.g. `0020,0032`
    Element {
        file: PathBuf,
        tag: String,

        #[arg(short = 't', long = "type", value_enum, default_value = "at")]
        value_type: CliValueType,

        #[arg(long, default_value = "1024")]
        max_len: u32,

        #[command(flatten)]
        parse: ParseArgs,
    },
    /// List the top-level elements
    Dump {
        file: PathBuf,

        #[arg(long, default_value = "64")]
        max_len: u32,

        #[command(flatten)]
        parse: ParseArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CliValueType {
    Bi,
    Bd,
    An,
    At,
}

impl From<CliValueType> for ValueType {
    fn from(value: CliValueType) -> Self {
        match value {
            CliValueType::Bi => ValueType::BI,
            CliValueType::Bd => ValueType::BD,
            CliValueType::An => ValueType::AN,
            CliValueType::At => ValueType::AT,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scene {
            files,
            list,
            time,
            acquisition,
            spacing,
            verbose,
            parse,
        } => {
            let options = CollateOptions {
                order: if time {
                    SliceOrder::Time
                } else {
                    SliceOrder::Location
                },
                use_acquisition: acquisition,
                nominal_spacing: spacing,
                lookup: parse.policy(),
                legacy_arch: parse.arch()?,
            };
            cmd_scene(files, list, &options, verbose)
        }
        Commands::Contours {
            file,
            points,
            parse,
        } => cmd_contours(&file, points, &parse),
        Commands::Element {
            file,
            tag,
            value_type,
            max_len,
            parse,
        } => cmd_element(&file, &tag, value_type.into(), max_len, &parse),
        Commands::Dump {
            file,
            max_len,
            parse,
        } => cmd_dump(&file, max_len, &parse),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

fn cmd_scene(
    mut files: Vec<PathBuf>,
    list: Option<PathBuf>,
    options: &CollateOptions,
    verbose: bool,
) -> Result<()> {
    if let Some(list) = list {
        files.extend(read_list(&list)?);
    }
    if files.is_empty() {
        bail!("no input files");
    }

    let groups = SeriesCollator::collate(&files, options)?;
    let scene = VolumeAssembler::assemble(&groups, options.order)?;
    if verbose {
        print_json(&json!({ "scene": scene, "series": groups }))
    } else {
        print_json(&scene)
    }
}

fn cmd_contours(file: &Path, points: bool, parse: &ParseArgs) -> Result<()> {
    let mut session = parse.open(file)?;
    let set = ContourSetExtractor::new()
        .extract(&mut session)
        .with_context(|| format!("cannot read structure set {}", file.display()))?;

    if points {
        return print_json(&set);
    }
    let summary: Vec<_> = set
        .rois
        .iter()
        .map(|roi| {
            json!({
                "number": roi.number,
                "name": roi.name,
                "contours": roi.num_contours(),
                "points": roi.contour_num_points(),
            })
        })
        .collect();
    print_json(&summary)
}

fn cmd_element(
    file: &Path,
    tag: &str,
    value_type: ValueType,
    max_len: u32,
    parse: &ParseArgs,
) -> Result<()> {
    let tag = parse_tag(tag)?;
    let mut session = parse.open(file)?;
    let (decoded, truncated) = match session.get_element(tag, value_type, max_len) {
        Ok(decoded) => (decoded, false),
        Err(err @ dicom_scene::ReadError::ValueTooLarge { .. }) => (err.into_truncated()?, true),
        Err(err) => return Err(err).with_context(|| format!("cannot read {tag}")),
    };

    let value = match &decoded.value {
        ElementValue::Words(words) => json!(words),
        ElementValue::DoubleWords(words) => json!(words),
        ElementValue::Text(text) => json!(text),
    };
    print_json(&json!({
        "tag": tag.to_string(),
        "value": value,
        "bytes_decoded": decoded.bytes_decoded,
        "items": decoded.items,
        "truncated": truncated,
        "pass": format!("{:?}", decoded.pass),
        "fallbacks": session.fallback_count(),
        "transfer_syntax": format!("{:?}", session.layout().transfer_syntax),
    }))
}

fn cmd_dump(file: &Path, max_len: u32, parse: &ParseArgs) -> Result<()> {
    let mut session = parse.open(file)?;
    let elements = session.top_level_elements(max_len)?;
    let rows: Vec<_> = elements
        .iter()
        .map(|element| {
            let printable = element
                .value
                .iter()
                .all(|b| b.is_ascii_graphic() || *b == b' ' || *b == 0);
            json!({
                "tag": element.tag.to_string(),
                "vr": element.vr.map(|vr| vr.to_string()),
                "length": element.length,
                "value": if printable {
                    json!(String::from_utf8_lossy(&element.value).trim_end_matches(['\0', ' ']))
                } else {
                    json!(element.value)
                },
            })
        })
        .collect();
    print_json(&rows)
}

/// Parses `gggg,eeee`, with or without parentheses.
fn parse_tag(text: &str) -> Result<Tag> {
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
    let (group, element) = inner
        .split_once(',')
        .ok_or_else(|| anyhow!("tag must look like gggg,eeee: {text}"))?;
    let parse = |part: &str| {
        u16::from_str_radix(part.trim(), 16).with_context(|| format!("bad tag component {part}"))
    };
    Ok(Tag(parse(group)?, parse(element)?))
}
