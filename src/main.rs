use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rpunpack::export::EulerUnit;
use rpunpack::extract::{ExtractOptions, extract_path, list_path};
use rpunpack::resource::TypeFilter;
use rpunpack::texture::DdsLayout;

/// Unpack RP6L and legacy resource-pack archives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Archive files, directories containing archives, or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory the per-archive output folders are created in. Defaults to
    /// the directory of each archive.
    #[clap(short, long)]
    out_dir: Option<PathBuf>,

    /// Extract every RP6L filetype instead of only meshes, textures and animations
    #[clap(long, conflicts_with = "types")]
    all_types: bool,

    /// Comma-separated hex RP6L filetypes to extract, e.g. `10,20,40`
    #[clap(long, value_delimiter = ',', value_parser = parse_filetype)]
    types: Vec<u8>,

    /// Write DX10-extended DDS headers for uncompressed textures
    #[clap(long)]
    dx10: bool,

    /// Write skeleton rotations in degrees instead of radians
    #[clap(long)]
    euler_degrees: bool,

    /// Also decode meshes whose name marks them as terrain
    #[clap(long)]
    keep_terrain: bool,

    /// Print the parsed catalog of each archive as JSON instead of extracting
    #[clap(long)]
    list: bool,

    /// Number of archives processed in parallel
    #[clap(short, long)]
    jobs: Option<usize>,

    /// Log per-record details
    #[clap(short, long)]
    verbose: bool,
}

fn parse_filetype(s: &str) -> Result<u8, String> {
    let digits = s.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid filetype `{s}`: {e}"))
}

impl Args {
    fn options(&self) -> ExtractOptions {
        let types = if self.all_types {
            TypeFilter::All
        } else if self.types.is_empty() {
            TypeFilter::default()
        } else {
            TypeFilter::Only(self.types.clone())
        };

        ExtractOptions::builder()
            .types(types)
            .dds_layout(if self.dx10 {
                DdsLayout::Dx10
            } else {
                DdsLayout::Legacy
            })
            .euler(if self.euler_degrees {
                EulerUnit::Degrees
            } else {
                EulerUnit::Radians
            })
            .maybe_out_dir(self.out_dir.clone())
            .skip_terrain(!self.keep_terrain)
            .build()
    }
}

/// Expand directories to the regular files they contain and anything that is
/// not an existing path as a glob pattern.
fn expand_inputs(inputs: &[String]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_dir() {
            match fs::read_dir(&path) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        if entry.file_type().is_ok_and(|t| t.is_file()) {
                            paths.push(entry.path());
                        }
                    }
                }
                Err(e) => warn!(path = %path.display(), "cannot read directory: {e}"),
            }
        } else if path.exists() {
            paths.push(path);
        } else {
            let before = paths.len();
            match glob::glob(input) {
                Ok(matches) => paths.extend(matches.flatten().filter(|p| p.is_file())),
                Err(e) => warn!(pattern = %input, "invalid glob pattern: {e}"),
            }
            if paths.len() == before {
                warn!(input = %input, "no input files found");
            }
        }
    }
    paths.sort();
    paths.dedup();
    paths
}

fn list(paths: &[PathBuf]) -> ExitCode {
    let mut failed = false;
    for path in paths {
        let listing = match list_path(path) {
            Ok(listing) => listing,
            Err(report) => {
                error!("{report}");
                failed = true;
                continue;
            }
        };
        match serde_json::to_string_pretty(&listing) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!(path = %path.display(), "failed to serialize listing: {e}");
                failed = true;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(jobs) = args.jobs {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
        {
            warn!("cannot configure {jobs} worker threads: {e}");
        }
    }

    let paths = expand_inputs(&args.inputs);
    if paths.is_empty() {
        error!("nothing to do");
        return ExitCode::FAILURE;
    }

    if args.list {
        return list(&paths);
    }

    let options = args.options();
    let progress = ProgressBar::new(paths.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
        progress.set_style(style);
    }

    let results: Vec<_> = paths
        .par_iter()
        .map(|path| {
            let result = extract_path(path, &options);
            if let Some(name) = path.file_name() {
                progress.set_message(name.to_string_lossy().into_owned());
            }
            progress.inc(1);
            (path, result)
        })
        .collect();
    progress.finish_and_clear();

    let mut extracted = 0;
    let mut diagnostics = 0;
    let mut failed = 0;
    for (path, result) in results {
        match result {
            Ok(summary) => {
                extracted += summary.extracted;
                diagnostics += summary.diagnostics.len();
            }
            Err(report) => {
                failed += 1;
                error!(path = %path.display(), "{report}");
            }
        }
    }

    info!(
        archives = paths.len(),
        failed, extracted, diagnostics, "extraction complete"
    );
    println!(
        "Extracted {extracted} files from {} archive(s); {failed} failed, {diagnostics} diagnostics",
        paths.len() - failed
    );

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
