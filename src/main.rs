//! mobisplit - Rewrite kindlegen output into device-ready books

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::{Builder, Env};
use log::info;

use mobisplit::{
    CompilerStatus, Identifier, Outcome, PageMapMode, SplitMode, SplitOptions, Splitter,
};

#[derive(Parser)]
#[command(name = "mobisplit")]
#[command(version, about = "Rewrite kindlegen output into device-ready books", long_about = None)]
#[command(after_help = "EXAMPLES:
    mobisplit out.mobi book.azw3               Extract the KF8 part
    mobisplit out.mobi book.mobi --non-personal  Clean up the combo book
    mobisplit out.mobi book.azw3 --page-map eink Also write book.sdr/book.apnx")]
struct Cli {
    /// Combo container produced by kindlegen
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Where to write the result
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// combo or kf8 (default: from the output extension)
    #[arg(short, long)]
    mode: Option<SplitMode>,

    /// Book UUID (default: derived from the input)
    #[arg(long)]
    uuid: Option<Identifier>,

    /// ASIN to stamp instead of the UUID-derived code
    #[arg(long)]
    asin: Option<String>,

    /// Mark the book as a store book so devices drop the "personal" label
    #[arg(long)]
    non_personal: bool,

    /// Stamp an ASIN on KF8 output even when the source had none
    #[arg(long)]
    force_asin: bool,

    /// Write an APNX page map: none, eink or app
    #[arg(long, value_name = "MODE")]
    page_map: Option<PageMapMode>,

    /// JSON options file; flags given on the command line take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Exit code of the kindlegen run that produced INPUT
    #[arg(long, value_name = "CODE", allow_negative_numbers = true)]
    kindlegen_exit: Option<i32>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logger(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(code) = cli.kindlegen_exit {
        let status = CompilerStatus::from_code(code);
        if !status.can_proceed() {
            return Err(format!("kindlegen {status}").into());
        }
    }

    let options = options(cli)?;
    let data = std::fs::read(&cli.input)?;
    let id = cli.uuid.unwrap_or_else(|| Identifier::from_content(&data));
    info!("Splitting {} as {:?} with UUID {id}", cli.input.display(), options.mode);

    // No renderer here; undersized thumbnails are left as embedded.
    let out = Splitter::new().split(&data, &id, &options)?;
    out.save_result(&cli.output)?;
    if let Outcome::NotApplicable(reason) = out.outcome {
        eprintln!("{}: copied unchanged ({reason})", cli.input.display());
    }

    if let Some(path) = out.save_page_map(&cli.output, options.page_map)? {
        info!("Wrote page map {}", path.display());
    }
    Ok(())
}

fn options(cli: &Cli) -> mobisplit::Result<SplitOptions> {
    let mut options = match &cli.config {
        Some(path) => SplitOptions::from_file(path)?,
        None => SplitOptions::default().with_mode(SplitMode::for_path(&cli.output)),
    };
    if let Some(mode) = cli.mode {
        options = options.with_mode(mode);
    }
    if let Some(page_map) = cli.page_map {
        options = options.with_page_map(page_map);
    }
    if cli.non_personal {
        options = options.with_non_personal(true);
    }
    if cli.force_asin {
        options = options.with_force_asin(true);
    }
    if cli.asin.is_some() {
        options = options.with_asin(cli.asin.clone());
    }
    Ok(options)
}
