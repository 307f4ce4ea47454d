//! Headless document pager
//!
//! Opens a document, restores the last reading position, optionally runs a
//! search, drives the reader until every render has settled and reports
//! where it ended up.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{LevelFilter, info, warn};
use simplelog::{Config, WriteLogger};

use docpager::engine::DocumentEngine;
use docpager::engine::mupdf::MupdfEngine;
use docpager::panic_handler;
use docpager::positions::ReadingPositions;
use docpager::search::SearchDirection;
use docpager::session::DocumentSession;
use docpager::settings::ViewerSettings;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Page through a document without a screen
#[derive(Parser, Debug)]
#[command(name = "docpager")]
#[command(version, about, long_about = None)]
struct Args {
    /// Document to open
    file: PathBuf,

    /// Page to show (1-based); defaults to the last position read
    #[arg(short, long)]
    page: Option<usize>,

    /// Search forward for this text from the shown page
    #[arg(short, long)]
    search: Option<String>,

    /// Search backward instead of forward
    #[arg(long)]
    backward: bool,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    /// Print the flattened outline
    #[arg(long)]
    outline: bool,

    /// Settings file (YAML); defaults to the platform config dir
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reading positions file (JSON); defaults to the platform data dir
    #[arg(long)]
    positions: Option<PathBuf>,

    /// Do not read or write reading positions
    #[arg(long)]
    no_positions: bool,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1080)]
    width: i32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 1920)]
    height: i32,

    /// Viewport density in dots per inch
    #[arg(long, default_value_t = 160.0)]
    dpi: f32,

    /// Log file
    #[arg(long, default_value = "docpager.log")]
    log_file: PathBuf,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn default_positions_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("docpager").join("positions.json"))
}

fn pump(session: &mut DocumentSession) -> bool {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let now = Instant::now();
        session.frame(now);
        if !session.needs_frame() {
            return true;
        }
        if now >= deadline {
            return false;
        }
        thread::sleep(FRAME_INTERVAL);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    WriteLogger::init(
        args.log_level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("Failed to create log file {:?}", args.log_file))?,
    )?;
    panic_handler::initialize_panic_handler();

    info!("Starting docpager on {:?}", args.file);

    let settings = ViewerSettings::load(args.config.as_deref());
    let positions_path = if args.no_positions {
        None
    } else {
        args.positions.clone().or_else(default_positions_path)
    };
    if let Some(parent) = positions_path.as_deref().and_then(|p| p.parent()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Cannot create {parent:?}: {e}");
        }
    }
    let mut positions = ReadingPositions::load_or_ephemeral(positions_path.as_deref());

    let engine = MupdfEngine::open(&args.file)
        .with_context(|| format!("Failed to open {:?}", args.file))?;
    if engine.needs_password() {
        let Some(password) = &args.password else {
            bail!("{:?} is encrypted, pass --password", args.file);
        };
        DocumentSession::authenticate(&engine, password)?;
    }

    let doc_key = args
        .file
        .canonicalize()
        .unwrap_or_else(|_| args.file.clone())
        .to_string_lossy()
        .into_owned();
    let mut session = DocumentSession::open(Arc::new(engine), &settings, doc_key.clone())?;
    session.resize(args.width, args.height, args.dpi);

    let start = match args.page {
        Some(page) => page.saturating_sub(1),
        None => positions.page_for(&doc_key).unwrap_or(0),
    };
    if !session.show_page(start) {
        warn!("Page {} is out of range, staying on page 1", start + 1);
    }

    if !pump(&mut session) {
        warn!("Renders did not settle within {SETTLE_TIMEOUT:?}");
    }

    println!("{}", session.title());

    if args.outline {
        for item in session.outline() {
            match item.page {
                Some(page) => println!("{:>6}  {}", page + 1, item.title),
                None => println!("{:>6}  {}", "-", item.title),
            }
        }
    }

    if let Some(text) = &args.search {
        let direction = if args.backward {
            SearchDirection::Backward
        } else {
            SearchDirection::Forward
        };
        session.set_search_text(text);
        session.search(direction, Instant::now());
        pump(&mut session);
        match session.reader().search_result() {
            Some(result) => println!(
                "Found {:?} on page {} ({} matches)",
                result.text,
                result.page + 1,
                result.boxes.len()
            ),
            None => {
                let message = session
                    .notifications()
                    .current()
                    .map(|n| n.message.clone())
                    .unwrap_or_else(|| "Search did not finish".to_string());
                println!("{message}");
            }
        }
    }

    println!("{}", session.page_label());

    let page = session.close();
    positions.record(&doc_key, page);
    info!("Exiting at page {}", page + 1);
    Ok(())
}
