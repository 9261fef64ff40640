mod panic_handler;

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use log::{LevelFilter, error, info};
use simplelog::{Config, WriteLogger};

use inkpage::paths::{resolve_data_paths, resolve_log_path};
use inkpage::pixels::PixelBuffer;
use inkpage::preferences::PreferencesStore;
use inkpage::settings;
use inkpage::signature::{ExtractorConfig, SignatureExtractor, SignatureStore, scale};

#[derive(Parser)]
#[command(version, about = "Page rendering and signature capture", long_about = None)]
struct Cli {
    #[arg(long = "log-level", global = true, help = "off, error, warn, info, debug or trace")]
    log_level: Option<LevelFilter>,

    #[arg(long = "data-dir", global = true, help = "Store signatures and preferences here")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract a signature from a photo of paper
    Extract {
        photo: PathBuf,
        #[arg(short = 's', long, help = "0 keeps faint strokes, 100 strips aggressively")]
        sensitivity: Option<u8>,
        #[arg(long, help = "Name to store the signature under")]
        name: Option<String>,
        #[arg(long, help = "Also write the result to this PNG")]
        preview: Option<PathBuf>,
        #[arg(long = "no-save", help = "Do not add the result to the signature store")]
        no_save: bool,
    },
    /// Manage stored signatures
    Signatures {
        #[command(subcommand)]
        action: SignatureAction,
    },
    /// Recently opened documents
    History,
    /// Render document pages to PNG files
    #[cfg(feature = "pdf")]
    Render {
        document: PathBuf,
        #[arg(long, value_parser = parse_page_range, help = "1-based, e.g. 3 or 2..5")]
        pages: Option<(usize, usize)>,
        #[arg(long, help = "Raster width in pixels")]
        width: Option<u32>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum SignatureAction {
    List,
    Delete { id: String },
}

fn main() {
    let cli = Cli::parse();

    settings::load_settings();
    let level = cli.log_level.unwrap_or_else(settings::get_log_level);
    if let Err(e) = init_logging(level) {
        eprintln!("Logging disabled: {e:#}");
    }
    panic_handler::initialize_panic_handler();

    if let Err(e) = run(cli) {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(level: LevelFilter) -> Result<()> {
    let log_path = resolve_log_path()?;
    let file = File::create(&log_path).with_context(|| format!("Failed to create {log_path:?}"))?;
    WriteLogger::init(level, Config::default(), file)?;
    info!("Starting inkpage, logging to {log_path:?}");
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let paths = resolve_data_paths(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Extract {
            photo,
            sensitivity,
            name,
            preview,
            no_save,
        } => {
            let sensitivity = sensitivity.unwrap_or_else(settings::get_default_sensitivity);
            let signature = extract_signature(&photo, sensitivity)?;

            if let Some(preview) = preview {
                signature
                    .to_image()
                    .save(&preview)
                    .with_context(|| format!("Failed to write preview {preview:?}"))?;
                println!("Preview written to {}", preview.display());
            }
            if !no_save {
                let store = SignatureStore::new(&paths.signatures_dir)?;
                let id = store.save(&signature, name.as_deref())?;
                println!("Saved signature {id}");
            }
        }
        Command::Signatures { action } => {
            let store = SignatureStore::new(&paths.signatures_dir)?;
            match action {
                SignatureAction::List => {
                    for id in store.list() {
                        println!("{id}");
                    }
                }
                SignatureAction::Delete { id } => {
                    if !store.delete(&id) {
                        bail!("No signature named {id:?}");
                    }
                    println!("Deleted {id}");
                }
            }
        }
        Command::History => {
            let preferences = PreferencesStore::new(&paths.preferences_dir)?;
            for entry in preferences.history() {
                println!("{}\t{}\t{}", entry.title, entry.size, entry.path);
            }
        }
        #[cfg(feature = "pdf")]
        Command::Render {
            document,
            pages,
            width,
            out,
        } => {
            let preferences = PreferencesStore::new(&paths.preferences_dir)?;
            render::render_pages(&document, pages, width, &out, &preferences)?;
        }
    }

    Ok(())
}

fn extract_signature(photo: &Path, sensitivity: u8) -> Result<PixelBuffer> {
    let image = image::open(photo).with_context(|| format!("Failed to open photo {photo:?}"))?;
    let source = PixelBuffer::from_image(&image);
    info!(
        "Extracting signature from {photo:?} ({}x{}) at sensitivity {sensitivity}",
        source.width(),
        source.height()
    );

    let extractor = SignatureExtractor::new(ExtractorConfig::from_settings());
    let extracted = extractor.extract(&source, sensitivity);
    scale(
        &extracted,
        settings::get_signature_max_width(),
        settings::get_signature_max_height(),
    )
    .context("Signature has no usable size")
}

#[cfg(feature = "pdf")]
fn parse_page_range(value: &str) -> Result<(usize, usize), String> {
    let parse = |s: &str| {
        s.trim()
            .parse::<usize>()
            .map_err(|e| format!("invalid page {s:?}: {e}"))
    };
    let (first, last) = match value.split_once("..") {
        Some((a, b)) => (parse(a)?, parse(b)?),
        None => {
            let page = parse(value)?;
            (page, page)
        }
    };
    if first == 0 || last < first {
        return Err(format!("invalid page range {value:?}"));
    }
    Ok((first, last))
}

#[cfg(feature = "pdf")]
mod render {
    use std::cell::Cell;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Context, Result, bail};
    use log::{info, warn};

    use inkpage::pixels::PixelBuffer;
    use inkpage::preferences::{HistoryEntry, PreferencesStore};
    use inkpage::render::{MuPdfSource, PageViewBinder, RenderCache, RenderConfig, SharedSource, SlotId};
    use inkpage::settings;

    const STALL_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn render_pages(
        document: &Path,
        pages: Option<(usize, usize)>,
        width: Option<u32>,
        out: &Path,
        preferences: &PreferencesStore,
    ) -> Result<()> {
        let source = MuPdfSource::open(document)
            .with_context(|| format!("Failed to open {document:?}"))?;
        let source = SharedSource::new(source);
        let page_count = source.page_count();
        if page_count == 0 {
            bail!("{document:?} has no pages");
        }

        let (first, last) = pages.unwrap_or((1, page_count));
        let last = last.min(page_count);
        if first > last {
            bail!("{document:?} has only {page_count} pages");
        }
        fs::create_dir_all(out).with_context(|| format!("Failed to create {out:?}"))?;

        let stem = document
            .file_stem()
            .map_or_else(|| "page".to_string(), |s| s.to_string_lossy().into_owned());
        let config = RenderConfig::from_settings();
        let window = config.cache_size.max(1);
        let width = width.unwrap_or_else(settings::get_page_width);

        let delivered = Cell::new(0usize);
        let failed = Cell::new(0usize);
        let mut binder = PageViewBinder::new(
            RenderCache::with_config(source, config),
            width,
            |_slot: SlotId, page: usize, image: Option<Arc<PixelBuffer>>| {
                delivered.set(delivered.get() + 1);
                let Some(image) = image else {
                    warn!("Page {} failed to render", page + 1);
                    failed.set(failed.get() + 1);
                    return;
                };
                let path = out.join(format!("{stem}-{:04}.png", page + 1));
                match image.to_image().save(&path) {
                    Ok(()) => println!("{}", path.display()),
                    Err(e) => {
                        warn!("Failed to write {path:?}: {e}");
                        failed.set(failed.get() + 1);
                    }
                }
            },
        );

        // Bind one window of slots at a time so at most `window` pages are in memory.
        let indices: Vec<usize> = (first - 1..last).collect();
        for chunk in indices.chunks(window) {
            let target = delivered.get() + chunk.len();
            for (slot, &page) in chunk.iter().enumerate() {
                binder.bind(SlotId(slot), page);
            }
            while delivered.get() < target {
                if binder.pump_timeout(STALL_TIMEOUT) == 0 {
                    binder.cleanup();
                    bail!("Rendering stalled after {} pages", delivered.get());
                }
            }
            for slot in 0..chunk.len() {
                binder.unbind(SlotId(slot));
            }
        }
        binder.cleanup();
        drop(binder);

        let size = fs::metadata(document).map(|m| m.len()).unwrap_or(0);
        preferences.push_history(HistoryEntry {
            title: stem,
            path: document.to_string_lossy().into_owned(),
            size,
        })?;

        info!(
            "Rendered {} of {} pages from {document:?}",
            delivered.get() - failed.get(),
            indices.len()
        );
        if failed.get() > 0 {
            bail!("{} pages failed to render", failed.get());
        }
        Ok(())
    }
}
