use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use ocrlab_core::{
    NavOutcome, NotificationSink, OverlayKind, Page, PageImage, PageProvider, PageSource, Project,
    ProjectSession, Severity, TracingNotifier,
};
use ocrlab_overlay::{OverlayCache, OverlayPanel, OverlaySource, PngPixelEncoder};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "ocrlab",
    version,
    about = "inspect OCR labeling projects from the terminal"
)]
struct Args {
    /// Page to open the project on (0-based)
    #[arg(short = 'p', long = "page")]
    page: Option<i64>,

    /// Project directory containing page images
    project: PathBuf,
}

/// Pages straight from a project directory: one page per image file, with an
/// optional `<stem>.txt` sidecar supplying previously labeled text.
struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn sidecar_text(&self, name: &str) -> Option<String> {
        let stem = Path::new(name).file_stem()?.to_str()?;
        let sidecar = self.root.join(format!("{stem}.txt"));
        fs::read_to_string(sidecar).ok()
    }
}

impl PageProvider for DirectoryProvider {
    fn load_page(&self, index: usize, name: &str, _ground_truth: Option<&str>) -> Result<Page> {
        let path = self.root.join(name);
        let decoded = image::open(&path)
            .with_context(|| format!("failed to read page image {:?}", path))?
            .to_rgba8();
        let (width, height) = decoded.dimensions();
        let original = PageImage {
            width,
            height,
            pixels: decoded.into_raw(),
        };

        let (text, source) = match self.sidecar_text(name) {
            Some(text) => (Some(text), PageSource::Filesystem),
            None => (None, PageSource::Ocr),
        };

        let mut images = HashMap::new();
        images.insert(OverlayKind::Original, original);

        debug!(index, name, "loaded page from directory");
        Ok(Page {
            name: name.to_owned(),
            index,
            text,
            source,
            images,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let project_dirs = ProjectDirs::from("net", "ocrlab", "ocrlab")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let project = Project::open(&args.project)
        .with_context(|| format!("failed to open project {:?}", args.project))?;
    if project.page_count() == 0 {
        return Err(anyhow!("no page images found in {:?}", args.project));
    }

    let provider = Arc::new(DirectoryProvider::new(args.project.clone()));
    let notifier = TracingNotifier::new();
    let session = ProjectSession::new(project, provider.clone());

    let encoder = PngPixelEncoder;
    let mut panel = OverlayPanel::new(OverlayCache::new(&args.project));

    let start = args.page.unwrap_or(0);
    report(&notifier, &session, session.goto_page_index(start).await);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("n") => report(&notifier, &session, session.next_page().await),
            Some("p") => report(&notifier, &session, session.prev_page().await),
            Some("g") => match parts.next().map(str::parse::<i64>) {
                Some(Ok(number)) => {
                    report(&notifier, &session, session.goto_page_number(number).await);
                }
                _ => notifier.notify(Severity::Warning, "usage: g <page-number>"),
            },
            Some("i") => match parts.next().map(str::parse::<i64>) {
                Some(Ok(index)) => {
                    report(&notifier, &session, session.goto_page_index(index).await);
                }
                _ => notifier.notify(Severity::Warning, "usage: i <page-index>"),
            },
            Some("t") => print_texts(&session),
            Some("o") => {
                session.with_current_page_mut(|page| {
                    panel.update(provider.as_ref(), page, Some(&encoder));
                });
                print_overlays(&panel);
            }
            Some("q") => break,
            Some(other) => {
                notifier.notify(Severity::Warning, &format!("unknown command '{other}'"));
            }
            None => {}
        }
    }

    Ok(())
}

/// Boundary rejections are warnings; only preparation failures are errors.
/// Neither ends the command loop.
fn report(notifier: &dyn NotificationSink, session: &ProjectSession, result: Result<NavOutcome>) {
    match result {
        Ok(outcome) => {
            if !outcome.success {
                notifier.notify(Severity::Warning, &outcome.reason);
            }
            print_page(session);
        }
        Err(err) => {
            notifier.notify(Severity::Error, &format!("page preparation failed: {err:#}"));
        }
    }
}

fn print_page(session: &ProjectSession) {
    let index = session.current_index();
    let count = session.project().page_count();
    let name = usize::try_from(index)
        .ok()
        .and_then(|slot| session.project().page_name(slot))
        .unwrap_or("(none)");
    println!(
        "page {}/{} — {} [{}]",
        index + 1,
        count,
        name,
        session.current_source_label()
    );
}

fn print_texts(session: &ProjectSession) {
    let ocr = session.current_ocr_text();
    let ground_truth = session.current_ground_truth_text();
    println!("--- OCR ---");
    println!("{}", if ocr.is_empty() { "(empty)" } else { &ocr });
    println!("--- Ground truth ---");
    println!(
        "{}",
        if ground_truth.is_empty() {
            "(empty)"
        } else {
            &ground_truth
        }
    );
    let _ = io::stdout().flush();
}

fn print_overlays(panel: &OverlayPanel) {
    for kind in OverlayKind::ALL {
        match panel.slot(kind).source() {
            Some(OverlaySource::DataUri(uri)) => {
                println!("{}: inline ({} bytes)", kind.label(), uri.len());
            }
            Some(OverlaySource::File(path)) => {
                println!("{}: {}", kind.label(), path.display());
            }
            None => println!("{}: (hidden)", kind.label()),
        }
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "ocrlab.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
