use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use bookclub_application::{AppContext, ReaderSession};
use bookclub_core::{
    AnnotationScope, ContentId, DEFAULT_HIGHLIGHT_COLOR, Locator, NewAnnotation,
};
use bookclub_storage::Storage;
use bookclub_ui::Ui;
use directories::ProjectDirs;
use tracing::info;

mod logging;

const USAGE: &str = "usage: app <file.txt> [--group <id>] [--annotate <snippet> <comment>]";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Args {
    path: PathBuf,
    group: Option<i64>,
    annotate: Option<(String, String)>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    let project_dirs =
        ProjectDirs::from("dev", "bookclub", "bookclub").context("resolve project dirs")?;
    let config_dir = project_dirs.config_dir();
    fs::create_dir_all(config_dir)
        .with_context(|| format!("create config dir {}", config_dir.display()))?;

    let verbose = logging::enabled(std::env::var(logging::LOG_ENV).ok().as_deref());
    logging::init(verbose, &config_dir.join("bookclub.log"))?;

    let storage = Storage::open(config_dir.join("bookclub.db"))?;
    let settings = storage.load_settings()?;

    let content = fs::read_to_string(&args.path)
        .with_context(|| format!("read {}", args.path.display()))?;
    let content_id = content_id_for(&args.path);
    let owner = std::env::var("USER").unwrap_or_else(|_| "reader".to_string());
    let scope = args
        .group
        .map_or(AnnotationScope::Personal, AnnotationScope::Group);

    let mut ctx = AppContext::new(settings)
        .with_owner(owner)
        .with_scope(scope);
    ctx.refresh_annotations(&storage, &content_id)?;

    if let Some((snippet, comment)) = &args.annotate {
        let snippet = snippet.trim();
        if snippet.is_empty() || !content.contains(snippet) {
            anyhow::bail!("snippet not found in {}", args.path.display());
        }
        let new = NewAnnotation {
            content_id: content_id.clone(),
            scope,
            locator: Locator::Snippet(snippet.to_string()),
            text: comment.trim().to_string(),
            color: DEFAULT_HIGHLIGHT_COLOR.to_string(),
            owner: ctx.owner.clone(),
        };
        let created = ctx.add_annotation(&storage, &new)?;
        println!("annotation {} saved", created.id);
        return Ok(());
    }

    info!(content = %content_id, annotations = ctx.annotations_for(&content_id).len(), "opening");
    let layout = ctx.settings.layout(0.0, 0.0);
    let session = ReaderSession::open(content_id, content, layout, &ctx.settings, &storage)?;
    let title = args
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.path.display().to_string());

    let mut ui = Ui::new(ctx, session, &storage, title);
    let outcome = ui.run()?;
    if outcome.ctx.dirty_settings {
        storage.save_settings(&outcome.ctx.settings)?;
    }

    Ok(())
}

fn content_id_for(path: &Path) -> ContentId {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    ContentId(path.to_string_lossy().into_owned())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut path = None;
    let mut group = None;
    let mut annotate = None;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--group" => {
                let value = args.next().context(USAGE)?;
                let id = value
                    .parse::<i64>()
                    .with_context(|| format!("invalid group id `{value}`"))?;
                group = Some(id);
            }
            "--annotate" => {
                let snippet = args.next().context(USAGE)?;
                let comment = args.next().context(USAGE)?;
                annotate = Some((snippet, comment));
            }
            "-h" | "--help" => anyhow::bail!(USAGE),
            _ if arg.starts_with("--") => anyhow::bail!("unknown option `{arg}`\n{USAGE}"),
            _ if path.is_none() => path = Some(PathBuf::from(arg)),
            _ => anyhow::bail!("unexpected argument `{arg}`\n{USAGE}"),
        }
    }

    Ok(Args {
        path: path.context(USAGE)?,
        group,
        annotate,
    })
}
