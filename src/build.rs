use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::{BuildArgs, CoverArgs, PackageArgs};
use crate::cover::CoverFont;
use crate::epub::{CreateEpubOptions, StoryBook};
use crate::extract::SiteSelectors;
use crate::formats::{CrawlResult, Location};
use crate::observe::Observer;

const FALLBACK_AUTHOR_DIR: &str = "Unknown_Author";
const FALLBACK_TITLE_FILE: &str = "Untitled";

pub fn load_selectors(path: Option<&str>) -> anyhow::Result<SiteSelectors> {
    match path {
        Some(path) => SiteSelectors::from_json_file(Path::new(path))
            .with_context(|| format!("load selectors: {path}")),
        None => Ok(SiteSelectors::default()),
    }
}

/// Keeps ASCII letters, digits, spaces, dots, underscores and hyphens.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub dir: PathBuf,
    pub epub: PathBuf,
    pub cover: PathBuf,
}

impl OutputPaths {
    /// `<root>/<author>/<title>.epub`, with the cover image alongside.
    pub fn for_story(root: &Path, title: &str, author: &str) -> Self {
        let author = non_empty_or(sanitize_filename(author), FALLBACK_AUTHOR_DIR);
        let title = non_empty_or(sanitize_filename(title), FALLBACK_TITLE_FILE);
        let dir = root.join(author);
        Self {
            epub: dir.join(format!("{title}.epub")),
            cover: dir.join(format!("{title}.jpg")),
            dir,
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[derive(Debug, Clone)]
pub struct PackageOptions {
    pub out_root: PathBuf,
    pub cover: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub introduction: Option<String>,
    pub epub: CreateEpubOptions,
}

pub async fn run(args: BuildArgs, observer: Arc<dyn Observer>) -> anyhow::Result<()> {
    let start = Location::parse(&args.url).context("parse --url")?;
    let selectors = load_selectors(args.selectors.as_deref())?;
    let options = PackageOptions {
        out_root: PathBuf::from(&args.out),
        cover: args.cover.as_ref().map(PathBuf::from),
        font: args.font.as_ref().map(PathBuf::from),
        introduction: read_introduction(args.intro.as_deref())?,
        epub: CreateEpubOptions {
            force: args.force,
            publisher: args.publisher.clone(),
            ..CreateEpubOptions::default()
        },
    };

    tracing::info!(url = %start, out = %options.out_root.display(), "build: crawl");
    observer.action(&format!("Starting story download from: {start}"));
    let engine = crate::crawl::build_engine(
        &selectors,
        Arc::clone(&observer),
        Duration::from_millis(args.delay_ms),
    )?;
    let result = match engine.run(start.clone()).await {
        Ok(result) => result,
        Err(err) => {
            observer
                .alert(&format!("Story download failed: {start}"), true)
                .await;
            return Err(err).context("crawl story");
        }
    };

    tracing::info!(
        title = %result.metadata.title,
        chapters = result.chapters.len(),
        "build: package"
    );
    let epub_path = package_story(&result, &options, observer.as_ref()).await?;

    tracing::info!(out = %epub_path.display(), "build: done");
    Ok(())
}

pub async fn run_package(args: PackageArgs, observer: Arc<dyn Observer>) -> anyhow::Result<()> {
    let crawl_path = PathBuf::from(&args.crawl);
    let json = std::fs::read_to_string(&crawl_path)
        .with_context(|| format!("read crawl result: {}", crawl_path.display()))?;
    let result: CrawlResult = serde_json::from_str(&json)
        .with_context(|| format!("parse crawl result: {}", crawl_path.display()))?;

    let options = PackageOptions {
        out_root: PathBuf::from(&args.out),
        cover: args.cover.as_ref().map(PathBuf::from),
        font: args.font.as_ref().map(PathBuf::from),
        introduction: read_introduction(args.intro.as_deref())?,
        epub: CreateEpubOptions {
            force: args.force,
            publisher: args.publisher.clone(),
            ..CreateEpubOptions::default()
        },
    };
    let epub_path = package_story(&result, &options, observer.as_ref()).await?;

    tracing::info!(out = %epub_path.display(), "package: done");
    Ok(())
}

pub fn run_cover(args: CoverArgs) -> anyhow::Result<()> {
    let out_path = PathBuf::from(&args.out);
    let font = CoverFont::load(args.font.as_deref().map(Path::new));
    crate::cover::write_cover(&args.title, &args.author, &font, &out_path)
        .with_context(|| format!("write cover: {}", out_path.display()))?;
    tracing::info!(out = %out_path.display(), fallback_font = font.is_fallback(), "cover written");
    Ok(())
}

/// Writes the cover (unless one was supplied) and the EPUB for a finished
/// crawl. Cover problems degrade to a book without a cover; packaging
/// failures are logged, alerted and returned.
pub async fn package_story(
    result: &CrawlResult,
    options: &PackageOptions,
    observer: &dyn Observer,
) -> anyhow::Result<PathBuf> {
    let title = result.metadata.title.as_str();
    let author = result.metadata.author.as_str();
    let paths = OutputPaths::for_story(&options.out_root, title, author);

    std::fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create output dir: {}", paths.dir.display()))?;
    observer.action(&format!("Created/verified directory: {}", paths.dir.display()));

    let cover = load_or_render_cover(result, options, &paths, observer);

    let book = StoryBook::from_crawl(result)
        .with_introduction(options.introduction.as_deref())
        .with_cover(cover.as_deref());

    match crate::epub::create_story_epub(&book, &paths.epub, &options.epub) {
        Ok(()) => {
            observer.action(&format!(
                "Successfully wrote EPUB file to: {}",
                paths.epub.display()
            ));
            observer
                .alert(&format!("EPUB created: {title} by {author}"), false)
                .await;
            Ok(paths.epub)
        }
        Err(err) => {
            observer.error(
                &format!("Error creating EPUB file for '{title}' by {author}: {err}"),
                Some(result.start.as_str()),
            );
            observer
                .alert(&format!("EPUB creation failed: {title} by {author}"), true)
                .await;
            Err(err).with_context(|| format!("package epub: {}", paths.epub.display()))
        }
    }
}

fn load_or_render_cover(
    result: &CrawlResult,
    options: &PackageOptions,
    paths: &OutputPaths,
    observer: &dyn Observer,
) -> Option<Vec<u8>> {
    if let Some(path) = options.cover.as_ref() {
        return match std::fs::read(path) {
            Ok(bytes) => {
                observer.action(&format!("Using supplied cover image: {}", path.display()));
                Some(bytes)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "cover image unreadable; packaging without cover");
                observer.error(&format!("Error adding cover image: {err}"), None);
                None
            }
        };
    }

    let font = CoverFont::load(options.font.as_deref());
    match crate::cover::write_cover(
        &result.metadata.title,
        &result.metadata.author,
        &font,
        &paths.cover,
    ) {
        Ok(bytes) => {
            observer.action(&format!("Generated cover image: {}", paths.cover.display()));
            Some(bytes)
        }
        Err(err) => {
            tracing::warn!(?err, "cover generation failed; packaging without cover");
            observer.error(&format!("Error generating cover image: {err}"), None);
            observer.action("Failed to generate cover image");
            None
        }
    }
}

fn read_introduction(path: Option<&str>) -> anyhow::Result<Option<String>> {
    path.map(|path| {
        std::fs::read_to_string(path).with_context(|| format!("read introduction: {path}"))
    })
    .transpose()
}
