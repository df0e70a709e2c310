use std::collections::{HashSet, VecDeque};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::CrawlArgs;
use crate::error::CrawlError;
use crate::extract::{PageExtractor, SelectorExtractor, SiteSelectors};
use crate::fetch::{Fetcher, HttpFetcher};
use crate::formats::{
    ChapterResult, CrawlResult, Location, PageRecord, StoryMetadata, UNKNOWN_AUTHOR,
    UNKNOWN_CHAPTER, UNKNOWN_TITLE,
};
use crate::observe::Observer;

pub const DEFAULT_DELAY_MS: u64 = 3000;

/// Walks a story chapter by chapter, page by page, strictly sequentially.
///
/// The engine itself holds only collaborators; every call to [`run`] starts
/// from a fresh queue and visited-set, so one engine can serve several crawls
/// one after another.
///
/// [`run`]: CrawlEngine::run
pub struct CrawlEngine {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn PageExtractor>,
    observer: Arc<dyn Observer>,
    delay: Duration,
}

#[derive(Debug)]
enum EngineState {
    QueueNonEmpty,
    ProcessingChapter { index: usize, start: Location },
    QueueEmpty,
}

#[derive(Debug)]
enum PageState {
    AwaitingPage { location: Location, page: usize },
    ChapterDone { last: PageRecord },
}

#[derive(Debug)]
struct CrawlState {
    queue: VecDeque<Location>,
    visited: HashSet<Location>,
    chapters: Vec<ChapterResult>,
    metadata: StoryMetadata,
    series_title: Option<String>,
    fetches: usize,
}

impl CrawlState {
    fn new(start: Location) -> Self {
        Self {
            queue: VecDeque::from([start]),
            visited: HashSet::new(),
            chapters: Vec::new(),
            metadata: StoryMetadata::default(),
            series_title: None,
            fetches: 0,
        }
    }

    fn next_unvisited(&mut self) -> Option<Location> {
        while let Some(location) = self.queue.pop_front() {
            if self.visited.insert(location.clone()) {
                return Some(location);
            }
            tracing::debug!(location = %location, "skip already visited chapter");
        }
        None
    }
}

#[derive(Debug)]
struct ChapterAccumulator {
    title: String,
    body: String,
    description: String,
}

impl ChapterAccumulator {
    fn new() -> Self {
        Self {
            title: UNKNOWN_CHAPTER.to_owned(),
            body: String::new(),
            description: String::new(),
        }
    }

    fn push_paragraphs(&mut self, paragraphs: &[String]) {
        for paragraph in paragraphs {
            if !self.body.is_empty() {
                self.body.push_str("\n\n");
            }
            self.body.push_str(paragraph);
        }
    }

    fn finish(self) -> ChapterResult {
        ChapterResult {
            title: self.title,
            body: self.body,
            description: self.description,
        }
    }
}

impl CrawlEngine {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn PageExtractor>,
        observer: Arc<dyn Observer>,
        delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            observer,
            delay,
        }
    }

    pub async fn run(&self, start: Location) -> Result<CrawlResult, CrawlError> {
        let mut crawl = CrawlState::new(start.clone());
        let mut state = EngineState::QueueNonEmpty;

        loop {
            state = match state {
                EngineState::QueueNonEmpty => match crawl.next_unvisited() {
                    Some(start) => EngineState::ProcessingChapter {
                        index: crawl.chapters.len() + 1,
                        start,
                    },
                    None => EngineState::QueueEmpty,
                },
                EngineState::ProcessingChapter { index, start } => {
                    self.process_chapter(&mut crawl, index, start).await?;
                    EngineState::QueueNonEmpty
                }
                EngineState::QueueEmpty => break,
            };
        }

        let result = CrawlResult {
            start,
            metadata: crawl.metadata,
            chapters: crawl.chapters,
        };
        let combined_chars = result.combined_text().chars().count();
        tracing::info!(
            chapters = result.chapters.len(),
            chars = combined_chars,
            title = %result.metadata.title,
            "crawl finished"
        );
        self.observer.action(&format!(
            "Combined {} chapters into final story content ({combined_chars} characters)",
            result.chapters.len()
        ));

        Ok(result)
    }

    async fn process_chapter(
        &self,
        crawl: &mut CrawlState,
        index: usize,
        start: Location,
    ) -> Result<(), CrawlError> {
        tracing::info!(chapter = index, location = %start, "processing chapter");
        self.observer
            .action(&format!("Processing chapter {index} from URL: {start}"));
        self.observer.url_visited(start.as_str());

        let mut chapter = ChapterAccumulator::new();
        let mut state = PageState::AwaitingPage {
            location: start,
            page: 1,
        };

        let last = loop {
            state = match state {
                PageState::AwaitingPage { location, page } => {
                    let record = self.fetch_page(crawl, index, page, &location).await?;
                    self.absorb_page(crawl, &mut chapter, index, page, &record);

                    match record.next_page.clone() {
                        Some(next) if crawl.visited.insert(next.clone()) => {
                            self.observer.action(&format!("Found next page link: {next}"));
                            PageState::AwaitingPage {
                                location: next,
                                page: page + 1,
                            }
                        }
                        Some(next) => {
                            tracing::warn!(
                                chapter = index,
                                location = %next,
                                "next page already visited; ending chapter"
                            );
                            PageState::ChapterDone { last: record }
                        }
                        None => PageState::ChapterDone { last: record },
                    }
                }
                PageState::ChapterDone { last } => break last,
            };
        };

        crawl.chapters.push(chapter.finish());
        tracing::info!(chapter = index, "chapter complete");
        self.observer.action(&format!("Completed chapter {index}"));

        if let Some(series_title) = last.series_title
            && crawl.series_title.is_none()
        {
            self.observer
                .action(&format!("Found series title: {series_title}"));
            crawl.metadata.title = series_title.clone();
            crawl.series_title = Some(series_title);
        }

        if let Some(next_chapter) = last.next_chapter
            && !crawl.visited.contains(&next_chapter)
        {
            tracing::debug!(location = %next_chapter, "queue next chapter");
            self.observer
                .action(&format!("Found next chapter link: {next_chapter}"));
            crawl.queue.push_back(next_chapter);
        }

        Ok(())
    }

    async fn fetch_page(
        &self,
        crawl: &mut CrawlState,
        chapter: usize,
        page: usize,
        location: &Location,
    ) -> Result<PageRecord, CrawlError> {
        if crawl.fetches > 0 && !self.delay.is_zero() {
            tracing::debug!(delay_ms = self.delay.as_millis() as u64, "politeness delay");
            tokio::time::sleep(self.delay).await;
        }
        crawl.fetches += 1;

        tracing::debug!(chapter, page, location = %location, "fetch page");
        self.observer
            .action(&format!("Fetching page {page} of chapter {chapter}"));

        let html = match self.fetcher.fetch(location).await {
            Ok(html) => html,
            Err(source) => {
                let err = CrawlError::Fetch {
                    location: location.to_string(),
                    chapter,
                    source,
                };
                tracing::error!(chapter, location = %location, err = %format!("{err:#}"), "crawl aborted");
                self.observer.error(
                    &format!("Network error while downloading chapter {chapter}: {err:#}"),
                    Some(location.as_str()),
                );
                return Err(err);
            }
        };

        let record = self.extractor.extract(location, &html);
        self.observer.action("Successfully parsed page content");
        Ok(record)
    }

    fn absorb_page(
        &self,
        crawl: &mut CrawlState,
        chapter: &mut ChapterAccumulator,
        index: usize,
        page: usize,
        record: &PageRecord,
    ) {
        if page == 1 {
            chapter.title = record
                .title
                .clone()
                .unwrap_or_else(|| UNKNOWN_CHAPTER.to_owned());
            chapter.description = record.description.clone().unwrap_or_default();
            self.observer
                .action(&format!("Added chapter title: {}", chapter.title));

            if index == 1 {
                crawl.metadata = StoryMetadata {
                    title: record
                        .title
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_TITLE.to_owned()),
                    author: record
                        .metadata
                        .author
                        .clone()
                        .unwrap_or_else(|| UNKNOWN_AUTHOR.to_owned()),
                    category: record.metadata.category.clone(),
                    tags: record.metadata.tags.clone(),
                };
                self.observer.action(&format!(
                    "Extracted story metadata - Title: {}, Author: {}",
                    crawl.metadata.title, crawl.metadata.author
                ));
                self.observer.action(&format!(
                    "Extracted category: {} and {} tags",
                    crawl.metadata.category.as_deref().unwrap_or("None"),
                    crawl.metadata.tags.len()
                ));
            }
        }

        chapter.push_paragraphs(&record.paragraphs);
        tracing::debug!(
            chapter = index,
            page,
            paragraphs = record.paragraphs.len(),
            "page extracted"
        );
        self.observer
            .action(&format!("Extracted content from page {page}"));
    }
}

pub fn build_engine(
    selectors: &SiteSelectors,
    observer: Arc<dyn Observer>,
    delay: Duration,
) -> anyhow::Result<CrawlEngine> {
    let fetcher = HttpFetcher::new().context("create fetcher")?;
    observer.action("Created new requests session");
    let extractor = SelectorExtractor::new(selectors).context("compile site selectors")?;
    Ok(CrawlEngine::new(
        Arc::new(fetcher),
        Arc::new(extractor),
        observer,
        delay,
    ))
}

pub async fn run(args: CrawlArgs, observer: Arc<dyn Observer>) -> anyhow::Result<()> {
    let out_path = PathBuf::from(&args.out);
    if out_path.exists() {
        anyhow::bail!("crawl output already exists: {}", out_path.display());
    }

    let start = Location::parse(&args.url).context("parse --url")?;
    let selectors = crate::build::load_selectors(args.selectors.as_deref())?;
    let engine = build_engine(
        &selectors,
        observer,
        Duration::from_millis(args.delay_ms),
    )?;

    let result = engine.run(start).await.context("crawl story")?;

    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create crawl output dir: {}", parent.display()))?;
    }
    let mut out = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&out_path)
        .with_context(|| format!("create crawl output: {}", out_path.display()))?;
    serde_json::to_writer_pretty(&mut out, &result).context("serialize crawl result")?;
    out.write_all(b"\n").context("write crawl output newline")?;
    out.flush().context("flush crawl output")?;

    tracing::info!(out = %out_path.display(), chapters = result.chapters.len(), "crawl written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::FetchError;
    use crate::observe::NoopObserver;

    const BASE: &str = "https://stories.example.com";

    #[derive(Default)]
    struct MapFetcher {
        pages: HashMap<String, String>,
        fetched: Mutex<Vec<String>>,
    }

    impl MapFetcher {
        fn with(mut self, path: &str, html: String) -> Self {
            self.pages.insert(format!("{BASE}{path}"), html);
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, location: &Location) -> Result<Vec<u8>, FetchError> {
            if let Ok(mut fetched) = self.fetched.lock() {
                fetched.push(location.to_string());
            }
            self.pages
                .get(location.as_str())
                .map(|html| html.clone().into_bytes())
                .ok_or_else(|| FetchError::Status {
                    location: location.to_string(),
                    status: reqwest::StatusCode::NOT_FOUND,
                })
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        actions: Mutex<Vec<String>>,
        urls: Mutex<Vec<String>>,
        errors: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RecordingObserver {
        fn actions(&self) -> Vec<String> {
            self.actions.lock().map(|a| a.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Observer for RecordingObserver {
        fn action(&self, message: &str) {
            if let Ok(mut actions) = self.actions.lock() {
                actions.push(message.to_owned());
            }
        }

        fn error(&self, message: &str, location: Option<&str>) {
            if let Ok(mut errors) = self.errors.lock() {
                errors.push((message.to_owned(), location.map(str::to_owned)));
            }
        }

        fn url_visited(&self, location: &str) {
            if let Ok(mut urls) = self.urls.lock() {
                urls.push(location.to_owned());
            }
        }

        async fn alert(&self, _message: &str, _is_error: bool) {}
    }

    /// Marks each extraction in the observer's action list.
    struct MarkingExtractor {
        inner: SelectorExtractor,
        observer: Arc<RecordingObserver>,
    }

    impl PageExtractor for MarkingExtractor {
        fn extract(&self, page: &Location, html: &[u8]) -> PageRecord {
            self.observer.action("<extract>");
            self.inner.extract(page, html)
        }
    }

    #[derive(Default)]
    struct Page<'a> {
        title: Option<&'a str>,
        author: Option<&'a str>,
        category: Option<&'a str>,
        tags: &'a [&'a str],
        paragraphs: &'a [&'a str],
        next_page: Option<&'a str>,
        series_title: Option<&'a str>,
        next_part: Option<&'a str>,
    }

    impl Page<'_> {
        fn html(&self) -> String {
            let mut out = String::from("<!doctype html><html><body>\n");
            if let Some(category) = self.category {
                out.push_str(&format!(
                    "<div id=\"BreadCrumbComponent\"><a class=\"h_aZ\" href=\"/\">Home</a><a class=\"h_aZ\" href=\"/c\">{category}</a></div>\n"
                ));
            }
            if let Some(title) = self.title {
                out.push_str(&format!("<h1 class=\"headline\">{title}</h1>\n"));
            }
            if let Some(author) = self.author {
                out.push_str(&format!("<a class=\"y_eU\" href=\"/a\">{author}</a>\n"));
            }
            for tag in self.tags {
                out.push_str(&format!("<a class=\"av_as av_r\" href=\"/t\">{tag}</a>\n"));
            }
            out.push_str("<div class=\"aa_ht\">");
            for paragraph in self.paragraphs {
                out.push_str(&format!("<p>{paragraph}</p>"));
            }
            out.push_str("</div>\n");
            if let Some(next) = self.next_page {
                out.push_str(&format!(
                    "<a class=\"l_bJ\" title=\"Next Page\" href=\"{next}\">Next</a>\n"
                ));
            }
            if self.series_title.is_some() || self.next_part.is_some() {
                out.push_str("<div class=\"panel z_r z_R\">");
                if let Some(series) = self.series_title {
                    out.push_str(&format!(
                        "<div class=\"z_S\"><span class=\"z_pm\">Series Info</span><a class=\"z_t\" href=\"/series/1\">{series}</a></div>"
                    ));
                }
                if let Some(next) = self.next_part {
                    out.push_str(&format!(
                        "<div class=\"z_S\"><span class=\"z_pm\">Next Part</span><a class=\"z_t\" href=\"{next}\">Next</a></div>"
                    ));
                }
                out.push_str("</div>\n");
            }
            out.push_str("</body></html>\n");
            out
        }
    }

    fn engine_with(fetcher: Arc<MapFetcher>, observer: Arc<dyn Observer>) -> anyhow::Result<CrawlEngine> {
        let extractor = SelectorExtractor::new(&SiteSelectors::default())?;
        Ok(CrawlEngine::new(
            fetcher,
            Arc::new(extractor),
            observer,
            Duration::ZERO,
        ))
    }

    fn start(path: &str) -> anyhow::Result<Location> {
        Location::parse(&format!("{BASE}{path}"))
    }

    #[tokio::test]
    async fn multi_page_chapter_concatenates_paragraphs_in_order() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("One"),
                        author: Some("Jane Doe"),
                        paragraphs: &["a1", "a2"],
                        next_page: Some("/s/one?page=2"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/one?page=2",
                    Page {
                        title: Some("One"),
                        paragraphs: &["b1"],
                        next_page: Some("/s/one?page=3"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/one?page=3",
                    Page {
                        paragraphs: &["c1", "c2"],
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let result = engine.run(start("/s/one")?).await?;

        assert_eq!(result.chapters.len(), 1);
        assert_eq!(result.chapters[0].title, "One");
        assert_eq!(result.chapters[0].body, "a1\n\na2\n\nb1\n\nc1\n\nc2");
        assert_eq!(result.metadata.author, "Jane Doe");
        assert_eq!(fetcher.fetched().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn single_page_chapters_follow_series_in_discovery_order() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("Ch1"),
                        paragraphs: &["first"],
                        next_part: Some("/s/two"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two",
                    Page {
                        title: Some("Ch2"),
                        paragraphs: &["second"],
                        next_part: Some("/s/three"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/three",
                    Page {
                        title: Some("Ch3"),
                        paragraphs: &["third"],
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let result = engine.run(start("/s/one")?).await?;

        let titles = result
            .chapters
            .iter()
            .map(|c| c.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Ch1", "Ch2", "Ch3"]);
        assert_eq!(
            fetcher.fetched(),
            vec![
                format!("{BASE}/s/one"),
                format!("{BASE}/s/two"),
                format!("{BASE}/s/three"),
            ]
        );
        assert!(result.combined_text().contains("Chapter 3: Ch3\n\nthird"));
        Ok(())
    }

    #[tokio::test]
    async fn series_cycle_never_refetches_a_location() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("Ch1"),
                        paragraphs: &["first"],
                        next_part: Some("/s/two"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two",
                    Page {
                        title: Some("Ch2"),
                        paragraphs: &["second"],
                        next_page: Some("/s/two?page=2"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two?page=2",
                    Page {
                        paragraphs: &["more"],
                        next_part: Some("/s/one#comments"),
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let result = engine.run(start("/s/one")?).await?;

        assert_eq!(result.chapters.len(), 2);
        let fetched = fetcher.fetched();
        let unique = fetched.iter().collect::<HashSet<_>>();
        assert_eq!(fetched.len(), 3);
        assert_eq!(unique.len(), fetched.len());
        Ok(())
    }

    #[tokio::test]
    async fn next_page_loop_ends_the_chapter() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("Ch1"),
                        paragraphs: &["p1"],
                        next_page: Some("/s/one?page=2"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/one?page=2",
                    Page {
                        paragraphs: &["p2"],
                        next_page: Some("/s/one"),
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let result = engine.run(start("/s/one")?).await?;

        assert_eq!(result.chapters.len(), 1);
        assert_eq!(result.chapters[0].body, "p1\n\np2");
        assert_eq!(fetcher.fetched().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn first_fetch_failure_returns_no_result() -> anyhow::Result<()> {
        let fetcher = Arc::new(MapFetcher::default());
        let observer = Arc::new(RecordingObserver::default());
        let engine = engine_with(Arc::clone(&fetcher), observer.clone())?;

        let err = engine.run(start("/s/missing")?).await.unwrap_err();

        assert_eq!(err.chapter(), 1);
        assert_eq!(err.location(), format!("{BASE}/s/missing"));
        assert_eq!(fetcher.fetched().len(), 1);
        let errors = observer.errors.lock().map(|e| e.clone()).unwrap_or_default();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1.as_deref(), Some(format!("{BASE}/s/missing").as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn failure_in_later_chapter_discards_earlier_chapters() -> anyhow::Result<()> {
        let fetcher = Arc::new(MapFetcher::default().with(
            "/s/one",
            Page {
                title: Some("Ch1"),
                paragraphs: &["first"],
                next_part: Some("/s/gone"),
                ..Page::default()
            }
            .html(),
        ));
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let err = engine.run(start("/s/one")?).await.unwrap_err();

        assert_eq!(err.chapter(), 2);
        assert_eq!(err.location(), format!("{BASE}/s/gone"));
        Ok(())
    }

    #[tokio::test]
    async fn metadata_comes_from_first_chapter_and_series_title_wins() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("First Night"),
                        author: Some("Jane Doe"),
                        category: Some("Incest/Taboo"),
                        tags: &["romance", "incest", "slow burn"],
                        paragraphs: &["first"],
                        series_title: Some("Seven Nights"),
                        next_part: Some("/s/two"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two",
                    Page {
                        title: Some("Second Night"),
                        author: Some("Someone Else"),
                        category: Some("Romance"),
                        paragraphs: &["second"],
                        series_title: Some("Another Series"),
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let observer = Arc::new(RecordingObserver::default());
        let engine = engine_with(Arc::clone(&fetcher), observer.clone())?;

        let result = engine.run(start("/s/one")?).await?;

        assert_eq!(result.metadata.title, "Seven Nights");
        assert_eq!(result.metadata.author, "Jane Doe");
        assert_eq!(result.metadata.category.as_deref(), Some("I/T"));
        assert_eq!(result.metadata.tags, vec!["I/T", "romance", "slow burn"]);
        assert_eq!(result.chapters[0].title, "First Night");
        assert_eq!(result.chapters[1].title, "Second Night");
        let urls = observer.urls.lock().map(|u| u.clone()).unwrap_or_default();
        assert_eq!(urls, vec![format!("{BASE}/s/one"), format!("{BASE}/s/two")]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_chapter_keeps_its_slot_with_defaults() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        next_part: Some("/s/two"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two",
                    Page {
                        title: Some("Ch2"),
                        paragraphs: &["second"],
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let result = engine.run(start("/s/one")?).await?;

        assert_eq!(result.metadata.title, UNKNOWN_TITLE);
        assert_eq!(result.metadata.author, UNKNOWN_AUTHOR);
        assert_eq!(result.metadata.category, None);
        assert!(result.metadata.tags.is_empty());
        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[0].title, UNKNOWN_CHAPTER);
        assert_eq!(result.chapters[0].body, "");
        assert_eq!(result.chapters[1].title, "Ch2");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn delay_precedes_every_fetch_but_the_first() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("Ch1"),
                        paragraphs: &["p1"],
                        next_page: Some("/s/one?page=2"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/one?page=2",
                    Page {
                        paragraphs: &["p2"],
                        next_page: Some("/s/one?page=3"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/one?page=3",
                    Page {
                        paragraphs: &["p3"],
                        next_part: Some("/s/two"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two",
                    Page {
                        title: Some("Ch2"),
                        paragraphs: &["q1"],
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let delay = Duration::from_millis(3000);
        let extractor = SelectorExtractor::new(&SiteSelectors::default())?;
        let engine = CrawlEngine::new(
            Arc::clone(&fetcher) as Arc<dyn Fetcher>,
            Arc::new(extractor),
            Arc::new(NoopObserver),
            delay,
        );

        let started = tokio::time::Instant::now();
        let result = engine.run(start("/s/one")?).await?;
        let elapsed = started.elapsed();

        assert_eq!(result.chapters.len(), 2);
        assert_eq!(fetcher.fetched().len(), 4);
        assert!(elapsed >= delay * 3, "elapsed {elapsed:?}");
        assert!(elapsed < delay * 4, "elapsed {elapsed:?}");
        Ok(())
    }

    #[tokio::test]
    async fn next_part_survives_a_looping_next_page_link() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            MapFetcher::default()
                .with(
                    "/s/one",
                    Page {
                        title: Some("Ch1"),
                        paragraphs: &["p1"],
                        next_page: Some("/s/one?page=2"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/one?page=2",
                    Page {
                        paragraphs: &["p2"],
                        next_page: Some("/s/one"),
                        series_title: Some("Two Parts"),
                        next_part: Some("/s/two"),
                        ..Page::default()
                    }
                    .html(),
                )
                .with(
                    "/s/two",
                    Page {
                        title: Some("Ch2"),
                        paragraphs: &["q1"],
                        ..Page::default()
                    }
                    .html(),
                ),
        );
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let result = engine.run(start("/s/one")?).await?;

        assert_eq!(result.metadata.title, "Two Parts");
        assert_eq!(result.chapters.len(), 2);
        assert_eq!(result.chapters[1].title, "Ch2");
        assert_eq!(fetcher.fetched().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn parse_is_reported_after_extraction_and_totals_after_the_crawl() -> anyhow::Result<()> {
        let fetcher = Arc::new(MapFetcher::default().with(
            "/s/one",
            Page {
                title: Some("Ch1"),
                paragraphs: &["first"],
                ..Page::default()
            }
            .html(),
        ));
        let observer = Arc::new(RecordingObserver::default());
        let extractor = MarkingExtractor {
            inner: SelectorExtractor::new(&SiteSelectors::default())?,
            observer: Arc::clone(&observer),
        };
        let engine = CrawlEngine::new(
            fetcher,
            Arc::new(extractor),
            observer.clone(),
            Duration::ZERO,
        );

        let result = engine.run(start("/s/one")?).await?;

        let actions = observer.actions();
        let extracted = actions.iter().position(|a| a == "<extract>").unwrap();
        let parsed = actions
            .iter()
            .position(|a| a == "Successfully parsed page content")
            .unwrap();
        assert!(extracted < parsed);

        let chars = result.combined_text().chars().count();
        assert_eq!(
            actions.last().map(String::as_str),
            Some(format!("Combined 1 chapters into final story content ({chars} characters)").as_str())
        );
        Ok(())
    }

    #[tokio::test]
    async fn engine_state_does_not_leak_between_runs() -> anyhow::Result<()> {
        let fetcher = Arc::new(MapFetcher::default().with(
            "/s/one",
            Page {
                title: Some("Ch1"),
                paragraphs: &["first"],
                ..Page::default()
            }
            .html(),
        ));
        let engine = engine_with(Arc::clone(&fetcher), Arc::new(NoopObserver))?;

        let first = engine.run(start("/s/one")?).await?;
        let second = engine.run(start("/s/one")?).await?;

        assert_eq!(first, second);
        assert_eq!(fetcher.fetched().len(), 2);
        Ok(())
    }
}
