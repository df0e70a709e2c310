use serde::{Deserialize, Serialize};
use url::Url;

pub const UNKNOWN_CHAPTER: &str = "Unknown Chapter";
pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// One fetchable page, identified by its normalized URL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(Url);

impl Location {
    pub fn new(url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        Self(normalized)
    }

    pub fn parse(input: &str) -> anyhow::Result<Self> {
        let url = Url::parse(input.trim())
            .map_err(|err| anyhow::anyhow!("invalid location {input:?}: {err}"))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("location must be http/https: {url}");
        }
        Ok(Self::new(&url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    pub author: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
}

/// Everything one fetched page contributes to the crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRecord {
    pub title: Option<String>,
    pub metadata: PageMetadata,
    pub description: Option<String>,
    pub paragraphs: Vec<String>,
    pub next_page: Option<Location>,
    pub next_chapter: Option<Location>,
    pub series_title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    /// Replaced by the series title once one is discovered, even though the
    /// first chapter was already crawled under the original title.
    pub title: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Default for StoryMetadata {
    fn default() -> Self {
        Self {
            title: UNKNOWN_TITLE.to_owned(),
            author: UNKNOWN_AUTHOR.to_owned(),
            category: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterResult {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub description: String,
}

impl ChapterResult {
    pub fn paragraphs(&self) -> impl Iterator<Item = &str> {
        self.body
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlResult {
    pub start: Location,
    pub metadata: StoryMetadata,
    pub chapters: Vec<ChapterResult>,
}

impl CrawlResult {
    pub fn chapter_heading(index: usize, title: &str) -> String {
        format!("Chapter {index}: {title}")
    }

    /// All chapters as one text, each under a "Chapter N: Title" heading.
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for (idx, chapter) in self.chapters.iter().enumerate() {
            out.push_str("\n\n");
            out.push_str(&Self::chapter_heading(idx + 1, &chapter.title));
            out.push_str("\n\n");
            out.push_str(&chapter.body);
        }
        out
    }

    pub fn description(&self) -> Option<String> {
        describe_chapters(&self.chapters)
    }
}

/// "<chapter title>: <description>" for each chapter that has one.
pub fn describe_chapters(chapters: &[ChapterResult]) -> Option<String> {
    let parts = chapters
        .iter()
        .filter(|c| !c.description.trim().is_empty())
        .map(|c| format!("{}: {}", c.title, c.description.trim()))
        .collect::<Vec<_>>();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("\n"))
}
