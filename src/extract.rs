use std::collections::HashSet;
use std::path::Path;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::formats::{Location, PageMetadata, PageRecord};

pub const SERIES_INFO_LABEL: &str = "Series Info";
pub const NEXT_PART_LABEL: &str = "Next Part";

/// Turns one fetched document into a [`PageRecord`]. Absent fields come back
/// as `None`/empty; extraction itself never fails.
pub trait PageExtractor: Send + Sync {
    fn extract(&self, page: &Location, html: &[u8]) -> PageRecord;
}

/// CSS selectors describing where each field lives in the site's markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    pub title: String,
    pub author: String,
    pub category: String,
    /// Which match of `category` holds the category (the first is the site root).
    pub category_index: usize,
    pub tags: String,
    pub description: String,
    pub paragraphs: String,
    pub next_page: String,
    pub series_entry: String,
    pub series_label: String,
    pub series_link: String,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            title: "h1.headline".to_owned(),
            author: "a.y_eU".to_owned(),
            category: "#BreadCrumbComponent a.h_aZ".to_owned(),
            category_index: 1,
            tags: "a.av_as.av_r".to_owned(),
            description: [
                "html > body > div > div > div",
                "div:nth-of-type(3) > div:nth-of-type(5) > div:nth-of-type(1)",
                "div:nth-of-type(1) > div:nth-of-type(2) > div:nth-of-type(1)",
                "div:nth-of-type(2) > div > div:nth-of-type(1)",
                "div:nth-of-type(3) > span",
            ]
            .join(" > "),
            paragraphs: "div.aa_ht p".to_owned(),
            next_page: "a.l_bJ[title=\"Next Page\"]".to_owned(),
            series_entry: "div.panel.z_r.z_R div.z_S".to_owned(),
            series_label: "span.z_pm".to_owned(),
            series_link: "a.z_t".to_owned(),
        }
    }
}

impl SiteSelectors {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read selectors: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse selectors: {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SelectorExtractor {
    title: Selector,
    author: Selector,
    category: Selector,
    category_index: usize,
    tags: Selector,
    description: Selector,
    paragraphs: Selector,
    next_page: Selector,
    series_entry: Selector,
    series_label: Selector,
    series_link: Selector,
}

impl SelectorExtractor {
    pub fn new(selectors: &SiteSelectors) -> anyhow::Result<Self> {
        Ok(Self {
            title: compile("title", &selectors.title)?,
            author: compile("author", &selectors.author)?,
            category: compile("category", &selectors.category)?,
            category_index: selectors.category_index,
            tags: compile("tags", &selectors.tags)?,
            description: compile("description", &selectors.description)?,
            paragraphs: compile("paragraphs", &selectors.paragraphs)?,
            next_page: compile("next_page", &selectors.next_page)?,
            series_entry: compile("series_entry", &selectors.series_entry)?,
            series_label: compile("series_label", &selectors.series_label)?,
            series_link: compile("series_link", &selectors.series_link)?,
        })
    }

    fn metadata(&self, document: &Html) -> PageMetadata {
        let author = first_text(document, &self.author);

        let category = document
            .select(&self.category)
            .nth(self.category_index)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .map(|raw| normalize_category(&raw));

        let raw_tags = document
            .select(&self.tags)
            .map(element_text)
            .collect::<Vec<_>>();
        let tags = build_tag_list(category.as_deref(), raw_tags);

        PageMetadata {
            author,
            category,
            tags,
        }
    }

    fn series_links(&self, page: &Location, document: &Html) -> (Option<String>, Option<Location>) {
        let mut series_title = None;
        let mut next_chapter = None;

        for entry in document.select(&self.series_entry) {
            let label = entry.select(&self.series_label).next().map(element_text);
            let Some(link) = entry.select(&self.series_link).next() else {
                continue;
            };

            match label.as_deref() {
                Some(SERIES_INFO_LABEL) if series_title.is_none() => {
                    let title = element_text(link);
                    if !title.is_empty() {
                        series_title = Some(title);
                    }
                }
                Some(NEXT_PART_LABEL) if next_chapter.is_none() => {
                    next_chapter = resolve_href(page, link);
                }
                _ => {}
            }
        }

        (series_title, next_chapter)
    }
}

impl PageExtractor for SelectorExtractor {
    fn extract(&self, page: &Location, html: &[u8]) -> PageRecord {
        let html = String::from_utf8_lossy(html);
        let document = Html::parse_document(&html);

        let title = first_text(&document, &self.title);
        let metadata = self.metadata(&document);
        let description = document
            .select(&self.description)
            .next()
            .map(element_text);

        let paragraphs = document
            .select(&self.paragraphs)
            .map(element_text)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();

        let next_page = document
            .select(&self.next_page)
            .find_map(|link| resolve_href(page, link));

        let (series_title, next_chapter) = self.series_links(page, &document);

        PageRecord {
            title,
            metadata,
            description,
            paragraphs,
            next_page,
            next_chapter,
            series_title,
        }
    }
}

pub fn normalize_category(raw: &str) -> String {
    let raw = raw.trim();
    if starts_with_inc(raw) {
        return "I/T".to_owned();
    }
    raw.to_owned()
}

/// Drops "inc*" tags, removes duplicates, and puts the category first when
/// it is not already listed.
pub fn build_tag_list(category: Option<&str>, raw_tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags = raw_tags
        .into_iter()
        .map(|tag| tag.trim().to_owned())
        .filter(|tag| !tag.is_empty() && !starts_with_inc(tag))
        .filter(|tag| seen.insert(tag.clone()))
        .collect::<Vec<_>>();

    if let Some(category) = category
        && !tags.iter().any(|tag| tag == category)
    {
        tags.insert(0, category.to_owned());
    }
    tags
}

fn starts_with_inc(text: &str) -> bool {
    text.get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("inc"))
}

fn compile(field: &str, css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("invalid {field} selector {css:?}: {err}"))
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(element_text)
        .filter(|text| !text.is_empty())
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve_href(page: &Location, link: ElementRef<'_>) -> Option<Location> {
    let href = link.value().attr("href")?.trim();
    if href.is_empty() {
        return None;
    }
    match page.url().join(href) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Some(Location::new(&url)),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(page = %page, href, ?err, "unresolvable link");
            None
        }
    }
}
