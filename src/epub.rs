use std::io::Write as _;
use std::path::Path;

use chrono::Utc;
use zip::write::SimpleFileOptions;

use crate::error::PackagingError;
use crate::formats::{ChapterResult, CrawlResult, StoryMetadata, describe_chapters};

pub const DEFAULT_PUBLISHER: &str = "Literotica";

#[derive(Debug, Clone)]
pub struct CreateEpubOptions {
    pub force: bool,
    /// BCP-47 language tag used for EPUB metadata and XHTML documents.
    pub lang: String,
    pub publisher: String,
}

impl Default for CreateEpubOptions {
    fn default() -> Self {
        Self {
            force: false,
            lang: "en".to_string(),
            publisher: DEFAULT_PUBLISHER.to_string(),
        }
    }
}

/// Everything that goes into one story's EPUB. Borrowed; packaging never
/// mutates the crawl result.
#[derive(Debug, Clone, Copy)]
pub struct StoryBook<'a> {
    pub metadata: &'a StoryMetadata,
    pub chapters: &'a [ChapterResult],
    pub introduction: Option<&'a str>,
    pub cover_jpeg: Option<&'a [u8]>,
}

impl<'a> StoryBook<'a> {
    pub fn from_crawl(result: &'a CrawlResult) -> Self {
        Self {
            metadata: &result.metadata,
            chapters: &result.chapters,
            introduction: None,
            cover_jpeg: None,
        }
    }

    pub fn with_introduction(self, introduction: Option<&'a str>) -> Self {
        Self {
            introduction,
            ..self
        }
    }

    pub fn with_cover(self, cover_jpeg: Option<&'a [u8]>) -> Self {
        Self { cover_jpeg, ..self }
    }

    pub fn description(&self) -> Option<String> {
        describe_chapters(self.chapters)
    }
}

#[derive(Debug)]
struct BookDocument {
    stem: String,
    title: String,
    body_html: String,
    in_toc: bool,
}

pub fn create_story_epub(
    book: &StoryBook<'_>,
    out_path: &Path,
    options: &CreateEpubOptions,
) -> Result<(), PackagingError> {
    let documents = build_documents(book);
    if !documents.iter().any(|doc| doc.in_toc && doc.stem != "metadata") {
        return Err(PackagingError::NoChapters);
    }

    if out_path.exists() && !options.force {
        return Err(PackagingError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("epub output already exists: {}", out_path.display()),
        )));
    }
    let parent = match out_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let lang = options.lang.trim();
    let lang = if lang.is_empty() { "und" } else { lang };
    let title = book.metadata.title.as_str();
    let uuid = uuid::Uuid::new_v4();
    let modified = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let container_xml = render_container_xml();
    let css = default_style_css();
    let nav_xhtml = render_nav_xhtml(title, lang, &documents);
    let toc_ncx = render_toc_ncx(title, uuid, &documents);
    let content_opf = render_content_opf(
        book,
        &OpfMeta {
            lang,
            uuid,
            modified: &modified,
            publisher: &options.publisher,
        },
        &documents,
    );

    // Written next to the destination and renamed into place, so a failure
    // never leaves a partial EPUB behind.
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    {
        let mut zip = zip::ZipWriter::new(tmp.as_file_mut());

        // Per EPUB spec, `mimetype` MUST be the first entry and MUST be stored (no compression).
        let mimetype_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip.start_file("mimetype", mimetype_options)?;
        zip.write_all(b"application/epub+zip")?;

        let deflated_options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        zip.start_file("META-INF/container.xml", deflated_options)?;
        zip.write_all(container_xml.as_bytes())?;

        zip.start_file("OEBPS/content.opf", deflated_options)?;
        zip.write_all(content_opf.as_bytes())?;

        zip.start_file("OEBPS/nav.xhtml", deflated_options)?;
        zip.write_all(nav_xhtml.as_bytes())?;

        zip.start_file("OEBPS/toc.ncx", deflated_options)?;
        zip.write_all(toc_ncx.as_bytes())?;

        zip.start_file("OEBPS/style.css", deflated_options)?;
        zip.write_all(css.as_bytes())?;

        if let Some(cover) = book.cover_jpeg {
            let stored = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored)
                .unix_permissions(0o644);
            zip.start_file("OEBPS/cover.jpg", stored)?;
            zip.write_all(cover)?;
        }

        for doc in &documents {
            let xhtml = wrap_xhtml_document(&doc.title, lang, &doc.body_html);
            zip.start_file(format!("OEBPS/{}.xhtml", doc.stem), deflated_options)?;
            zip.write_all(xhtml.as_bytes())?;
        }

        zip.finish()?;
    }

    let persisted = if options.force {
        tmp.persist(out_path)
    } else {
        tmp.persist_noclobber(out_path)
    };
    persisted.map_err(|err| PackagingError::Persist {
        path: out_path.display().to_string(),
        source: err.error,
    })?;

    Ok(())
}

fn build_documents(book: &StoryBook<'_>) -> Vec<BookDocument> {
    let mut documents = Vec::new();

    if book.cover_jpeg.is_some() {
        documents.push(BookDocument {
            stem: "cover".to_string(),
            title: "Cover".to_string(),
            body_html: "<div class=\"cover\"><img src=\"cover.jpg\" alt=\"Cover\" /></div>\n"
                .to_string(),
            in_toc: false,
        });
    }

    let metadata = book.metadata;
    if metadata.category.is_some() || !metadata.tags.is_empty() {
        documents.push(BookDocument {
            stem: "metadata".to_string(),
            title: "Story Information".to_string(),
            body_html: render_metadata_html(metadata.category.as_deref(), &metadata.tags),
            in_toc: true,
        });
    }

    if let Some(intro) = book.introduction
        && !intro.trim().is_empty()
    {
        documents.push(BookDocument {
            stem: "intro".to_string(),
            title: "Introduction".to_string(),
            body_html: format!("<h1>Introduction</h1>\n{}", paragraphs_html(intro.split("\n\n"))),
            in_toc: true,
        });
    }

    for (idx, chapter) in book.chapters.iter().enumerate() {
        let heading = CrawlResult::chapter_heading(idx + 1, &chapter.title);
        documents.push(BookDocument {
            stem: format!("chapter_{}", idx + 1),
            body_html: format!(
                "<h1>{}</h1>\n{}",
                xml_escape(&heading),
                paragraphs_html(chapter.paragraphs())
            ),
            title: heading,
            in_toc: true,
        });
    }

    documents
}

fn paragraphs_html<'a>(paragraphs: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for paragraph in paragraphs {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        out.push_str(&format!("<p>{}</p>\n", xml_escape(paragraph)));
    }
    out
}

fn render_metadata_html(category: Option<&str>, tags: &[String]) -> String {
    let mut out = String::from("<h1>Story Information</h1>\n<div class=\"metadata\">\n");
    if let Some(category) = category {
        out.push_str(&format!(
            "  <div class=\"metadata-item\"><span class=\"metadata-label\">Category: </span>{}</div>\n",
            xml_escape(category)
        ));
    }
    if !tags.is_empty() {
        out.push_str(&format!(
            "  <div class=\"metadata-item\"><span class=\"metadata-label\">Tags: </span>{}</div>\n",
            xml_escape(&tags.join(", "))
        ));
    }
    out.push_str("</div>\n");
    out
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> String {
    r#"@charset "utf-8";

html { font-family: serif; }
body { margin: 1em; padding: 0 1em; }
p { margin: 1.5em 0; line-height: 1.7; font-size: 1.1em; }
h1 { margin: 2em 0 1em 0; text-align: center; }
.metadata { margin: 1.5em 0; line-height: 1.7; font-size: 1.1em; }
.metadata-item { margin: 1em 0; }
.metadata-label { font-weight: bold; margin-right: 0.5em; }
.cover { text-align: center; }
.cover img { max-width: 100%; height: auto; }
"#
    .to_string()
}

fn render_nav_xhtml(title: &str, lang: &str, documents: &[BookDocument]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for doc in documents.iter().filter(|d| d.in_toc) {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a></li>\n",
            xml_escape(&doc.stem),
            xml_escape(&doc.title)
        ));
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, documents: &[BookDocument]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{}\" />\n",
        xml_escape(&uuid.to_string())
    ));
    out.push_str("    <meta name=\"dtb:depth\" content=\"1\" />\n");
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");
    for (idx, doc) in documents.iter().filter(|d| d.in_toc).enumerate() {
        let play = idx + 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{}\" playOrder=\"{}\">\n",
            play, play
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&doc.title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(&doc.stem)
        ));
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

struct OpfMeta<'a> {
    lang: &'a str,
    uuid: uuid::Uuid,
    modified: &'a str,
    publisher: &'a str,
}

fn render_content_opf(
    book: &StoryBook<'_>,
    meta: &OpfMeta<'_>,
    documents: &[BookDocument],
) -> String {
    let metadata = book.metadata;
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(meta.lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{}</dc:identifier>\n",
        xml_escape(&meta.uuid.to_string())
    ));
    out.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        xml_escape(&metadata.title)
    ));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(meta.lang)
    ));
    out.push_str(&format!(
        "    <dc:creator id=\"creator\">{}</dc:creator>\n",
        xml_escape(&metadata.author)
    ));
    if !meta.publisher.trim().is_empty() {
        out.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            xml_escape(meta.publisher)
        ));
    }
    for subject in subjects(metadata) {
        out.push_str(&format!("    <dc:subject>{}</dc:subject>\n", xml_escape(subject)));
    }
    if let Some(description) = book.description() {
        out.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(&description)
        ));
    }
    if book.cover_jpeg.is_some() {
        out.push_str("    <meta name=\"cover\" content=\"cover-image\" />\n");
    }
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(meta.modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    if book.cover_jpeg.is_some() {
        out.push_str(
            "    <item id=\"cover-image\" href=\"cover.jpg\" media-type=\"image/jpeg\" properties=\"cover-image\" />\n",
        );
    }

    for doc in documents {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&doc.stem),
            xml_escape(&doc.stem)
        ));
    }

    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    let (covers, rest): (Vec<_>, Vec<_>) = documents.iter().partition(|d| d.stem == "cover");
    for doc in covers {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" linear=\"no\" />\n",
            xml_escape(&doc.stem)
        ));
    }
    out.push_str("    <itemref idref=\"nav\" />\n");
    for doc in rest {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&doc.stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

/// Category first, then tags, without repeats.
fn subjects(metadata: &StoryMetadata) -> Vec<&str> {
    let mut out: Vec<&str> = Vec::new();
    for subject in metadata
        .category
        .iter()
        .chain(metadata.tags.iter())
        .map(String::as_str)
    {
        if !out.contains(&subject) {
            out.push(subject);
        }
    }
    out
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
