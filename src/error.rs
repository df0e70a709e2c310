use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {location}: {source}")]
    Request {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {location}: unexpected status {status}")]
    Status {
        location: String,
        status: reqwest::StatusCode,
    },
}

/// A crawl either completes or fails as a whole; there is no partial result.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("network error while downloading chapter {chapter} at {location}")]
    Fetch {
        location: String,
        chapter: usize,
        #[source]
        source: FetchError,
    },
}

impl CrawlError {
    pub fn location(&self) -> &str {
        match self {
            Self::Fetch { location, .. } => location,
        }
    }

    pub fn chapter(&self) -> usize {
        match self {
            Self::Fetch { chapter, .. } => *chapter,
        }
    }
}

#[derive(Debug, Error)]
pub enum PackagingError {
    #[error("no valid chapters found")]
    NoChapters,

    #[error("write epub: {0}")]
    Io(#[from] std::io::Error),

    #[error("build epub archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("persist epub to {path}: {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("encode cover image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("write cover image: {0}")]
    Io(#[from] std::io::Error),
}
