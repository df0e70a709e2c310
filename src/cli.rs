use clap::{Args, Parser, Subcommand};

use crate::crawl::DEFAULT_DELAY_MS;
use crate::epub::DEFAULT_PUBLISHER;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Crawl a story and package it as an EPUB with a generated cover.
    Build(BuildArgs),
    /// Crawl a story and write the result as JSON.
    Crawl(CrawlArgs),
    /// Package a previously written crawl result as an EPUB.
    Package(PackageArgs),
    /// Render a cover image only.
    Cover(CoverArgs),
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// First page of the story (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Output path for the crawl result JSON.
    #[arg(long)]
    pub out: String,

    /// Delay before each request after the first (politeness).
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    pub delay_ms: u64,

    /// JSON file overriding the site selectors.
    #[arg(long)]
    pub selectors: Option<String>,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// First page of the story (must be http/https).
    #[arg(long)]
    pub url: String,

    /// Output root; the EPUB lands in <out>/<author>/<title>.epub.
    #[arg(long)]
    pub out: String,

    /// Use this JPEG as the cover instead of rendering one.
    #[arg(long)]
    pub cover: Option<String>,

    /// TrueType font for the rendered cover.
    #[arg(long)]
    pub font: Option<String>,

    /// Text file placed before the first chapter.
    #[arg(long)]
    pub intro: Option<String>,

    /// Publisher recorded in the EPUB metadata.
    #[arg(long, default_value = DEFAULT_PUBLISHER)]
    pub publisher: String,

    /// Delay before each request after the first (politeness).
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    pub delay_ms: u64,

    /// JSON file overriding the site selectors.
    #[arg(long)]
    pub selectors: Option<String>,

    /// Overwrite an existing EPUB.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct PackageArgs {
    /// Crawl result JSON written by `crawl`.
    #[arg(long)]
    pub crawl: String,

    /// Output root; the EPUB lands in <out>/<author>/<title>.epub.
    #[arg(long)]
    pub out: String,

    /// Use this JPEG as the cover instead of rendering one.
    #[arg(long)]
    pub cover: Option<String>,

    /// TrueType font for the rendered cover.
    #[arg(long)]
    pub font: Option<String>,

    /// Text file placed before the first chapter.
    #[arg(long)]
    pub intro: Option<String>,

    /// Publisher recorded in the EPUB metadata.
    #[arg(long, default_value = DEFAULT_PUBLISHER)]
    pub publisher: String,

    /// Overwrite an existing EPUB.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct CoverArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub author: String,

    /// Output path for the JPEG.
    #[arg(long)]
    pub out: String,

    /// TrueType font; falls back to a built-in bitmap font.
    #[arg(long)]
    pub font: Option<String>,
}
