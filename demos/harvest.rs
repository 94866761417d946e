//! Thin CLI wrapper around [`sitecrawl::Crawler`]. Exercises the library
//! surface a facade service would sit on top of: point it at a seed URL and
//! it prints every distinct image found, flagging the ones the logo
//! heuristic picked out.
//!
//! ```text
//! harvest <seed-url> [max-pages] [workers] [delay-ms]
//! ```

use std::env;

use sitecrawl::CrawlerBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let seed = match args.next() {
        Some(seed) => seed,
        None => {
            eprintln!("usage: harvest <seed-url> [max-pages] [workers] [delay-ms]");
            std::process::exit(2);
        }
    };
    let max_pages: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(50);
    let workers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);
    let delay_ms: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(250);

    let crawler = CrawlerBuilder::new()
        .with_max_pages(max_pages)
        .with_workers(workers)
        .with_delay_ms(delay_ms)
        .build()?;

    let report = crawler.crawl(&seed).await?;

    println!(
        "crawled {} page(s), found {} distinct image(s)",
        report.pages_processed,
        report.images.len()
    );
    for url in &report.images {
        let record = &report.metadata[url];
        let logo = if record.is_logo { " [logo]" } else { "" };
        println!(
            "{url}{logo} (page: {page}, alt: {alt:?}, {w}x{h})",
            url = url,
            logo = logo,
            page = record.page_of_first_discovery,
            alt = record.alt.as_deref().unwrap_or(""),
            w = record.width,
            h = record.height,
        );
    }

    Ok(())
}
