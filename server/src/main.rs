use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use slideserve::{Config, SlideError, SlideInfo, SlideService};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// What the CLI prints for each slide
#[derive(Serialize)]
struct SlideReport<'a> {
    path: String,
    info: &'a SlideInfo,
    properties: indexmap::IndexMap<String, String>,
    thumbnail: (u32, u32),
    label: Option<(u32, u32)>,
    macro_image: Option<(u32, u32)>,
}

fn report(service: &SlideService, path: &Path, thumbnail_size: u32) -> anyhow::Result<String> {
    let info = service.info(path)?;
    let thumbnail = service.thumbnail(path, thumbnail_size)?;
    let label = service.label(path, None)?;
    let macro_image = service.macro_image(path, None)?;

    let report = SlideReport {
        path: path.display().to_string(),
        info: &info,
        properties: info.to_properties(),
        thumbnail: thumbnail.dimensions(),
        label: label.map(|l| l.dimensions()),
        macro_image: macro_image.map(|m| m.dimensions()),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Machine-readable kind of a per-slide failure
fn failure_code(error: &anyhow::Error) -> &'static str {
    error
        .downcast_ref::<SlideError>()
        .map(SlideError::code)
        .unwrap_or("internal")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slideserve=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration from environment
    let config = Config::from_env();
    info!(
        "Loaded configuration: slides_dir={:?}, idle_ttl={:?}, sweep_interval={:?}",
        config.slides_dir, config.cache.idle_ttl, config.cache.sweep_interval
    );
    if config.cache.suppress_labels {
        info!("Label images are suppressed");
    }

    let slides: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if slides.is_empty() {
        anyhow::bail!("usage: slideserve <slide>...");
    }

    let service = SlideService::new(&config);
    let sweeper = service.spawn_sweeper();

    let mut failures = 0;
    for path in &slides {
        let service = service.clone();
        let owned = path.clone();
        let thumbnail_size = config.thumbnail_size;
        let result = tokio::task::spawn_blocking(move || report(&service, &owned, thumbnail_size))
            .await
            .context("slide worker panicked")?;

        match result {
            Ok(json) => println!("{}", json),
            Err(e) => {
                warn!("Failed to read {:?} ({}): {:#}", path, failure_code(&e), e);
                failures += 1;
            }
        }
    }

    sweeper.abort();
    let released = service.shutdown();
    info!("Released {} slides", released.evicted);

    if failures > 0 {
        anyhow::bail!("{} of {} slides could not be read", failures, slides.len());
    }
    Ok(())
}
