//! Thread-safe slide handle cache with idle eviction
//!
//! Opening a whole-slide file is expensive, so each file gets at most one
//! decoder handle which is shared by every request for it. Handles are
//! released when nobody has touched them for `idle_ttl`.
//!
//! Callers borrow a slide through a [`SlideRef`] lease. Leases are only
//! created while the registry shard holding the slide is locked and cannot be
//! cloned, so a reference count of one under that lock proves no request is
//! using the slide. The sweep relies on this to never dispose a handle in the
//! middle of a decode call.

use std::ops::Deref;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

use super::decoder::PyramidFormat;
use super::openslide::OpenSlideFormat;
use super::resource::{ResourceOptions, SlideResource};
use super::types::SlideError;

/// Callback run after every sweep
pub type ReleaseHook = Box<dyn Fn(&SweepReport) + Send + Sync>;

/// Outcome of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Slides disposed during this pass
    pub evicted: usize,
    /// Idle slides kept because a request still holds them
    pub in_use: usize,
    /// Slides left in the cache
    pub remaining: usize,
}

/// Borrowed access to a cached slide for the duration of one operation
pub struct SlideRef(Arc<SlideResource>);

impl Deref for SlideRef {
    type Target = SlideResource;

    fn deref(&self) -> &SlideResource {
        &self.0
    }
}

/// Registry of open slides keyed by normalized path
pub struct SlideCache {
    slides: DashMap<String, Arc<SlideResource>>,
    pyramid: Arc<dyn PyramidFormat>,
    options: ResourceOptions,
    idle_ttl: Duration,
    sweep_interval: Duration,
    release_hook: Option<ReleaseHook>,
    /// Set by `shutdown`; checked under the entry lock in `get`
    closed: AtomicBool,
}

impl SlideCache {
    /// Create a cache that opens pyramids with OpenSlide
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_format(config, Arc::new(OpenSlideFormat))
    }

    /// Create a cache with a custom pyramid backend
    pub fn with_format(config: &CacheConfig, pyramid: Arc<dyn PyramidFormat>) -> Self {
        Self {
            slides: DashMap::new(),
            pyramid,
            options: ResourceOptions {
                suppress_labels: config.suppress_labels,
                placeholder_labels: config.placeholder_labels,
            },
            idle_ttl: config.idle_ttl,
            sweep_interval: config.sweep_interval,
            release_hook: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Run `hook` after every sweep
    pub fn with_release_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SweepReport) + Send + Sync + 'static,
    {
        self.release_hook = Some(Box::new(hook));
        self
    }

    /// Get the slide at `path`, opening it on first access.
    ///
    /// The open happens under the registry entry lock, so concurrent first
    /// requests for the same file share a single decoder handle. Failed opens
    /// leave nothing behind. Fails with [`SlideError::ShutDown`] once
    /// [`shutdown`](Self::shutdown) has started.
    pub fn get(&self, path: &Path) -> Result<SlideRef, SlideError> {
        let key = normalize_key(path);

        let entry = self.slides.entry(key);
        if self.closed.load(Ordering::SeqCst) {
            return Err(SlideError::ShutDown);
        }

        match entry {
            Entry::Occupied(entry) => {
                let slide = entry.get();
                slide.touch();
                counter!("slideserve_slide_cache_hits_total").increment(1);
                Ok(SlideRef(Arc::clone(slide)))
            }
            Entry::Vacant(entry) => {
                counter!("slideserve_slide_cache_misses_total").increment(1);
                let slide_path = PathBuf::from(entry.key());
                let slide = SlideResource::open(
                    entry.key(),
                    &slide_path,
                    self.pyramid.as_ref(),
                    self.options,
                )?;
                debug!(
                    "Opened slide {} as {:?}",
                    slide.key(),
                    slide.variant()
                );
                slide.touch();
                counter!("slideserve_slides_opened_total").increment(1);

                let slide = Arc::new(slide);
                entry.insert(Arc::clone(&slide));
                gauge!("slideserve_slides_cached").increment(1.0);
                Ok(SlideRef(slide))
            }
        }
    }

    /// Whether a slide is currently cached
    pub fn contains(&self, path: &Path) -> bool {
        self.slides.contains_key(&normalize_key(path))
    }

    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    /// Cached keys, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.slides.iter().map(|e| e.key().clone()).collect()
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Dispose every slide idle for longer than the TTL
    pub fn sweep(&self) -> SweepReport {
        let mut expired = Vec::new();
        let mut in_use = 0;

        self.slides.retain(|key, slide| {
            if slide.idle_for() <= self.idle_ttl {
                return true;
            }
            if Arc::strong_count(slide) > 1 {
                debug!("Slide {} is idle but still in use, keeping it", key);
                in_use += 1;
                return true;
            }
            expired.push(Arc::clone(slide));
            false
        });

        let evicted = expired.len();
        for slide in expired {
            release(slide);
        }

        let report = SweepReport {
            evicted,
            in_use,
            remaining: self.slides.len(),
        };
        self.finish_release_pass(&report);
        report
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Dispose every slide regardless of age and refuse further opens.
    ///
    /// Slides still leased are disposed when their last lease drops; no new
    /// handle can be opened for them in the meantime.
    pub fn shutdown(&self) -> SweepReport {
        self.closed.store(true, Ordering::SeqCst);

        // Shard by shard, so a `get` that saw the flag clear still inserts
        // before its shard is emptied
        let mut removed = Vec::new();
        self.slides.retain(|_, slide| {
            removed.push(Arc::clone(slide));
            false
        });

        let mut report = SweepReport::default();
        for slide in removed {
            // One count held by `removed`
            if Arc::strong_count(&slide) > 1 {
                report.in_use += 1;
            }
            report.evicted += 1;
            release(slide);
        }

        report.remaining = self.slides.len();
        info!("Slide cache shut down, released {} slides", report.evicted);
        self.finish_release_pass(&report);
        report
    }

    fn finish_release_pass(&self, report: &SweepReport) {
        counter!("slideserve_slide_cache_sweeps_total").increment(1);
        counter!("slideserve_slides_evicted_total").increment(report.evicted as u64);
        counter!("slideserve_slides_in_use_skipped_total").increment(report.in_use as u64);
        gauge!("slideserve_slides_cached").set(report.remaining as f64);

        if report.evicted > 0 {
            info!(
                "Released {} idle slides ({} in use, {} cached)",
                report.evicted, report.in_use, report.remaining
            );
        }
        if let Some(hook) = &self.release_hook {
            hook(report);
        }
    }
}

/// Run [`SlideCache::sweep`] every `sweep_interval` until the cache is dropped
pub fn spawn_sweeper(cache: &Arc<SlideCache>) -> JoinHandle<()> {
    let weak: Weak<SlideCache> = Arc::downgrade(cache);
    let period = cache.sweep_interval().max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(cache) = weak.upgrade() else {
                debug!("Slide cache dropped, stopping sweeper");
                break;
            };
            if let Err(e) = tokio::task::spawn_blocking(move || cache.sweep()).await {
                warn!("Slide cache sweep panicked: {}", e);
            }
        }
    })
}

/// Dispose a slide now, or when its last lease ends
fn release(slide: Arc<SlideResource>) {
    match Arc::try_unwrap(slide) {
        Ok(slide) => slide.dispose(),
        Err(slide) => {
            debug!(
                "Slide {} still leased, disposing when the lease ends",
                slide.key()
            );
        }
    }
}

/// Lexically normalize a path into a cache key.
///
/// `.` components are dropped and `..` pops a preceding normal component.
/// No file-system access is involved.
pub fn normalize_key(path: &Path) -> String {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    let normalized: PathBuf = parts.iter().collect();
    normalized.to_string_lossy().into_owned()
}
