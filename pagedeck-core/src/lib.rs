use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{instrument, warn};
use uuid::Uuid;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f1a6bd4-2e8c-5d07-9b3e-61c2a4f8d905").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([255, 255, 255, 255]);
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Width in pixels the page is rasterized to; height follows the page aspect ratio.
    pub target_width: u32,
    pub format: ImageFormat,
    pub background: Rgba,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            target_width: 260,
            format: ImageFormat::Png,
            background: Rgba::WHITE,
        }
    }
}

/// An encoded page bitmap. Bytes are in `format` encoding, not raw pixels.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub page_count: usize,
    pub label: String,
}

#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub path: PathBuf,
    pub password: Option<String>,
}

impl OpenRequest {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            password: None,
        }
    }
}

/// An opened page. Callers must `close` the handle once done; the cache does
/// this even when rendering fails.
#[async_trait::async_trait]
pub trait PageHandle: Send {
    fn size(&self) -> PageSize;
    async fn render(&self, options: &RenderOptions) -> Result<PageImage>;
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Page indices are zero-based throughout this workspace; backends that speak
/// one-based page numbers convert at their own boundary.
#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    async fn open_page(&self, page_index: usize) -> Result<Box<dyn PageHandle>>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, request: &OpenRequest) -> Result<Arc<dyn PageRenderer>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Loading,
    Success,
    Error,
}

pub const DEFAULT_SLOT_WIDTH: f32 = 130.0;

/// Number of thumbnail slots that fit the viewport: `round(width / slot)`,
/// clamped to `[0, page_count]`.
pub fn thumbnail_count(page_count: usize, viewport_width: f32, slot_width: f32) -> usize {
    if page_count == 0 || slot_width <= 0.0 {
        return 0;
    }
    let desired = (viewport_width / slot_width).round();
    if !desired.is_finite() || desired <= 0.0 {
        return 0;
    }
    (desired as usize).min(page_count)
}

/// Fractional page positions for each thumbnail slot, evenly spaced from the
/// first page to the last. A single slot points at the first page.
pub fn thumbnail_points(page_count: usize, count: usize) -> Vec<f32> {
    if count == 0 || page_count == 0 {
        return Vec::new();
    }
    if count == 1 || page_count == 1 {
        return vec![0.0];
    }
    let span = (page_count - 1) as f32;
    let last = (count - 1) as f32;
    (0..count)
        .map(|i| (i as f32 / last) * span)
        .collect()
}

/// Converts a thumbnail point to a page index by truncation.
pub fn page_for_point(point: f32) -> usize {
    if !point.is_finite() || point <= 0.0 {
        return 0;
    }
    point as usize
}

/// Coalesces rapid calls into a single delayed execution. Each `run` restarts
/// the quiet period and drops the previously scheduled callback. Must be used
/// from within a tokio runtime.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn run<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    pub fn cancel_pending(&self) {
        if let Some(task) = self.pending.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

/// Lazy per-document bitmap cache keyed by page index.
///
/// The entry map lock is held across the whole fetch, so fetches are
/// serialized per cache instance and concurrent requests for the same page
/// collapse into one rasterization. A failed fetch stores nothing.
pub struct PageImageCache {
    renderer: Arc<dyn PageRenderer>,
    options: RenderOptions,
    entries: tokio::sync::Mutex<HashMap<usize, Arc<PageImage>>>,
}

impl PageImageCache {
    pub fn new(renderer: Arc<dyn PageRenderer>, options: RenderOptions) -> Self {
        Self {
            renderer,
            options,
            entries: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        self.options
    }

    #[instrument(skip(self))]
    pub async fn image(&self, page_index: usize) -> Result<Arc<PageImage>> {
        let page_count = self.renderer.info().page_count;
        if page_index >= page_count {
            return Err(anyhow!(
                "page {} out of range (document has {} pages)",
                page_index,
                page_count
            ));
        }

        let mut entries = self.entries.lock().await;
        if let Some(image) = entries.get(&page_index) {
            return Ok(Arc::clone(image));
        }
        let image = Arc::new(self.fetch(page_index).await?);
        entries.insert(page_index, Arc::clone(&image));
        Ok(image)
    }

    async fn fetch(&self, page_index: usize) -> Result<PageImage> {
        let page = self
            .renderer
            .open_page(page_index)
            .await
            .with_context(|| format!("failed to open page {}", page_index))?;
        let rendered = page.render(&self.options).await;
        if let Err(err) = page.close().await {
            warn!(?err, page = page_index, "failed to release page resource");
        }
        rendered.with_context(|| format!("failed to render page {}", page_index))
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn contains(&self, page_index: usize) -> bool {
        self.entries.lock().await.contains_key(&page_index)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

/// Rotation is elapsed time modulo the period, expressed in turns `[0, 1)`.
pub fn spin_fraction(elapsed: Duration, period: Duration) -> f32 {
    if period.is_zero() {
        return 0.0;
    }
    let period = period.as_secs_f64();
    ((elapsed.as_secs_f64() % period) / period) as f32
}

#[derive(Debug)]
pub struct LoadingSpinner {
    period: Duration,
    started_at: Option<Instant>,
}

impl LoadingSpinner {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            started_at: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn stop(&mut self) {
        self.started_at = None;
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn turns(&self, now: Instant) -> f32 {
        match self.started_at {
            Some(started) => spin_fraction(now.duration_since(started), self.period),
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrollPhysics {
    #[default]
    Platform,
    Bouncing,
    Clamping,
}

/// Presentation options passed through to the hosting layer untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SliderOptions {
    pub reverse: bool,
    pub snap: bool,
    pub physics: ScrollPhysics,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub target_width: u32,
    pub format: ImageFormat,
    pub background: Rgba,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_width: 260,
            format: ImageFormat::Png,
            background: Rgba::WHITE,
        }
    }
}

impl RenderConfig {
    pub fn options(&self) -> RenderOptions {
        RenderOptions {
            target_width: self.target_width,
            format: self.format,
            background: self.background,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub resize_debounce_ms: u64,
    pub drag_debounce_ms: u64,
    pub thumbnail_slot_width: f32,
    pub spinner_period_ms: u64,
    pub render: RenderConfig,
    pub slider: SliderOptions,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: 500,
            drag_debounce_ms: 100,
            thumbnail_slot_width: DEFAULT_SLOT_WIDTH,
            spinner_period_ms: 1200,
            render: RenderConfig::default(),
            slider: SliderOptions::default(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        toml::from_str(&raw).with_context(|| format!("failed to decode config file {:?}", path))
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn drag_debounce(&self) -> Duration {
        Duration::from_millis(self.drag_debounce_ms)
    }

    pub fn spinner_period(&self) -> Duration {
        Duration::from_millis(self.spinner_period_ms)
    }
}

pub type PageChangedCallback = Box<dyn Fn(usize) + Send + Sync>;
pub type DocumentLoadedCallback = Box<dyn Fn(&DocumentInfo) + Send + Sync>;
pub type DocumentErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct SliderCallbacks {
    pub on_page_changed: Option<PageChangedCallback>,
    pub on_document_loaded: Option<DocumentLoadedCallback>,
    pub on_document_error: Option<DocumentErrorCallback>,
}

#[derive(Debug, Default)]
struct SliderState {
    phase: LoadPhase,
    viewport_width: f32,
    points: Vec<f32>,
    current_page: usize,
    dragging: bool,
    thumb_image: Option<Arc<PageImage>>,
    last_error: Option<String>,
}

struct SliderInner {
    renderer: Arc<dyn PageRenderer>,
    cache: Arc<PageImageCache>,
    callbacks: SliderCallbacks,
    config: ViewerConfig,
    resize_debounce: Debouncer,
    drag_debounce: Debouncer,
    state: Mutex<SliderState>,
    spinner: Mutex<LoadingSpinner>,
}

impl SliderInner {
    fn recompute_points(&self, viewport_width: f32) {
        let page_count = self.renderer.info().page_count;
        let count = thumbnail_count(page_count, viewport_width, self.config.thumbnail_slot_width);
        let mut state = self.state.lock();
        state.points = thumbnail_points(page_count, count);
    }

    /// The displayed thumb only updates when the fetched page is still the
    /// drag target; the cache keeps the bitmap either way.
    async fn fetch_thumb(&self, page_index: usize) -> Result<()> {
        let image = self.cache.image(page_index).await?;
        let mut state = self.state.lock();
        if state.current_page == page_index {
            state.thumb_image = Some(image);
        }
        Ok(())
    }
}

/// Coordinates the thumbnail strip and the page slider: owns the shared page
/// image cache, the resize/drag debouncers, drag state, and the loading
/// spinner. Observes the document loading signal; it does not own it.
pub struct PageSlider {
    inner: Arc<SliderInner>,
}

impl PageSlider {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        config: ViewerConfig,
        callbacks: SliderCallbacks,
    ) -> Self {
        let cache = Arc::new(PageImageCache::new(
            Arc::clone(&renderer),
            config.render.options(),
        ));
        let inner = Arc::new(SliderInner {
            renderer,
            cache,
            callbacks,
            resize_debounce: Debouncer::new(config.resize_debounce()),
            drag_debounce: Debouncer::new(config.drag_debounce()),
            state: Mutex::new(SliderState::default()),
            spinner: Mutex::new(LoadingSpinner::new(config.spinner_period())),
            config,
        });
        Self { inner }
    }

    pub fn info(&self) -> &DocumentInfo {
        self.inner.renderer.info()
    }

    pub fn cache(&self) -> Arc<PageImageCache> {
        Arc::clone(&self.inner.cache)
    }

    pub fn options(&self) -> SliderOptions {
        self.inner.config.slider
    }

    pub fn phase(&self) -> LoadPhase {
        self.inner.state.lock().phase
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn document_loading(&self) {
        self.inner.state.lock().phase = LoadPhase::Loading;
        self.inner.spinner.lock().start(Instant::now());
    }

    /// Transition into `success`: drops every cached bitmap, recomputes the
    /// thumbnail points for the current viewport, and fetches the thumb for
    /// the initial page.
    pub async fn document_loaded(&self) {
        self.inner.cache.clear().await;
        let viewport_width = {
            let mut state = self.inner.state.lock();
            state.phase = LoadPhase::Success;
            state.current_page = 0;
            state.dragging = false;
            state.thumb_image = None;
            state.last_error = None;
            state.viewport_width
        };
        self.inner.recompute_points(viewport_width);
        self.inner.spinner.lock().stop();
        if let Some(on_loaded) = &self.inner.callbacks.on_document_loaded {
            on_loaded(self.inner.renderer.info());
        }
        if let Err(err) = self.inner.fetch_thumb(0).await {
            warn!(?err, "failed to fetch initial slider thumbnail");
        }
    }

    pub fn document_failed(&self, message: &str) {
        {
            let mut state = self.inner.state.lock();
            state.phase = LoadPhase::Error;
            state.last_error = Some(message.to_owned());
        }
        self.inner.spinner.lock().stop();
        if let Some(on_error) = &self.inner.callbacks.on_document_error {
            on_error(message);
        }
    }

    /// Records the new width immediately; recomputing the thumbnail points
    /// waits for a quiet period.
    pub fn viewport_resized(&self, width: f32) {
        self.inner.state.lock().viewport_width = width;
        let inner = Arc::clone(&self.inner);
        self.inner
            .resize_debounce
            .run(move || inner.recompute_points(width));
    }

    pub fn drag_started(&self) {
        self.inner.state.lock().dragging = true;
    }

    /// Updates the target page and clears the displayed thumb right away for
    /// responsive feedback; the bitmap fetch itself is debounced.
    pub fn drag_moved(&self, page_index: usize) {
        let page_count = self.inner.renderer.info().page_count;
        let target = page_index.min(page_count.saturating_sub(1));
        {
            let mut state = self.inner.state.lock();
            state.dragging = true;
            state.current_page = target;
            state.thumb_image = None;
        }
        let inner = Arc::clone(&self.inner);
        self.inner.drag_debounce.run(move || {
            tokio::spawn(async move {
                if let Err(err) = inner.fetch_thumb(target).await {
                    warn!(?err, page = target, "failed to fetch slider thumbnail");
                }
            });
        });
    }

    /// Commits navigation to the dragged-to page. Fires the page-change
    /// callback exactly once per drag.
    pub fn drag_ended(&self) {
        let page = {
            let mut state = self.inner.state.lock();
            if !state.dragging {
                return;
            }
            state.dragging = false;
            state.current_page
        };
        if let Some(on_page_changed) = &self.inner.callbacks.on_page_changed {
            on_page_changed(page);
        }
    }

    /// Direct navigation from a thumbnail cell tap.
    pub fn select_page(&self, page_index: usize) {
        let page_count = self.inner.renderer.info().page_count;
        let target = page_index.min(page_count.saturating_sub(1));
        {
            let mut state = self.inner.state.lock();
            state.current_page = target;
            state.thumb_image = None;
        }
        if let Some(on_page_changed) = &self.inner.callbacks.on_page_changed {
            on_page_changed(target);
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(err) = inner.fetch_thumb(target).await {
                warn!(?err, page = target, "failed to fetch slider thumbnail");
            }
        });
    }

    pub fn is_dragging(&self) -> bool {
        self.inner.state.lock().dragging
    }

    pub fn current_page(&self) -> usize {
        self.inner.state.lock().current_page
    }

    pub fn thumb_image(&self) -> Option<Arc<PageImage>> {
        self.inner.state.lock().thumb_image.clone()
    }

    /// Single-page documents hide the navigation controls.
    pub fn slider_visible(&self) -> bool {
        self.inner.renderer.info().page_count > 1
    }

    pub fn thumbnail_points(&self) -> Vec<f32> {
        self.inner.state.lock().points.clone()
    }

    pub fn thumbnail_pages(&self) -> Vec<usize> {
        self.inner
            .state
            .lock()
            .points
            .iter()
            .map(|point| page_for_point(*point))
            .collect()
    }

    /// Lazy fetch for a thumbnail cell. Every bitmap, including cell-triggered
    /// loads, goes through the cache's guarded fetch path.
    pub async fn thumbnail_image(&self, page_index: usize) -> Result<Arc<PageImage>> {
        self.inner.cache.image(page_index).await
    }

    pub fn spinner_running(&self) -> bool {
        self.inner.spinner.lock().is_running()
    }

    pub fn spinner_turns(&self, now: Instant) -> f32 {
        self.inner.spinner.lock().turns(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakePage {
        index: usize,
        renders: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl PageHandle for FakePage {
        fn size(&self) -> PageSize {
            PageSize {
                width: 612.0,
                height: 792.0,
            }
        }

        async fn render(&self, options: &RenderOptions) -> Result<PageImage> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("render failed");
            }
            Ok(PageImage {
                width: options.target_width,
                height: options.target_width,
                format: options.format,
                bytes: vec![self.index as u8],
            })
        }

        async fn close(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct FakeRenderer {
        info: DocumentInfo,
        renders: Arc<AtomicUsize>,
        fail_pages: Vec<usize>,
    }

    impl FakeRenderer {
        fn new(page_count: usize) -> Self {
            Self {
                info: DocumentInfo {
                    id: document_id_for_path(Path::new("/tmp/example.pdf")),
                    page_count,
                    label: "example.pdf".to_owned(),
                },
                renders: Arc::new(AtomicUsize::new(0)),
                fail_pages: Vec::new(),
            }
        }

        fn failing_on(page_count: usize, fail_pages: Vec<usize>) -> Self {
            let mut renderer = Self::new(page_count);
            renderer.fail_pages = fail_pages;
            renderer
        }

        fn render_count(&self) -> usize {
            self.renders.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PageRenderer for FakeRenderer {
        fn info(&self) -> &DocumentInfo {
            &self.info
        }

        async fn open_page(&self, page_index: usize) -> Result<Box<dyn PageHandle>> {
            Ok(Box::new(FakePage {
                index: page_index,
                renders: Arc::clone(&self.renders),
                fail: self.fail_pages.contains(&page_index),
            }))
        }
    }

    fn slider_with_callbacks(
        renderer: Arc<FakeRenderer>,
        pages_seen: Arc<Mutex<Vec<usize>>>,
    ) -> PageSlider {
        let callbacks = SliderCallbacks {
            on_page_changed: Some(Box::new(move |page| {
                pages_seen.lock().push(page);
            })),
            ..Default::default()
        };
        PageSlider::new(renderer, ViewerConfig::default(), callbacks)
    }

    #[test]
    fn thumbnail_count_follows_clamp_law() {
        assert_eq!(thumbnail_count(10, 650.0, DEFAULT_SLOT_WIDTH), 5);
        assert_eq!(thumbnail_count(3, 650.0, DEFAULT_SLOT_WIDTH), 3);
        assert_eq!(thumbnail_count(10, 0.0, DEFAULT_SLOT_WIDTH), 0);
        assert_eq!(thumbnail_count(10, 64.0, DEFAULT_SLOT_WIDTH), 0);
        assert_eq!(thumbnail_count(10, 65.0, DEFAULT_SLOT_WIDTH), 1);
        assert_eq!(thumbnail_count(0, 650.0, DEFAULT_SLOT_WIDTH), 0);
    }

    #[test]
    fn thumbnail_points_scenario_ten_pages_five_slots() {
        let points = thumbnail_points(10, 5);
        assert_eq!(points, vec![0.0, 2.25, 4.5, 6.75, 9.0]);
    }

    #[test]
    fn thumbnail_points_span_full_range_and_increase() {
        for page_count in 2..40 {
            for count in 2..=page_count {
                let points = thumbnail_points(page_count, count);
                assert_eq!(points.len(), count);
                assert_eq!(points[0], 0.0);
                assert_eq!(points[count - 1], (page_count - 1) as f32);
                for pair in points.windows(2) {
                    assert!(pair[0] < pair[1], "points must strictly increase");
                }
            }
        }
    }

    #[test]
    fn thumbnail_points_degenerate_counts() {
        assert_eq!(thumbnail_points(10, 1), vec![0.0]);
        assert_eq!(thumbnail_points(1, 1), vec![0.0]);
        assert!(thumbnail_points(10, 0).is_empty());
        assert!(thumbnail_points(0, 3).is_empty());
    }

    #[test]
    fn page_for_point_truncates() {
        assert_eq!(page_for_point(0.0), 0);
        assert_eq!(page_for_point(2.25), 2);
        assert_eq!(page_for_point(6.99), 6);
        assert_eq!(page_for_point(-1.0), 0);
        assert_eq!(page_for_point(f32::NAN), 0);
    }

    #[test]
    fn spin_fraction_wraps_at_period() {
        let period = Duration::from_millis(1000);
        assert_eq!(spin_fraction(Duration::ZERO, period), 0.0);
        assert!((spin_fraction(Duration::from_millis(250), period) - 0.25).abs() < 1e-6);
        assert!((spin_fraction(Duration::from_millis(1250), period) - 0.25).abs() < 1e-6);
        assert_eq!(spin_fraction(Duration::from_millis(500), Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn cache_returns_identical_bitmap_after_first_fetch() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let cache = PageImageCache::new(renderer.clone(), RenderOptions::default());

        let first = cache.image(3).await.unwrap();
        let second = cache.image(3).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(renderer.render_count(), 1);
    }

    #[tokio::test]
    async fn cache_collapses_concurrent_requests_for_same_page() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let cache = Arc::new(PageImageCache::new(renderer.clone(), RenderOptions::default()));

        let (left, right) = tokio::join!(cache.image(4), cache.image(4));
        assert!(Arc::ptr_eq(&left.unwrap(), &right.unwrap()));
        assert_eq!(renderer.render_count(), 1);
    }

    #[tokio::test]
    async fn cache_clear_forces_fresh_fetches() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let cache = PageImageCache::new(renderer.clone(), RenderOptions::default());

        cache.image(0).await.unwrap();
        cache.image(1).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await;
        assert!(cache.is_empty().await);

        cache.image(0).await.unwrap();
        assert_eq!(renderer.render_count(), 3);
    }

    #[tokio::test]
    async fn cache_failure_stores_no_partial_entry() {
        let renderer = Arc::new(FakeRenderer::failing_on(10, vec![2]));
        let cache = PageImageCache::new(renderer.clone(), RenderOptions::default());

        assert!(cache.image(2).await.is_err());
        assert!(!cache.contains(2).await);

        cache.image(3).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn cache_rejects_out_of_range_pages() {
        let renderer = Arc::new(FakeRenderer::new(3));
        let cache = PageImageCache::new(renderer.clone(), RenderOptions::default());

        assert!(cache.image(3).await.is_err());
        assert_eq!(renderer.render_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_coalesces_rapid_calls_keeping_the_last() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let debouncer = Debouncer::new(Duration::from_millis(100));

        for value in [1, 2, 3] {
            let fired = Arc::clone(&fired);
            debouncer.run(move || fired.lock().push(value));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(*fired.lock(), vec![3]);
    }

    #[tokio::test(start_paused = true)]
    async fn debouncer_cancel_pending_suppresses_execution() {
        let fired = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(100));

        let counter = Arc::clone(&fired);
        debouncer.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel_pending();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn document_loaded_resets_cache_and_recomputes_points() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let slider = PageSlider::new(
            renderer.clone(),
            ViewerConfig::default(),
            SliderCallbacks::default(),
        );

        slider.document_loading();
        assert_eq!(slider.phase(), LoadPhase::Loading);
        assert!(slider.spinner_running());

        slider.viewport_resized(650.0);
        slider.document_loaded().await;

        assert_eq!(slider.phase(), LoadPhase::Success);
        assert!(!slider.spinner_running());
        assert_eq!(slider.thumbnail_points(), vec![0.0, 2.25, 4.5, 6.75, 9.0]);
        assert_eq!(slider.thumbnail_pages(), vec![0, 2, 4, 6, 9]);
        assert_eq!(slider.current_page(), 0);
        assert!(slider.cache().contains(0).await);
        assert!(slider.thumb_image().is_some());
    }

    #[tokio::test]
    async fn drag_commits_navigation_exactly_once() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let pages_seen = Arc::new(Mutex::new(Vec::new()));
        let slider = slider_with_callbacks(renderer, Arc::clone(&pages_seen));

        slider.drag_started();
        assert!(slider.is_dragging());

        slider.drag_moved(3);
        slider.drag_moved(7);
        assert!(slider.thumb_image().is_none());
        assert_eq!(slider.current_page(), 7);

        slider.drag_ended();
        assert_eq!(*pages_seen.lock(), vec![7]);
        assert!(!slider.is_dragging());

        slider.drag_ended();
        assert_eq!(*pages_seen.lock(), vec![7]);
    }

    #[tokio::test]
    async fn drag_target_is_clamped_to_document_range() {
        let renderer = Arc::new(FakeRenderer::new(5));
        let pages_seen = Arc::new(Mutex::new(Vec::new()));
        let slider = slider_with_callbacks(renderer, Arc::clone(&pages_seen));

        slider.drag_started();
        slider.drag_moved(99);
        slider.drag_ended();

        assert_eq!(*pages_seen.lock(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn resize_recomputes_points_after_quiet_period() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let slider = PageSlider::new(
            renderer,
            ViewerConfig::default(),
            SliderCallbacks::default(),
        );

        slider.viewport_resized(650.0);
        assert!(slider.thumbnail_points().is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(slider.thumbnail_points(), vec![0.0, 2.25, 4.5, 6.75, 9.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn drag_fetch_populates_thumb_after_quiet_period() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let slider = PageSlider::new(
            renderer.clone(),
            ViewerConfig::default(),
            SliderCallbacks::default(),
        );

        slider.drag_started();
        slider.drag_moved(7);
        assert!(slider.thumb_image().is_none());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(slider.thumb_image().is_some());
        assert!(slider.cache().contains(7).await);
        assert_eq!(renderer.render_count(), 1);
    }

    #[tokio::test]
    async fn select_page_navigates_and_populates_cache_path() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let pages_seen = Arc::new(Mutex::new(Vec::new()));
        let slider = slider_with_callbacks(renderer, Arc::clone(&pages_seen));

        slider.select_page(6);
        assert_eq!(*pages_seen.lock(), vec![6]);
        assert_eq!(slider.current_page(), 6);
    }

    #[tokio::test]
    async fn single_page_documents_hide_the_slider() {
        let renderer = Arc::new(FakeRenderer::new(1));
        let slider = PageSlider::new(
            renderer,
            ViewerConfig::default(),
            SliderCallbacks::default(),
        );
        assert!(!slider.slider_visible());

        let renderer = Arc::new(FakeRenderer::new(2));
        let slider = PageSlider::new(
            renderer,
            ViewerConfig::default(),
            SliderCallbacks::default(),
        );
        assert!(slider.slider_visible());
    }

    #[tokio::test]
    async fn document_failed_records_error_and_notifies() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors_out = Arc::clone(&errors);
        let callbacks = SliderCallbacks {
            on_document_error: Some(Box::new(move |message| {
                errors_out.lock().push(message.to_owned());
            })),
            ..Default::default()
        };
        let slider = PageSlider::new(renderer, ViewerConfig::default(), callbacks);

        slider.document_loading();
        slider.document_failed("password required");

        assert_eq!(slider.phase(), LoadPhase::Error);
        assert_eq!(slider.last_error().as_deref(), Some("password required"));
        assert_eq!(*errors.lock(), vec!["password required".to_owned()]);
        assert!(!slider.spinner_running());
    }

    #[tokio::test]
    async fn thumbnail_cells_share_the_cache() {
        let renderer = Arc::new(FakeRenderer::new(10));
        let slider = PageSlider::new(
            renderer.clone(),
            ViewerConfig::default(),
            SliderCallbacks::default(),
        );

        let from_cell = slider.thumbnail_image(4).await.unwrap();
        let from_cache = slider.cache().image(4).await.unwrap();

        assert!(Arc::ptr_eq(&from_cell, &from_cache));
        assert_eq!(renderer.render_count(), 1);
    }

    #[test]
    fn viewer_config_parses_partial_toml() {
        let config: ViewerConfig = toml::from_str(
            r#"
            drag_debounce_ms = 50

            [render]
            format = "jpeg"

            [slider]
            reverse = true
            physics = "bouncing"
            "#,
        )
        .unwrap();

        assert_eq!(config.drag_debounce_ms, 50);
        assert_eq!(config.resize_debounce_ms, 500);
        assert_eq!(config.render.format, ImageFormat::Jpeg);
        assert_eq!(config.render.target_width, 260);
        assert!(config.slider.reverse);
        assert!(!config.slider.snap);
        assert_eq!(config.slider.physics, ScrollPhysics::Bouncing);
    }

    #[test]
    fn document_id_is_stable_for_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();

        assert_eq!(
            document_id_for_path(&file_path),
            document_id_for_path(&file_path)
        );
    }
}
