use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

pub const LOADING_TEXT: &str = "Loading...";

pub const IMAGE_EXTS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct PageImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Display targets for the progressively annotated page imagery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayKind {
    Original,
    Paragraphs,
    Lines,
    Words,
    Mismatches,
}

impl OverlayKind {
    pub const ALL: [OverlayKind; 5] = [
        OverlayKind::Original,
        OverlayKind::Paragraphs,
        OverlayKind::Lines,
        OverlayKind::Words,
        OverlayKind::Mismatches,
    ];

    pub fn label(self) -> &'static str {
        match self {
            OverlayKind::Original => "Original",
            OverlayKind::Paragraphs => "Paragraphs",
            OverlayKind::Lines => "Lines",
            OverlayKind::Words => "Words",
            OverlayKind::Mismatches => "Mismatches",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSource {
    Filesystem,
    CachedOcr,
    #[default]
    Ocr,
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub name: String,
    pub index: usize,
    pub text: Option<String>,
    pub source: PageSource,
    pub images: HashMap<OverlayKind, PageImage>,
}

impl Page {
    pub fn image(&self, kind: OverlayKind) -> Option<&PageImage> {
        self.images.get(&kind)
    }
}

/// Source of page objects for a project.
///
/// `load_page` may be slow (OCR inference, disk reads); the session always
/// runs it off the synchronous path via the navigation coordinator.
pub trait PageProvider: Send + Sync {
    fn load_page(&self, index: usize, name: &str, ground_truth: Option<&str>) -> Result<Page>;

    /// Regenerate derived page imagery before overlay encoding.
    fn refresh_page_images(&self, _page: &mut Page) -> Result<()> {
        Ok(())
    }
}

/// Result of a navigation attempt. A rejection carries a human-readable
/// reason and is not an error: boundary hits are expected in normal use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavOutcome {
    pub success: bool,
    pub reason: String,
}

impl NavOutcome {
    pub fn accepted() -> Self {
        Self {
            success: true,
            reason: String::new(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
        }
    }
}

pub fn advance(current: i64, max: i64) -> NavOutcome {
    if current < max {
        debug!(current, max, "advance: moving to {}", current + 1);
        NavOutcome::accepted()
    } else {
        debug!(current, max, "advance: already at last page");
        NavOutcome::rejected("Already at last page")
    }
}

pub fn retreat(current: i64) -> NavOutcome {
    if current > 0 {
        debug!(current, "retreat: moving to {}", current - 1);
        NavOutcome::accepted()
    } else {
        debug!(current, "retreat: already at first page");
        NavOutcome::rejected("Already at first page")
    }
}

/// Resolve a 1-based page number against `total` pages. Out-of-range input
/// is rejected, not clamped: numbers are user-typed and validated strictly.
pub fn goto_number(number: i64, total: i64) -> (NavOutcome, i64) {
    if number < 1 || number > total {
        warn!(number, total, "goto_number: invalid page number");
        return (
            NavOutcome::rejected(format!("Invalid page number {number}")),
            -1,
        );
    }
    (NavOutcome::accepted(), number - 1)
}

/// Resolve a 0-based index against `max`, clamping into `[0, max]`. Clamped
/// moves count as success; index requests are best-effort.
pub fn goto_index(target: i64, max: i64) -> (NavOutcome, i64) {
    if max < 0 {
        warn!(target, "goto_index: no pages available");
        return (NavOutcome::rejected("No pages available"), -1);
    }
    let clamped = target.clamp(0, max);
    if clamped != target {
        debug!(target, clamped, "goto_index: clamped out-of-range target");
    }
    (NavOutcome::accepted(), clamped)
}

pub fn is_valid(index: i64, max: i64) -> bool {
    (0..=max).contains(&index)
}

/// Sequence an index change with background page preparation.
///
/// The move is applied synchronously and is never rolled back; the
/// navigating flag is cleared before any preparation failure reaches the
/// caller.
pub async fn navigate_with<A, P, S>(apply_move: A, prepare: P, set_navigating: S) -> Result<()>
where
    A: FnOnce(),
    P: FnOnce() -> Result<()> + Send + 'static,
    S: Fn(bool),
{
    apply_move();
    set_navigating(true);
    let prepared = tokio::task::spawn_blocking(prepare).await;
    set_navigating(false);
    match prepared {
        Ok(outcome) => outcome,
        Err(err) => Err(anyhow!("background page preparation aborted: {err}")),
    }
}

fn normalize_text(text: &str) -> String {
    if text.trim().is_empty() {
        String::new()
    } else {
        text.to_owned()
    }
}

/// OCR and ground-truth text for a page. Blank or missing values normalize
/// to empty strings; this never fails.
pub fn page_texts(
    page: Option<&Page>,
    ground_truth_map: Option<&HashMap<String, String>>,
) -> (String, String) {
    let Some(page) = page else {
        return (String::new(), String::new());
    };

    let ocr_text = page.text.as_deref().map(normalize_text).unwrap_or_default();

    let gt_text = match ground_truth_map {
        Some(map) if !page.name.is_empty() => map
            .get(&page.name)
            .map(|text| normalize_text(text))
            .unwrap_or_default(),
        _ => String::new(),
    };

    (ocr_text, gt_text)
}

/// Single invalidation rule for the text cache: identity is positional.
/// A page replaced in place at the same index is only picked up with `force`.
pub fn should_refresh(current_index: i64, cached_index: i64, force: bool) -> bool {
    force || current_index != cached_index
}

pub fn is_ready(pages: &[Option<Page>], index: i64) -> bool {
    usize::try_from(index)
        .ok()
        .and_then(|slot| pages.get(slot))
        .map_or(false, Option::is_some)
}

pub fn placeholder() -> (String, String) {
    (LOADING_TEXT.to_owned(), LOADING_TEXT.to_owned())
}

pub fn source_label(page: Option<&Page>, loading: bool) -> &'static str {
    if loading {
        return "LOADING...";
    }
    match page {
        None => "(NO PAGE)",
        Some(page) => match page.source {
            PageSource::Filesystem => "LABELED",
            PageSource::CachedOcr => "CACHED OCR",
            PageSource::Ocr => "RAW OCR",
        },
    }
}

#[derive(Debug)]
struct TextCache {
    index: i64,
    ocr: String,
    ground_truth: String,
}

impl TextCache {
    fn empty() -> Self {
        Self {
            index: -1,
            ocr: String::new(),
            ground_truth: String::new(),
        }
    }
}

fn update_text_cache(
    cache: &Mutex<TextCache>,
    pages: &Mutex<Vec<Option<Page>>>,
    ground_truth_map: &HashMap<String, String>,
    current_index: i64,
    force: bool,
) {
    let mut cache = cache.lock();
    if !should_refresh(current_index, cache.index, force) {
        return;
    }
    let pages = pages.lock();
    if is_ready(&pages, current_index) {
        let page = pages[current_index as usize].as_ref();
        let (ocr, ground_truth) = page_texts(page, Some(ground_truth_map));
        *cache = TextCache {
            index: current_index,
            ocr,
            ground_truth,
        };
    } else if cache.index == -1 || force {
        // Page not loaded yet; publish placeholders rather than stale text.
        let (ocr, ground_truth) = placeholder();
        *cache = TextCache {
            index: current_index,
            ocr,
            ground_truth,
        };
    }
}

fn normalize_ground_truth_entries(data: &serde_json::Map<String, Value>) -> HashMap<String, String> {
    let mut norm = HashMap::new();
    for (key, value) in data {
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Null => continue,
            other => other.to_string(),
        };
        norm.insert(key.clone(), text.clone());
        norm.entry(key.to_lowercase()).or_insert_with(|| text.clone());
        if !key.contains('.') {
            for ext in IMAGE_EXTS {
                let variant = format!("{key}.{ext}");
                norm.entry(variant.to_lowercase())
                    .or_insert_with(|| text.clone());
                norm.entry(variant).or_insert_with(|| text.clone());
            }
        }
    }
    norm
}

/// Load and normalize the ground-truth mapping from `<directory>/pages.json`.
///
/// A missing file, unreadable file, or non-object root yields an empty map;
/// ground truth is optional and its absence is never an error.
pub fn load_ground_truth_map(directory: &Path) -> HashMap<String, String> {
    let pages_json = directory.join("pages.json");
    if !pages_json.exists() {
        debug!(path = %pages_json.display(), "no pages.json found");
        return HashMap::new();
    }
    let raw = match std::fs::read_to_string(&pages_json) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %pages_json.display(), "failed to read pages.json: {err}");
            return HashMap::new();
        }
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => {
            let norm = normalize_ground_truth_entries(&map);
            debug!(entries = norm.len(), path = %pages_json.display(), "loaded ground truth");
            norm
        }
        Ok(_) => {
            warn!(path = %pages_json.display(), "pages.json root is not an object");
            HashMap::new()
        }
        Err(err) => {
            warn!(path = %pages_json.display(), "failed to parse pages.json: {err}");
            HashMap::new()
        }
    }
}

/// Variant-priority ground-truth lookup: exact name, lowercase, basename,
/// lowercase basename.
pub fn find_ground_truth_text(
    name: &str,
    ground_truth_map: &HashMap<String, String>,
) -> Option<String> {
    if name.is_empty() {
        return None;
    }
    let mut candidates = vec![name.to_owned(), name.to_lowercase()];
    if let Some((base, _)) = name.rsplit_once('.') {
        candidates.push(base.to_owned());
        candidates.push(base.to_lowercase());
    }
    let mut seen: Vec<&str> = Vec::new();
    for candidate in &candidates {
        if seen.contains(&candidate.as_str()) {
            continue;
        }
        seen.push(candidate.as_str());
        if let Some(text) = ground_truth_map.get(candidate) {
            return Some(text.clone());
        }
    }
    None
}

fn has_image_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted image filenames directly under `directory`; one page per image.
pub fn discover_page_names(directory: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(directory)
        .with_context(|| format!("failed to read project directory {:?}", directory))?;
    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && has_image_ext(&path) {
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                names.push(name.to_owned());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Immediate subdirectories of `root` that contain at least one page image.
pub fn list_projects(root: &Path) -> BTreeMap<String, PathBuf> {
    let mut projects = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir(root) else {
        warn!(root = %root.display(), "project root is not readable");
        return projects;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let has_images = std::fs::read_dir(&path)
            .map(|children| {
                children
                    .flatten()
                    .any(|child| child.path().is_file() && has_image_ext(&child.path()))
            })
            .unwrap_or(false);
        if has_images {
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                projects.insert(name.to_owned(), path);
            }
        }
    }
    projects
}

/// An opened project: root directory, ordered page names, lazily filled
/// page slots, and the normalized ground-truth mapping.
#[derive(Clone)]
pub struct Project {
    root: PathBuf,
    names: Arc<Vec<String>>,
    pages: Arc<Mutex<Vec<Option<Page>>>>,
    ground_truth: Arc<HashMap<String, String>>,
}

impl Project {
    pub fn open(root: &Path) -> Result<Self> {
        let names = discover_page_names(root)?;
        let ground_truth = load_ground_truth_map(root);
        Ok(Self::from_parts(root.to_path_buf(), names, ground_truth))
    }

    pub fn from_parts(
        root: PathBuf,
        names: Vec<String>,
        ground_truth: HashMap<String, String>,
    ) -> Self {
        let slots = vec![None; names.len()];
        Self {
            root,
            names: Arc::new(names),
            pages: Arc::new(Mutex::new(slots)),
            ground_truth: Arc::new(ground_truth),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn page_count(&self) -> usize {
        self.names.len()
    }

    /// Highest valid page index; `-1` when the project has no pages.
    pub fn max_index(&self) -> i64 {
        self.names.len() as i64 - 1
    }

    pub fn page_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn ground_truth_map(&self) -> &HashMap<String, String> {
        &self.ground_truth
    }

    pub fn with_page<R>(&self, index: i64, f: impl FnOnce(Option<&Page>) -> R) -> R {
        let pages = self.pages.lock();
        let page = usize::try_from(index)
            .ok()
            .and_then(|slot| pages.get(slot))
            .and_then(Option::as_ref);
        f(page)
    }

    pub fn with_page_mut<R>(&self, index: i64, f: impl FnOnce(Option<&mut Page>) -> R) -> R {
        let mut pages = self.pages.lock();
        let page = usize::try_from(index)
            .ok()
            .and_then(|slot| pages.get_mut(slot))
            .and_then(Option::as_mut);
        f(page)
    }
}

fn ensure_page(project: &Project, provider: &dyn PageProvider, index: i64) -> Result<()> {
    let Ok(slot) = usize::try_from(index) else {
        return Ok(());
    };
    if slot >= project.page_count() {
        return Ok(());
    }
    if project.pages.lock()[slot].is_some() {
        return Ok(());
    }

    // The lock is not held across the load: providers may block on OCR or
    // disk for a while. Racing loaders overwrite each other idempotently.
    let name = project.names[slot].clone();
    let ground_truth = find_ground_truth_text(&name, &project.ground_truth);
    let page = provider
        .load_page(slot, &name, ground_truth.as_deref())
        .with_context(|| format!("failed to load page {slot} ({name})"))?;
    project.pages.lock()[slot] = Some(page);
    Ok(())
}

/// Session over one open project: cursor, navigating flag, text cache.
///
/// Interior mutability throughout so a UI layer can hold the session in an
/// `Arc` and observe the cursor and flag while navigation is in flight.
pub struct ProjectSession {
    project: Project,
    provider: Arc<dyn PageProvider>,
    cursor: Arc<AtomicI64>,
    navigating: Arc<AtomicBool>,
    text_cache: Arc<Mutex<TextCache>>,
}

impl ProjectSession {
    pub fn new(project: Project, provider: Arc<dyn PageProvider>) -> Self {
        let start = if project.page_count() == 0 { -1 } else { 0 };
        Self {
            project,
            provider,
            cursor: Arc::new(AtomicI64::new(start)),
            navigating: Arc::new(AtomicBool::new(false)),
            text_cache: Arc::new(Mutex::new(TextCache::empty())),
        }
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn current_index(&self) -> i64 {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn is_navigating(&self) -> bool {
        self.navigating.load(Ordering::SeqCst)
    }

    pub async fn next_page(&self) -> Result<NavOutcome> {
        let current = self.current_index();
        let outcome = advance(current, self.project.max_index());
        if !outcome.success {
            return Ok(outcome);
        }
        self.navigate_to(current + 1).await?;
        Ok(outcome)
    }

    pub async fn prev_page(&self) -> Result<NavOutcome> {
        let current = self.current_index();
        let outcome = retreat(current);
        if !outcome.success {
            return Ok(outcome);
        }
        self.navigate_to(current - 1).await?;
        Ok(outcome)
    }

    pub async fn goto_page_number(&self, number: i64) -> Result<NavOutcome> {
        let (outcome, target) = goto_number(number, self.project.page_count() as i64);
        if !outcome.success {
            return Ok(outcome);
        }
        self.goto_page_index(target).await
    }

    pub async fn goto_page_index(&self, index: i64) -> Result<NavOutcome> {
        let (outcome, target) = goto_index(index, self.project.max_index());
        if !outcome.success {
            return Ok(outcome);
        }
        if self.current_index() != target {
            self.invalidate_text_cache();
        }
        self.navigate_to(target).await?;
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn navigate_to(&self, target: i64) -> Result<()> {
        let cursor = Arc::clone(&self.cursor);
        let navigating = Arc::clone(&self.navigating);
        let prepare = self.prepare_page_task(target);
        navigate_with(
            move || cursor.store(target, Ordering::SeqCst),
            prepare,
            |state| navigating.store(state, Ordering::SeqCst),
        )
        .await
    }

    fn prepare_page_task(&self, target: i64) -> impl FnOnce() -> Result<()> + Send + 'static {
        let project = self.project.clone();
        let provider = Arc::clone(&self.provider);
        let cache = Arc::clone(&self.text_cache);
        move || {
            ensure_page(&project, provider.as_ref(), target)?;
            update_text_cache(&cache, &project.pages, &project.ground_truth, target, true);
            Ok(())
        }
    }

    pub fn current_ocr_text(&self) -> String {
        self.refresh_text_cache(false);
        self.text_cache.lock().ocr.clone()
    }

    pub fn current_ground_truth_text(&self) -> String {
        self.refresh_text_cache(false);
        self.text_cache.lock().ground_truth.clone()
    }

    fn refresh_text_cache(&self, force: bool) {
        update_text_cache(
            &self.text_cache,
            &self.project.pages,
            &self.project.ground_truth,
            self.current_index(),
            force,
        );
    }

    /// Drop cached text. Callers that replace a page in place must call this;
    /// positional invalidation does not detect same-index content changes.
    pub fn invalidate_text_cache(&self) {
        *self.text_cache.lock() = TextCache::empty();
    }

    pub fn current_source_label(&self) -> &'static str {
        let loading = self.is_navigating();
        self.project
            .with_page(self.current_index(), |page| source_label(page, loading))
    }

    pub fn with_current_page<R>(&self, f: impl FnOnce(Option<&Page>) -> R) -> R {
        self.project.with_page(self.current_index(), f)
    }

    pub fn with_current_page_mut<R>(&self, f: impl FnOnce(Option<&mut Page>) -> R) -> R {
        self.project.with_page_mut(self.current_index(), f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

/// Outcome relay toward the user. The navigation and cache core never calls
/// this itself; callers forward `NavOutcome` reasons and preparation errors.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
}

pub struct TracingNotifier {
    enabled: AtomicBool,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }
}

impl Default for TracingNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        if !self.is_enabled() {
            return;
        }
        match severity {
            Severity::Error => tracing::error!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Success | Severity::Info => tracing::info!("{message}"),
        }
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

pub struct NullNotifier;

impl NotificationSink for NullNotifier {
    fn notify(&self, _severity: Severity, _message: &str) {}

    fn set_enabled(&self, _enabled: bool) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::tempdir;

    struct FakeProvider {
        fail: bool,
    }

    impl PageProvider for FakeProvider {
        fn load_page(
            &self,
            index: usize,
            name: &str,
            _ground_truth: Option<&str>,
        ) -> Result<Page> {
            if self.fail {
                anyhow::bail!("ocr backend unavailable");
            }
            Ok(Page {
                name: name.to_owned(),
                index,
                text: Some(format!("ocr text {index}")),
                source: PageSource::Ocr,
                images: HashMap::new(),
            })
        }
    }

    fn test_project(count: usize) -> Project {
        let names = (0..count).map(|i| format!("{i:03}.png")).collect();
        Project::from_parts(PathBuf::from("/tmp/book"), names, HashMap::new())
    }

    fn test_session(count: usize) -> ProjectSession {
        ProjectSession::new(test_project(count), Arc::new(FakeProvider { fail: false }))
    }

    #[test]
    fn advance_moves_below_last_page() {
        assert!(advance(0, 4).success);
        assert!(advance(3, 4).success);
    }

    #[test]
    fn advance_rejects_at_last_page() {
        let outcome = advance(4, 4);
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "Already at last page");
    }

    #[test]
    fn advance_rejects_on_empty_project() {
        assert!(!advance(-1, -1).success);
    }

    #[test]
    fn retreat_moves_above_first_page() {
        assert!(retreat(1).success);
        assert!(retreat(100).success);
    }

    #[test]
    fn retreat_rejects_at_first_page() {
        let outcome = retreat(0);
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "Already at first page");
    }

    #[test]
    fn goto_number_resolves_one_based_pages() {
        let (outcome, index) = goto_number(1, 10);
        assert!(outcome.success);
        assert_eq!(index, 0);

        let (outcome, index) = goto_number(10, 10);
        assert!(outcome.success);
        assert_eq!(index, 9);
    }

    #[test]
    fn goto_number_rejects_out_of_range() {
        let (outcome, index) = goto_number(0, 10);
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "Invalid page number 0");
        assert_eq!(index, -1);

        let (outcome, index) = goto_number(11, 10);
        assert!(!outcome.success);
        assert_eq!(index, -1);
    }

    #[test]
    fn goto_index_clamps_into_range() {
        let (outcome, index) = goto_index(-5, 10);
        assert!(outcome.success);
        assert_eq!(index, 0);

        let (outcome, index) = goto_index(15, 10);
        assert!(outcome.success);
        assert_eq!(index, 10);

        let (outcome, index) = goto_index(3, 10);
        assert!(outcome.success);
        assert_eq!(index, 3);
    }

    #[test]
    fn goto_index_rejects_empty_project() {
        let (outcome, index) = goto_index(0, -1);
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "No pages available");
        assert_eq!(index, -1);
    }

    #[test]
    fn is_valid_bounds() {
        assert!(is_valid(0, 0));
        assert!(is_valid(5, 10));
        assert!(is_valid(10, 10));
        assert!(!is_valid(-1, 10));
        assert!(!is_valid(11, 10));
        assert!(!is_valid(0, -1));
    }

    #[test]
    fn should_refresh_truth_table() {
        assert!(should_refresh(1, 2, false));
        assert!(should_refresh(1, 1, true));
        assert!(should_refresh(1, 2, true));
        assert!(!should_refresh(1, 1, false));
        assert!(should_refresh(0, -1, false));
    }

    #[test]
    fn is_ready_requires_populated_slot() {
        let pages = vec![Some(Page::default()), None];
        assert!(is_ready(&pages, 0));
        assert!(!is_ready(&pages, 1));
        assert!(!is_ready(&pages, 2));
        assert!(!is_ready(&pages, -1));
        assert!(!is_ready(&[], 0));
    }

    #[test]
    fn page_texts_normalizes_blank_values() {
        let mut page = Page {
            name: "001.png".to_owned(),
            text: Some("   \n\t".to_owned()),
            ..Page::default()
        };
        let (ocr, gt) = page_texts(Some(&page), None);
        assert_eq!(ocr, "");
        assert_eq!(gt, "");

        page.text = Some("the quick brown fox".to_owned());
        let (ocr, _) = page_texts(Some(&page), None);
        assert_eq!(ocr, "the quick brown fox");

        assert_eq!(page_texts(None, None), (String::new(), String::new()));
    }

    #[test]
    fn page_texts_looks_up_ground_truth_by_name() {
        let page = Page {
            name: "001.png".to_owned(),
            text: Some("ocr".to_owned()),
            ..Page::default()
        };
        let mut map = HashMap::new();
        map.insert("001.png".to_owned(), "truth".to_owned());

        let (_, gt) = page_texts(Some(&page), Some(&map));
        assert_eq!(gt, "truth");

        map.insert("001.png".to_owned(), "  ".to_owned());
        let (_, gt) = page_texts(Some(&page), Some(&map));
        assert_eq!(gt, "");

        let (_, gt) = page_texts(Some(&page), Some(&HashMap::new()));
        assert_eq!(gt, "");
    }

    #[test]
    fn page_texts_is_pure() {
        let page = Page {
            name: "001.png".to_owned(),
            text: Some("stable".to_owned()),
            ..Page::default()
        };
        let mut map = HashMap::new();
        map.insert("001.png".to_owned(), "truth".to_owned());

        let first = page_texts(Some(&page), Some(&map));
        let second = page_texts(Some(&page), Some(&map));
        assert_eq!(first, second);
    }

    #[test]
    fn source_labels() {
        let mut page = Page::default();
        assert_eq!(source_label(Some(&page), false), "RAW OCR");
        page.source = PageSource::Filesystem;
        assert_eq!(source_label(Some(&page), false), "LABELED");
        page.source = PageSource::CachedOcr;
        assert_eq!(source_label(Some(&page), false), "CACHED OCR");
        assert_eq!(source_label(None, false), "(NO PAGE)");
        assert_eq!(source_label(Some(&page), true), "LOADING...");
        assert_eq!(source_label(None, true), "LOADING...");
    }

    #[test]
    fn ground_truth_normalization_adds_variants() {
        let raw: Value = serde_json::from_str(
            r#"{"Page_001": "first", "002.png": "second", "count": 3, "missing": null}"#,
        )
        .unwrap();
        let Value::Object(map) = raw else {
            unreachable!()
        };
        let norm = normalize_ground_truth_entries(&map);

        assert_eq!(norm.get("Page_001").map(String::as_str), Some("first"));
        assert_eq!(norm.get("page_001").map(String::as_str), Some("first"));
        assert_eq!(norm.get("Page_001.png").map(String::as_str), Some("first"));
        assert_eq!(norm.get("page_001.jpg").map(String::as_str), Some("first"));
        assert_eq!(norm.get("002.png").map(String::as_str), Some("second"));
        assert_eq!(norm.get("count").map(String::as_str), Some("3"));
        assert!(!norm.contains_key("missing"));
    }

    #[test]
    fn find_ground_truth_prefers_exact_match() {
        let mut map = HashMap::new();
        map.insert("001.PNG".to_owned(), "exact".to_owned());
        map.insert("001.png".to_owned(), "lower".to_owned());
        map.insert("001".to_owned(), "base".to_owned());

        assert_eq!(
            find_ground_truth_text("001.PNG", &map).as_deref(),
            Some("exact")
        );
        assert_eq!(
            find_ground_truth_text("001.tif", &map).as_deref(),
            Some("base")
        );
        assert_eq!(find_ground_truth_text("", &map), None);
        assert_eq!(find_ground_truth_text("404.png", &map), None);
    }

    #[test]
    fn load_ground_truth_map_handles_missing_and_malformed_files() {
        let dir = tempdir().unwrap();
        assert!(load_ground_truth_map(dir.path()).is_empty());

        fs::write(dir.path().join("pages.json"), "[1, 2, 3]").unwrap();
        assert!(load_ground_truth_map(dir.path()).is_empty());

        fs::write(dir.path().join("pages.json"), r#"{"001.png": "truth"}"#).unwrap();
        let map = load_ground_truth_map(dir.path());
        assert_eq!(map.get("001.png").map(String::as_str), Some("truth"));
    }

    #[test]
    fn discover_page_names_sorts_and_filters() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("002.png"), b"img").unwrap();
        fs::write(dir.path().join("001.JPG"), b"img").unwrap();
        fs::write(dir.path().join("notes.txt"), b"text").unwrap();
        fs::create_dir(dir.path().join("003.png")).unwrap();

        let names = discover_page_names(dir.path()).unwrap();
        assert_eq!(names, vec!["001.JPG".to_owned(), "002.png".to_owned()]);
    }

    #[test]
    fn list_projects_requires_page_images() {
        let root = tempdir().unwrap();
        let with_pages = root.path().join("book-a");
        fs::create_dir(&with_pages).unwrap();
        fs::write(with_pages.join("001.png"), b"img").unwrap();
        let without_pages = root.path().join("book-b");
        fs::create_dir(&without_pages).unwrap();
        fs::write(without_pages.join("readme.md"), b"text").unwrap();

        let projects = list_projects(root.path());
        assert_eq!(projects.len(), 1);
        assert_eq!(projects.get("book-a"), Some(&with_pages));

        assert!(list_projects(&root.path().join("missing")).is_empty());
    }

    #[derive(Debug, PartialEq, Eq)]
    enum CoordinatorEvent {
        Applied,
        Flag(bool),
    }

    #[tokio::test]
    async fn coordinator_applies_move_before_flag_and_clears_after() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let apply_log = Arc::clone(&events);
        let flag_log = Arc::clone(&events);

        navigate_with(
            move || apply_log.lock().push(CoordinatorEvent::Applied),
            || Ok(()),
            move |state| flag_log.lock().push(CoordinatorEvent::Flag(state)),
        )
        .await
        .unwrap();

        let events = events.lock();
        assert_eq!(
            *events,
            vec![
                CoordinatorEvent::Applied,
                CoordinatorEvent::Flag(true),
                CoordinatorEvent::Flag(false),
            ]
        );
    }

    #[tokio::test]
    async fn coordinator_clears_flag_and_propagates_preparation_failure() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let flag_log = Arc::clone(&transitions);

        let result = navigate_with(
            || {},
            || Err(anyhow!("disk on fire")),
            move |state| flag_log.lock().push(state),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(*transitions.lock(), vec![true, false]);
    }

    #[tokio::test]
    async fn session_navigation_moves_cursor_and_loads_pages() {
        let session = test_session(5);
        assert_eq!(session.current_index(), 0);

        let outcome = session.next_page().await.unwrap();
        assert!(outcome.success);
        assert_eq!(session.current_index(), 1);
        assert!(!session.is_navigating());
        assert!(session.with_current_page(|page| page.is_some()));
        assert_eq!(session.current_ocr_text(), "ocr text 1");

        let outcome = session.prev_page().await.unwrap();
        assert!(outcome.success);
        assert_eq!(session.current_index(), 0);
        assert_eq!(session.current_ocr_text(), "ocr text 0");
    }

    #[tokio::test]
    async fn session_rejects_boundary_moves_without_side_effects() {
        let session = test_session(5);
        session.goto_page_index(4).await.unwrap();
        assert_eq!(session.current_index(), 4);

        let outcome = session.next_page().await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "Already at last page");
        assert_eq!(session.current_index(), 4);

        session.goto_page_index(0).await.unwrap();
        let outcome = session.prev_page().await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "Already at first page");
        assert_eq!(session.current_index(), 0);
    }

    #[tokio::test]
    async fn session_goto_page_number_validates_strictly() {
        let session = test_session(10);
        let outcome = session.goto_page_number(10).await.unwrap();
        assert!(outcome.success);
        assert_eq!(session.current_index(), 9);

        let outcome = session.goto_page_number(0).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "Invalid page number 0");
        assert_eq!(session.current_index(), 9);

        let outcome = session.goto_page_number(11).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(session.current_index(), 9);
    }

    #[tokio::test]
    async fn session_goto_page_index_clamps() {
        let session = test_session(3);
        let outcome = session.goto_page_index(99).await.unwrap();
        assert!(outcome.success);
        assert_eq!(session.current_index(), 2);

        let outcome = session.goto_page_index(-7).await.unwrap();
        assert!(outcome.success);
        assert_eq!(session.current_index(), 0);
    }

    #[tokio::test]
    async fn empty_session_rejects_all_navigation() {
        let session = test_session(0);
        assert_eq!(session.current_index(), -1);

        let outcome = session.next_page().await.unwrap();
        assert!(!outcome.success);
        let outcome = session.goto_page_index(0).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.reason, "No pages available");
        assert_eq!(session.current_index(), -1);
        assert_eq!(session.current_source_label(), "(NO PAGE)");
    }

    #[tokio::test]
    async fn preparation_failure_keeps_cursor_and_clears_flag() {
        let project = test_project(5);
        let session = ProjectSession::new(project, Arc::new(FakeProvider { fail: true }));

        let result = session.next_page().await;
        assert!(result.is_err());
        assert_eq!(session.current_index(), 1);
        assert!(!session.is_navigating());
    }

    #[tokio::test]
    async fn text_cache_serves_placeholder_until_page_loads() {
        let session = test_session(3);
        assert_eq!(session.current_ocr_text(), LOADING_TEXT);
        assert_eq!(session.current_ground_truth_text(), LOADING_TEXT);

        session.goto_page_index(0).await.unwrap();
        assert_eq!(session.current_ocr_text(), "ocr text 0");
        assert_eq!(session.current_ground_truth_text(), "");
    }

    #[tokio::test]
    async fn invalidated_text_cache_recomputes_from_loaded_page() {
        let session = test_session(3);
        session.goto_page_index(1).await.unwrap();
        assert_eq!(session.current_ocr_text(), "ocr text 1");

        session.with_current_page_mut(|page| {
            if let Some(page) = page {
                page.text = Some("edited in place".to_owned());
            }
        });
        // Positional invalidation alone does not see the in-place edit.
        assert_eq!(session.current_ocr_text(), "ocr text 1");

        session.invalidate_text_cache();
        assert_eq!(session.current_ocr_text(), "edited in place");
    }

    #[test]
    fn notifier_toggle_suppresses_output() {
        let notifier = TracingNotifier::new();
        assert!(notifier.is_enabled());
        notifier.set_enabled(false);
        assert!(!notifier.is_enabled());
        notifier.notify(Severity::Info, "dropped");
        notifier.set_enabled(true);
        assert!(notifier.is_enabled());

        let null = NullNotifier;
        assert!(!null.is_enabled());
        null.notify(Severity::Error, "ignored");
    }
}
