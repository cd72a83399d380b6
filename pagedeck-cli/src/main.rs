use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use pagedeck_core::{
    DocumentProvider, LoadPhase, OpenRequest, PageSlider, SliderCallbacks, ViewerConfig,
};
use pagedeck_render::PdfiumDocumentProvider;
use pagedeck_tty::{
    placeholder_png, slider_line, strip_layout, write_status_line, DrawParams, EventMapper,
    InputMode, KittyRenderer, StripLayout, UiEvent,
};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

/// Fallback cell width when the terminal does not report pixel dimensions.
const APPROX_CELL_PIXEL_WIDTH: f32 = 9.0;

const SPINNER_GLYPHS: [char; 4] = ['|', '/', '-', '\\'];

#[derive(Debug, Parser)]
#[command(
    name = "pagedeck",
    version,
    about = "kitty-native PDF thumbnail strip and page slider"
)]
struct Args {
    /// Page to open the document on (0-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Password for encrypted documents
    #[arg(long = "password")]
    password: Option<String>,

    /// Alternate config file (defaults to the platform config directory)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Path to the PDF file to open
    file: PathBuf,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> anyhow::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pagedeck", "pagedeck")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let config = ViewerConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;

    let provider = PdfiumDocumentProvider::new()?;
    let request = OpenRequest {
        path: args.file.clone(),
        password: args.password.clone(),
    };
    let renderer = provider
        .open(&request)
        .await
        .with_context(|| format!("failed to open {:?}", args.file))?;

    let redraw_signal = Arc::new(AtomicBool::new(true));
    let callbacks = SliderCallbacks {
        on_page_changed: Some(Box::new({
            let signal = Arc::clone(&redraw_signal);
            move |page_index| {
                tracing::info!(page_index, "page committed");
                signal.store(true, Ordering::Release);
            }
        })),
        on_document_loaded: Some(Box::new({
            let signal = Arc::clone(&redraw_signal);
            move |info| {
                tracing::info!(pages = info.page_count, label = %info.label, "document loaded");
                signal.store(true, Ordering::Release);
            }
        })),
        on_document_error: Some(Box::new({
            let signal = Arc::clone(&redraw_signal);
            move |message| {
                warn!("document failed to load: {}", message);
                signal.store(true, Ordering::Release);
            }
        })),
    };

    let slider = PageSlider::new(renderer, config, callbacks);
    slider.document_loading();
    slider.document_loaded().await;
    if let Some(page) = args.page {
        slider.select_page(page.min(slider.info().page_count.saturating_sub(1)));
    }

    let (mut columns, mut rows) = terminal::size()?;
    slider.viewport_resized(viewport_pixel_width(columns));

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut kitty = KittyRenderer::new(stdout);
    let mut event_mapper = EventMapper::new();
    let mut last_thumb = slider.thumb_image();
    let mut dirty = true;

    loop {
        let thumb_now = slider.thumb_image();
        let thumb_changed = match (&last_thumb, &thumb_now) {
            (None, None) => false,
            (Some(previous), Some(current)) => !Arc::ptr_eq(previous, current),
            _ => true,
        };
        if thumb_changed {
            last_thumb = thumb_now;
            dirty = true;
        }
        if redraw_signal.swap(false, Ordering::AcqRel) {
            dirty = true;
        }

        if dirty {
            let layout = strip_layout(columns, rows);
            let pending = event_mapper.pending_input();
            redraw(&mut kitty, &slider, columns, layout, pending.as_deref()).await?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            match event_mapper.map_event(ev) {
                UiEvent::BeginDrag => {
                    if slider.slider_visible() {
                        slider.drag_started();
                        event_mapper.set_mode(InputMode::Drag);
                        dirty = true;
                    }
                }
                UiEvent::DragMove { delta } => {
                    slider.drag_moved(shift_page(
                        slider.current_page(),
                        delta,
                        slider.info().page_count,
                    ));
                    dirty = true;
                }
                UiEvent::DragTo { page } => {
                    slider.drag_moved(page);
                    dirty = true;
                }
                UiEvent::EndDrag => {
                    slider.drag_ended();
                    event_mapper.set_mode(InputMode::Normal);
                    dirty = true;
                }
                UiEvent::SelectPage { page } => {
                    slider.select_page(page.min(slider.info().page_count.saturating_sub(1)));
                    dirty = true;
                }
                UiEvent::NextPage { count } => {
                    slider.select_page(shift_page(
                        slider.current_page(),
                        count as isize,
                        slider.info().page_count,
                    ));
                    dirty = true;
                }
                UiEvent::PrevPage { count } => {
                    slider.select_page(shift_page(
                        slider.current_page(),
                        -(count as isize),
                        slider.info().page_count,
                    ));
                    dirty = true;
                }
                UiEvent::Resize {
                    columns: new_columns,
                    rows: new_rows,
                } => {
                    columns = new_columns;
                    rows = new_rows;
                    slider.viewport_resized(viewport_pixel_width(columns));
                    kitty.clear_all()?;
                    dirty = true;
                }
                UiEvent::Quit => break,
                UiEvent::None => {
                    if event_mapper.pending_input().is_some() {
                        dirty = true;
                    }
                }
            }
        } else if slider.spinner_running() {
            // keep the spinner glyph turning between input events
            dirty = true;
        }
    }

    {
        let mut writer = kitty.writer();
        crossterm::execute!(&mut writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    }

    Ok(())
}

fn shift_page(current: usize, delta: isize, page_count: usize) -> usize {
    if page_count == 0 {
        return 0;
    }
    let last = (page_count - 1) as isize;
    (current as isize).saturating_add(delta).clamp(0, last) as usize
}

fn viewport_pixel_width(columns: u16) -> f32 {
    match terminal::window_size() {
        Ok(size) if size.width > 0 => size.width as f32,
        _ => f32::from(columns) * APPROX_CELL_PIXEL_WIDTH,
    }
}

async fn redraw(
    kitty: &mut KittyRenderer<io::Stdout>,
    slider: &PageSlider,
    columns: u16,
    layout: StripLayout,
    pending_input: Option<&str>,
) -> Result<()> {
    kitty.delete_images()?;
    {
        let mut writer = kitty.writer();
        crossterm::execute!(&mut writer, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    }

    let pages = slider.thumbnail_pages();
    let visible = layout.slots_that_fit(columns).min(pages.len());
    for (slot, &page_index) in pages.iter().take(visible).enumerate() {
        let (column, row) = layout.slot_origin(slot);
        let params = DrawParams::clamped(
            u32::from(layout.slot_columns),
            u32::from(layout.slot_rows),
        );
        match slider.thumbnail_image(page_index).await {
            Ok(image) => kitty.draw_at(&image, column, row, params)?,
            Err(err) => {
                warn!("thumbnail for page {} unavailable: {:#}", page_index, err);
                let placeholder = placeholder_png(13, 17, [96, 96, 96])?;
                kitty.draw_at(&placeholder, column, row, params)?;
            }
        }
    }

    if slider.slider_visible() {
        let track_width = usize::from(columns).saturating_sub(2);
        let line = slider_line(slider.current_page(), slider.info().page_count, track_width);
        let mut writer = kitty.writer();
        crossterm::execute!(
            &mut writer,
            cursor::MoveTo(0, layout.slider_row),
            Clear(ClearType::CurrentLine),
            Print(line)
        )?;
    }

    let status = combine_status(document_status(slider), pending_input);
    draw_status_line(kitty, layout.status_row, &status)?;
    Ok(())
}

fn document_status(slider: &PageSlider) -> String {
    let info = slider.info();
    match slider.phase() {
        LoadPhase::Loading => {
            let glyph = spinner_glyph(slider.spinner_turns(Instant::now()));
            format!("{} loading {}", glyph, info.label)
        }
        LoadPhase::Error => {
            let message = slider
                .last_error()
                .unwrap_or_else(|| "unknown error".to_owned());
            format!("error: {}", message)
        }
        LoadPhase::Success => {
            let suffix = if slider.is_dragging() { " [drag]" } else { "" };
            format!(
                "{} - page {}/{}{}",
                info.label,
                slider.current_page() + 1,
                info.page_count,
                suffix
            )
        }
    }
}

fn combine_status(base: String, pending_input: Option<&str>) -> String {
    match pending_input {
        Some(pending) if !pending.is_empty() => format!("{}  ({})", base, pending),
        _ => base,
    }
}

fn spinner_glyph(turns: f32) -> char {
    let frame = (turns.fract() * SPINNER_GLYPHS.len() as f32) as usize;
    SPINNER_GLYPHS[frame.min(SPINNER_GLYPHS.len() - 1)]
}

fn draw_status_line(
    kitty: &mut KittyRenderer<io::Stdout>,
    status_row: u16,
    status: &str,
) -> Result<()> {
    let mut writer = kitty.writer();
    crossterm::execute!(
        &mut writer,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine),
        SetAttribute(Attribute::Reverse)
    )?;
    write_status_line(&mut writer, status)?;
    crossterm::execute!(&mut writer, SetAttribute(Attribute::Reset))?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pagedeck.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal is in raw mode with kitty placements on screen, so logs
    // only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
