use std::io::{self, Write};

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    terminal::{Clear, ClearType},
};
use pagedeck_core::{ImageFormat, PageImage};

/// Emits page bitmaps with the kitty graphics protocol, one placement per
/// thumbnail slot.
pub struct KittyRenderer<W: Write> {
    writer: W,
    next_image_id: u32,
}

pub struct DrawParams {
    pub columns: u32,
    pub rows: u32,
}

impl DrawParams {
    pub fn clamped(columns: u32, rows: u32) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }
}

impl<W: Write> KittyRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_image_id: 1,
        }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Draws an encoded PNG bitmap at the given cell, sized to the cell box.
    /// Kitty transmits PNG payloads directly (f=100), so no re-encoding
    /// happens here.
    pub fn draw_at(
        &mut self,
        image: &PageImage,
        column: u16,
        row: u16,
        params: DrawParams,
    ) -> Result<()> {
        if image.format != ImageFormat::Png {
            return Err(anyhow!("kitty graphics transmission requires PNG bitmaps"));
        }

        crossterm::execute!(&mut self.writer, cursor::MoveTo(column, row))?;

        let image_id = self.next_image_id;
        self.next_image_id = self.next_image_id.wrapping_add(1).max(1);

        let encoded = BASE64.encode(&image.bytes);
        let mut chunks = encoded.as_bytes().chunks(4096).peekable();
        let mut first = true;

        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            if first {
                write!(
                    self.writer,
                    "\u{1b}_Ga=T,f=100,C=1,q=2,i={},c={},r={},z=-1,m={}",
                    image_id,
                    params.columns,
                    params.rows,
                    if more { 1 } else { 0 }
                )?;
                first = false;
            } else {
                write!(self.writer, "\u{1b}_Gm={},q=2", if more { 1 } else { 0 })?;
            }
            if !chunk.is_empty() {
                self.writer.write_all(b";")?;
                self.writer.write_all(chunk)?;
            }
            write!(self.writer, "\u{1b}\\")?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Deletes every visible placement before a strip redraw.
    pub fn delete_images(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}_Ga=d,d=A,q=2\u{1b}\\")?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Flat-color PNG used for loading and error cells in the strip.
pub fn placeholder_png(width: u32, height: u32, color: [u8; 3]) -> Result<PageImage> {
    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width as usize * height as usize {
            pixels.extend_from_slice(&[color[0], color[1], color[2], 255]);
        }
        writer.write_image_data(&pixels)?;
        writer.finish()?;
    }
    Ok(PageImage {
        width,
        height,
        format: ImageFormat::Png,
        bytes,
    })
}

/// Cell geometry for the horizontal thumbnail strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripLayout {
    pub slot_columns: u16,
    pub slot_rows: u16,
    pub gap_columns: u16,
    pub slider_row: u16,
    pub status_row: u16,
}

pub fn strip_layout(total_columns: u16, total_rows: u16) -> StripLayout {
    let slot_columns = (total_columns / 8).clamp(6, 20);
    let slot_rows = total_rows.saturating_sub(4).clamp(3, 14);
    StripLayout {
        slot_columns,
        slot_rows,
        gap_columns: 1,
        slider_row: total_rows.saturating_sub(2),
        status_row: total_rows.saturating_sub(1),
    }
}

impl StripLayout {
    pub fn slot_origin(&self, slot_index: usize) -> (u16, u16) {
        let stride = u32::from(self.slot_columns) + u32::from(self.gap_columns);
        let column = stride.saturating_mul(slot_index as u32).min(u16::MAX as u32);
        (column as u16, 1)
    }

    pub fn slots_that_fit(&self, total_columns: u16) -> usize {
        let stride = u32::from(self.slot_columns) + u32::from(self.gap_columns);
        if stride == 0 {
            return 0;
        }
        (u32::from(total_columns) / stride) as usize
    }
}

/// Textual slider track, thumb marked with `#`.
pub fn slider_line(current_page: usize, page_count: usize, track_width: usize) -> String {
    if page_count <= 1 || track_width == 0 {
        return String::new();
    }
    let last = page_count - 1;
    let thumb = if track_width == 1 {
        0
    } else {
        current_page.min(last) * (track_width - 1) / last
    };
    let mut line = String::with_capacity(track_width + 2);
    line.push('[');
    for cell in 0..track_width {
        line.push(if cell == thumb { '#' } else { '-' });
    }
    line.push(']');
    line
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    BeginDrag,
    DragMove { delta: isize },
    DragTo { page: usize },
    EndDrag,
    SelectPage { page: usize },
    NextPage { count: usize },
    PrevPage { count: usize },
    Resize { columns: u16, rows: u16 },
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    Drag,
}

/// Maps terminal events to slider gestures, retaining numeric prefixes
/// between key events (`12g` jumps to page 12).
#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    mode: InputMode,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.reset_count();
            self.mode = mode;
        }
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        if let Event::Resize(columns, rows) = event {
            return UiEvent::Resize { columns, rows };
        }
        match self.mode {
            InputMode::Normal => self.map_event_normal(event),
            InputMode::Drag => self.map_event_drag(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('j'), KeyModifiers::NONE)
                | (KeyCode::Right, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::NextPage { count }
                }
                (KeyCode::Char('k'), KeyModifiers::NONE)
                | (KeyCode::Left, KeyModifiers::NONE) => {
                    let count = self.take_count();
                    UiEvent::PrevPage { count }
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) => {
                    let page = match self.take_prefix() {
                        Some(number) => number.saturating_sub(1),
                        None => 0,
                    };
                    UiEvent::SelectPage { page }
                }
                (KeyCode::Char('G'), KeyModifiers::SHIFT) | (KeyCode::End, _) => {
                    self.reset_count();
                    UiEvent::SelectPage { page: usize::MAX }
                }
                (KeyCode::Char('s'), KeyModifiers::NONE) | (KeyCode::Enter, _) => {
                    self.reset_count();
                    UiEvent::BeginDrag
                }
                (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_drag(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('l'), KeyModifiers::NONE)
                | (KeyCode::Right, KeyModifiers::NONE) => {
                    let count = self.take_count() as isize;
                    UiEvent::DragMove { delta: count }
                }
                (KeyCode::Char('h'), KeyModifiers::NONE)
                | (KeyCode::Left, KeyModifiers::NONE) => {
                    let count = self.take_count() as isize;
                    UiEvent::DragMove { delta: -count }
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) => match self.take_prefix() {
                    Some(number) => UiEvent::DragTo {
                        page: number.saturating_sub(1),
                    },
                    None => UiEvent::None,
                },
                (KeyCode::Enter, _) | (KeyCode::Esc, _) => {
                    self.reset_count();
                    UiEvent::EndDrag
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    pub fn pending_input(&self) -> Option<String> {
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn take_prefix(&mut self) -> Option<usize> {
        let prefix = self.pending_count.take().filter(|&count| count > 0);
        self.pending_digits.clear();
        prefix
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }
}
