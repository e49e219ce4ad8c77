//! Table layout engine.
//!
//! Computes a fixed-layout table from uniform-schema rows: clamped column
//! widths, greedy whitespace wrapping (never mid-word), per-row heights and a
//! canvas sized exactly to content. The render backend only draws what is
//! decided here, so every backend produces the same geometry.

/// Monospace measurement model: one character cell is this many pixels wide.
pub const CHAR_WIDTH: u32 = 8;
pub const LINE_HEIGHT: u32 = 18;
pub const CELL_PADDING: u32 = 8;
pub const MIN_COL_WIDTH: u32 = 60;
pub const MAX_COL_WIDTH: u32 = 420;
pub const MARGIN: u32 = 24;
pub const TITLE_BAND: u32 = 36;

#[derive(Clone, Debug)]
pub struct Column {
    pub header: String,
    pub width: u32,
}

#[derive(Clone, Debug)]
pub struct Row {
    /// Wrapped lines per cell, one entry per column.
    pub cells: Vec<Vec<String>>,
    pub height: u32,
}

#[derive(Clone, Debug)]
pub struct TableLayout {
    pub title: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
    pub header_height: u32,
    /// Full canvas size, margins included.
    pub width: u32,
    pub height: u32,
}

pub fn layout(title: &str, headers: &[&str], rows: &[Vec<String>]) -> TableLayout {
    let ncols = headers.len();

    let columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let mut chars = header.chars().count();
            for row in rows {
                if let Some(cell) = row.get(i) {
                    chars = chars.max(cell.chars().count());
                }
            }
            let width =
                (chars as u32 * CHAR_WIDTH + 2 * CELL_PADDING).clamp(MIN_COL_WIDTH, MAX_COL_WIDTH);
            Column {
                header: header.to_string(),
                width,
            }
        })
        .collect();

    let usable: Vec<usize> = columns
        .iter()
        .map(|c| (((c.width - 2 * CELL_PADDING) / CHAR_WIDTH).max(1)) as usize)
        .collect();

    let rows: Vec<Row> = rows
        .iter()
        .map(|row| {
            let cells: Vec<Vec<String>> = (0..ncols)
                .map(|i| wrap_text(row.get(i).map(String::as_str).unwrap_or(""), usable[i]))
                .collect();
            let lines = cells.iter().map(Vec::len).max().unwrap_or(1) as u32;
            Row {
                cells,
                height: lines.max(1) * LINE_HEIGHT + 2 * CELL_PADDING,
            }
        })
        .collect();

    let header_height = LINE_HEIGHT + 2 * CELL_PADDING;
    let width = columns.iter().map(|c| c.width).sum::<u32>() + 2 * MARGIN;
    let height =
        2 * MARGIN + TITLE_BAND + header_height + rows.iter().map(|r| r.height).sum::<u32>();

    TableLayout {
        title: title.to_string(),
        columns,
        rows,
        header_height,
        width,
        height,
    }
}

/// Greedy wrap on whitespace boundaries. A word longer than `max_chars` gets
/// its own line rather than being split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
