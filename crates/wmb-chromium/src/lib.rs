//! Chromium adapter.
//!
//! This crate implements the `wmb-core` RenderBackend port with headless
//! Chromium: the table layout becomes a minimal HTML page on disk, Chromium
//! screenshots it at exactly the layout's canvas size, and the resulting PNG
//! is decoded once to prove it is a real image before it leaves this crate.

use std::{
    fmt::Write as _,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use tokio::process::Command;

use wmb_core::{
    errors::Error,
    render::RenderBackend,
    table::{TableLayout, CELL_PADDING, LINE_HEIGHT, MARGIN},
    Result,
};

/// Binary names probed on PATH when `CHROME_PATH` is not set.
const CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
];

pub struct ChromiumRenderer {
    binary: Option<PathBuf>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ChromiumRenderer {
    /// `work_dir` holds the transient HTML and PNG files; both are removed
    /// after every run, successful or not.
    pub fn new(work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            binary: std::env::var_os("CHROME_PATH").map(PathBuf::from),
            work_dir,
            timeout,
        }
    }

    fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(explicit) = &self.binary {
            return Ok(explicit.clone());
        }
        CANDIDATES
            .iter()
            .find_map(|name| which_in_path(name))
            .ok_or_else(|| {
                Error::Render("no chromium binary found on PATH; set CHROME_PATH".to_string())
            })
    }

    async fn capture(
        &self,
        binary: &Path,
        html_path: &Path,
        png_path: &Path,
        layout: &TableLayout,
    ) -> Result<Vec<u8>> {
        let mut cmd = Command::new(binary);
        cmd.args(screenshot_args(png_path, layout.width, layout.height))
            .arg(html_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Render(format!(
                    "renderer timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Render(format!("failed to run {}: {e}", binary.display())))?;
        if !output.status.success() {
            return Err(Error::Render(format!(
                "renderer exited with {}: {}",
                output.status,
                stderr_tail(&String::from_utf8_lossy(&output.stderr))
            )));
        }

        let bytes = tokio::fs::read(png_path)
            .await
            .map_err(|e| Error::Render(format!("renderer produced no screenshot: {e}")))?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| Error::Render(format!("undecodable screenshot: {e}")))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(Error::Render("screenshot has zero dimensions".to_string()));
        }
        Ok(bytes)
    }
}

#[async_trait]
impl RenderBackend for ChromiumRenderer {
    async fn render(&self, layout: &TableLayout) -> Result<Vec<u8>> {
        let binary = self.resolve_binary()?;
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let html_path = self.work_dir.join(format!("tmp-{stamp}.html"));
        let png_path = self.work_dir.join(format!("tmp-{stamp}.png"));
        tokio::fs::write(&html_path, build_html(layout)).await?;

        let result = self.capture(&binary, &html_path, &png_path, layout).await;

        let _ = tokio::fs::remove_file(&html_path).await;
        let _ = tokio::fs::remove_file(&png_path).await;
        result
    }
}

/// Last few meaningful stderr lines, joined for a one-line log message.
/// Chromium is chatty on startup; the tail is where the actual failure is.
fn stderr_tail(stderr: &str) -> String {
    const TAIL_LINES: usize = 5;
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(TAIL_LINES);
    lines[start..].join(" | ")
}

fn which_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

fn screenshot_args(png_path: &Path, width: u32, height: u32) -> Vec<String> {
    vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--hide-scrollbars".to_string(),
        format!("--screenshot={}", png_path.display()),
        format!("--window-size={width},{height}"),
    ]
}

/// The layout already decided geometry and wrapping; the HTML only paints it.
/// Fixed table layout plus pre-wrapped lines keep Chromium from re-flowing.
fn build_html(layout: &TableLayout) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        "<!doctype html><html><head><meta charset=\"utf-8\"><style>\
         body{{margin:{MARGIN}px;font:13px/{LINE_HEIGHT}px monospace;color:#222;}}\
         h2{{margin:0 0 12px 0;font-size:18px;}}\
         table{{border-collapse:collapse;table-layout:fixed;}}\
         th,td{{border:1px solid #999;padding:{CELL_PADDING}px;vertical-align:top;\
         overflow:hidden;text-align:left;}}\
         th{{background:#f0f0f0;font-weight:bold;text-align:center;text-transform:uppercase;}}\
         tbody tr:nth-child(even) td{{background:#fafafa;}}\
         </style></head><body>"
    );

    let _ = write!(html, "<h2>{}</h2><table><colgroup>", escape(&layout.title));
    for column in &layout.columns {
        let _ = write!(html, "<col style=\"width:{}px\">", column.width);
    }
    html.push_str("</colgroup><thead><tr>");
    for column in &layout.columns {
        let _ = write!(html, "<th>{}</th>", escape(&column.header));
    }
    html.push_str("</tr></thead><tbody>");

    for row in &layout.rows {
        html.push_str("<tr>");
        for cell in &row.cells {
            let lines: Vec<String> = cell.iter().map(|line| escape(line)).collect();
            let _ = write!(html, "<td>{}</td>", lines.join("<br>"));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table></body></html>");
    html
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
