//! Report pipeline: window → fetch → filter → CSV audit file → layout →
//! render → PNG. A linear sequence of steps, each a hard dependency on the
//! previous one; an empty record set is not an error and still renders a
//! header-only table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::{
    config::Config,
    domain::ReportArtifact,
    errors::Error,
    records::{self, FilteredRecord},
    render::RenderBackend,
    table,
    whatap::RecordSource,
    window::ReportWindow,
    Result,
};

const COLUMNS: [&str; 4] = ["class", "service", "msg", "count"];

/// Pipeline port, so the message handler can be tested with a recording stub.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// `None` means the default daily window.
    async fn generate(&self, window: Option<ReportWindow>) -> Result<ReportArtifact>;
}

pub struct ReportPipeline {
    cfg: Arc<Config>,
    source: Arc<dyn RecordSource>,
    renderer: Arc<dyn RenderBackend>,
}

impl ReportPipeline {
    pub fn new(
        cfg: Arc<Config>,
        source: Arc<dyn RecordSource>,
        renderer: Arc<dyn RenderBackend>,
    ) -> Self {
        Self {
            cfg,
            source,
            renderer,
        }
    }
}

#[async_trait]
impl ReportGenerator for ReportPipeline {
    async fn generate(&self, window: Option<ReportWindow>) -> Result<ReportArtifact> {
        let window =
            window.unwrap_or_else(|| ReportWindow::default_for(Utc::now(), self.cfg.tz_offset));

        let raw = self.source.fetch_records(&window).await?;
        let filtered = records::normalize_and_filter(raw, &self.cfg.excluded_classes);
        println!(
            "[REPORT] fetched {} records for {}",
            filtered.len(),
            window.title()
        );

        tokio::fs::create_dir_all(&self.cfg.reports_dir).await?;

        // Operators look reports up by the day they were produced, so the
        // filename date is "today", not the window being summarized.
        let stem = artifact_stem(Utc::now().with_timezone(&self.cfg.tz_offset), &self.cfg.report_label);
        let csv_path = self.cfg.reports_dir.join(format!("{stem}.csv"));
        tokio::fs::write(&csv_path, records_to_csv(&filtered)).await?;
        println!("[REPORT] csv written: {}", csv_path.display());

        let rows: Vec<Vec<String>> = filtered
            .iter()
            .map(|r| {
                vec![
                    r.class.clone(),
                    r.service.clone(),
                    r.message.clone(),
                    r.count.to_string(),
                ]
            })
            .collect();
        let layout = table::layout(&window.title(), &COLUMNS, &rows);

        let png = tokio::time::timeout(self.cfg.render_timeout, self.renderer.render(&layout))
            .await
            .map_err(|_| Error::Render("render timed out".to_string()))??;

        let image_path = self.cfg.reports_dir.join(format!("{stem}.png"));
        tokio::fs::write(&image_path, &png).await?;
        println!("[REPORT] image written: {}", image_path.display());

        Ok(ReportArtifact {
            csv_path,
            image_path,
            caption: stem.clone(),
            filename: stem,
            png,
        })
    }
}

/// `<dd Month> Error Monitoring <label>`, e.g. `05 March Error Monitoring WhaTap`.
fn artifact_stem(today: DateTime<FixedOffset>, label: &str) -> String {
    format!("{} Error Monitoring {}", today.format("%d %B"), label)
}

/// Quote-all CSV with inner quotes doubled; header matches the wire field
/// names, not the struct field names.
fn records_to_csv(records: &[FilteredRecord]) -> String {
    let mut out = String::from("class,service,msg,count\n");
    for r in records {
        let fields = [
            r.class.as_str(),
            r.service.as_str(),
            r.message.as_str(),
            &r.count.to_string(),
        ];
        let line = fields
            .iter()
            .map(|f| format!("\"{}\"", f.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    out
}
