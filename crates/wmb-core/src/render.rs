use async_trait::async_trait;

use crate::{table::TableLayout, Result};

/// Render port.
///
/// Turns a computed table layout into PNG bytes. The headless-Chromium
/// screenshot adapter is the shipped implementation; the layout carries exact
/// pixel geometry so an in-process 2D-canvas adapter can be dropped in without
/// touching core.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    async fn render(&self, layout: &TableLayout) -> Result<Vec<u8>>;
}
