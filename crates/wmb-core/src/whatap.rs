//! Report source client: authenticated fetch against the WhaTap dashboard.
//!
//! Each pipeline run re-authenticates from scratch (login page → CSRF token →
//! form login → stat query). No session caching: the latency cost buys freedom
//! from stale-session failures.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::{config::{Config, CredentialStore}, errors::Error, records::RawRecord, window::ReportWindow, Result};

/// Fetch port for the report pipeline, so the pipeline can be tested without
/// a dashboard.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, window: &ReportWindow) -> Result<Vec<RawRecord>>;
}

pub struct WhatapClient {
    cfg: Arc<Config>,
    creds: Arc<CredentialStore>,
}

#[derive(Debug, Deserialize)]
struct FlushResponse {
    #[serde(default)]
    records: Vec<RawRecord>,
}

impl WhatapClient {
    pub fn new(cfg: Arc<Config>, creds: Arc<CredentialStore>) -> Self {
        Self { cfg, creds }
    }

    async fn login(&self, client: &reqwest::Client, base: &str, email: &str) -> Result<()> {
        let url = format!("{base}/account/login");

        let page = client.get(&url).send().await.map_err(request_error)?;
        if !page.status().is_success() {
            return Err(Error::SourceUnavailable(format!(
                "login page returned {}",
                page.status()
            )));
        }
        let html = page.text().await.map_err(request_error)?;
        let token = extract_csrf_token(&html)
            .ok_or_else(|| Error::SourceUnavailable("CSRF token not found on login page".to_string()))?;

        let password = self.creds.password().await.ok_or_else(|| {
            Error::SourceUnavailable("APP_PASSWORD is not configured".to_string())
        })?;
        let form = [
            ("email", email),
            ("password", password.as_str()),
            ("remember", "on"),
            ("_csrf", token.as_str()),
        ];

        let resp = client.post(&url).form(&form).send().await.map_err(request_error)?;
        let status = resp.status();
        // Successful login answers 2xx or redirects to the dashboard.
        if !(status.is_success() || status.is_redirection()) {
            return Err(Error::SourceUnavailable(format!(
                "login failed with status {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for WhatapClient {
    async fn fetch_records(&self, window: &ReportWindow) -> Result<Vec<RawRecord>> {
        let base = self.cfg.base_url.as_deref().ok_or_else(|| {
            Error::SourceUnavailable("BASE_URL is not configured".to_string())
        })?;
        let email = self.cfg.app_email.as_deref().ok_or_else(|| {
            Error::SourceUnavailable("APP_EMAIL is not configured".to_string())
        })?;

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.cfg.source_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::SourceUnavailable(format!("http client build failed: {e}")))?;

        self.login(&client, base, email).await?;

        let query = flush_query(self.cfg.project_code, window);
        let resp = client
            .post(format!("{base}/yard/api/flush"))
            .json(&query)
            .send()
            .await
            .map_err(request_error)?;
        if !resp.status().is_success() {
            return Err(Error::SourceUnavailable(format!(
                "stat query failed with status {}",
                resp.status()
            )));
        }

        let body: FlushResponse = resp
            .json()
            .await
            .map_err(|e| Error::SourceUnavailable(format!("stat response decode failed: {e}")))?;
        Ok(body.records)
    }
}

fn request_error(e: reqwest::Error) -> Error {
    Error::SourceUnavailable(format!("request failed: {e}"))
}

fn extract_csrf_token(html: &str) -> Option<String> {
    let re = Regex::new(r#"name="_csrf"\s+[^>]*value="([^"]+)""#).expect("valid regex");
    re.captures(html).map(|c| c[1].to_string())
}

/// Body of the aggregated error-stat query.
fn flush_query(pcode: u32, window: &ReportWindow) -> serde_json::Value {
    json!({
        "type": "stat",
        "path": "ap",
        "pcode": pcode,
        "params": {
            "stime": window.start_millis(),
            "etime": window.end_millis(),
            "ptotal": 100,
            "skip": 0,
            "psize": 1000,
            "filter": {},
            "order": "count",
            "type": "error",
            "textLength": 0,
            "oids": [],
        },
    })
}
