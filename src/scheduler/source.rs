//! Row sources for the scrape scheduler

use crate::collection::Collection;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const COUNTRIES_URL: &str = "https://www.worldometers.info/coronavirus/";
pub const STATES_URL: &str = "https://www.worldometers.info/coronavirus/country/us/";

/// Produces table rows of trimmed text cells, name first.
#[async_trait]
pub trait RowSource: Send + Sync {
    async fn fetch_rows(&self, collection: Collection) -> Result<Vec<Vec<String>>>;
}

/// One HTML page holding a collection's table.
#[derive(Debug, Clone)]
pub struct TablePage {
    pub url: String,
    /// `id` attribute of the `<table>` element.
    pub table_id: String,
    /// Leading columns to drop so rows start with the name.
    pub skip_columns: usize,
}

impl TablePage {
    pub fn countries() -> Self {
        Self {
            url: COUNTRIES_URL.to_string(),
            table_id: "main_table_countries_today".to_string(),
            skip_columns: 1,
        }
    }

    pub fn states() -> Self {
        Self {
            url: STATES_URL.to_string(),
            table_id: "usa_table_countries_today".to_string(),
            skip_columns: 0,
        }
    }
}

/// Timeouts for page fetches, independent of the retry policy.
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            user_agent: concat!("coviddy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Minimal scanner for `<tbody>` rows of a table identified by id.
#[derive(Debug, Clone)]
pub struct TableExtractor {
    tbody: Regex,
    row: Regex,
    cell: Regex,
    tag: Regex,
    space: Regex,
}

impl TableExtractor {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::Internal(format!("invalid table pattern: {}", e)))
        };
        Ok(Self {
            tbody: compile(r"(?is)<tbody[^>]*>(.*?)</tbody>")?,
            row: compile(r"(?is)<tr[^>]*>(.*?)</tr>")?,
            cell: compile(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>")?,
            tag: compile(r"(?s)<[^>]*>")?,
            space: compile(r"\s+")?,
        })
    }

    /// Text cells of every body row of the table with id `table_id`.
    pub fn extract(&self, html: &str, table_id: &str) -> Result<Vec<Vec<String>>> {
        let start = [format!("id=\"{}\"", table_id), format!("id='{}'", table_id)]
            .iter()
            .find_map(|needle| html.find(needle.as_str()))
            .ok_or_else(|| Error::Schema(format!("table #{} not found", table_id)))?;
        let table = &html[start..];
        let table = match table.find("</table>") {
            Some(end) => &table[..end],
            None => table,
        };

        let mut rows = Vec::new();
        for body in self.tbody.captures_iter(table) {
            for row in self.row.captures_iter(&body[1]) {
                let cells = self
                    .cell
                    .captures_iter(&row[1])
                    .map(|cell| self.cell_text(&cell[1]))
                    .collect();
                rows.push(cells);
            }
        }
        Ok(rows)
    }

    fn cell_text(&self, inner: &str) -> String {
        let text = self.tag.replace_all(inner, " ");
        let text = decode_entities(&text);
        self.space.replace_all(text.trim(), " ").into_owned()
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

/// Fetches the countries and states pages over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTableSource {
    client: reqwest::Client,
    countries: TablePage,
    states: TablePage,
    extractor: TableExtractor,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpTableSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()?;
        Ok(Self {
            client,
            countries: TablePage::countries(),
            states: TablePage::states(),
            extractor: TableExtractor::new()?,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_pages(mut self, countries: TablePage, states: TablePage) -> Self {
        self.countries = countries;
        self.states = states;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Stop retry waits once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn page(&self, collection: Collection) -> &TablePage {
        match collection {
            Collection::Countries => &self.countries,
            Collection::States => &self.states,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        retry_with_backoff(&self.retry, &self.cancel, || async move {
            let response = self.client.get(url).send().await?.error_for_status()?;
            Ok::<_, Error>(response.text().await?)
        })
        .await
    }
}

#[async_trait]
impl RowSource for HttpTableSource {
    async fn fetch_rows(&self, collection: Collection) -> Result<Vec<Vec<String>>> {
        let page = self.page(collection);
        let html = self.fetch_page(&page.url).await?;
        let rows = self.extractor.extract(&html, &page.table_id)?;
        debug!(%collection, url = %page.url, rows = rows.len(), "Fetched table");

        Ok(rows
            .into_iter()
            .map(|row| row.into_iter().skip(page.skip_columns).collect())
            .collect())
    }
}
