//! Adapter for the peraturan.bpk.go.id regulation search
//!
//! Search results are card based: each `div.card` carries a `/Details/` link,
//! a `div.fw-semibold` line such as "Peraturan Daerah (Perda) Kabupaten
//! Bandung Nomor 55 Tahun 2025", an abstract and an optional `/Download/` link.
//!
//! The site only renders the first ten pagination links, so the page count
//! comes from configuration once the search endpoint has answered.

use crate::config::{SourceConfig, UserAgentConfig};
use crate::source::http::{build_http_client, fetch_html};
use crate::source::text::{clean_text, resolve_href};
use crate::source::{extract_year, DiscoveryError, Item, PageError, PageId, SourceAdapter};
use crate::HarvestError;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use url::Url;

lazy_static! {
    static ref CARD: Selector = Selector::parse("div.card").unwrap();
    static ref DETAILS_LINK: Selector = Selector::parse(r#"a[href*="/Details/"]"#).unwrap();
    static ref DOWNLOAD_LINK: Selector = Selector::parse(r#"a[href*="/Download/"]"#).unwrap();
    static ref INFO: Selector = Selector::parse("div.fw-semibold").unwrap();
    static ref DESCRIPTION: Selector = Selector::parse("div.text-gray-700").unwrap();
    static ref BADGE: Selector = Selector::parse("span.badge").unwrap();
    static ref PAGE_LINK: Selector = Selector::parse("a.page-link").unwrap();
    static ref REGION_RE: Regex = Regex::new(r"(Kabupaten|Kota|Provinsi)\s+([^N]+)").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"Nomor\s+(\d+)").unwrap();
    static ref YEAR_RE: Regex = Regex::new(r"Tahun\s+(\d{4})").unwrap();
}

/// Source adapter for https://peraturan.bpk.go.id
pub struct BpkAdapter {
    id: String,
    base_url: Url,
    search_url: Url,
    client: Client,
    jenis: Vec<String>,
    min_items: usize,
    expected_total_pages: Option<u32>,
    max_pages: Option<u32>,

    /// Page count found by discovery before any max-pages cap; 0 until known
    discovered_pages: AtomicU32,
}

impl BpkAdapter {
    /// Creates the adapter from its source configuration
    pub fn new(source: &SourceConfig, user_agent: &UserAgentConfig) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&source.base_url)?;
        let search_url = base_url.join("Search")?;
        let client = build_http_client(
            user_agent,
            Duration::from_secs(source.request_timeout_secs),
        )?;

        Ok(Self {
            id: source.id.clone(),
            base_url,
            search_url,
            client,
            jenis: source.jenis.clone(),
            min_items: source.min_items,
            expected_total_pages: source.expected_total_pages,
            max_pages: source.max_pages,
            discovered_pages: AtomicU32::new(0),
        })
    }

    /// Search URL for a page; BPK paginates with `p`, not `page`
    fn page_url(&self, page: PageId) -> Url {
        let mut url = self.search_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("keywords", "")
                .append_pair("tentang", "")
                .append_pair("nomor", "");
            for jenis in &self.jenis {
                pairs.append_pair("jenis", jenis);
            }
            pairs.append_pair("p", &page.to_string());
        }
        url
    }

    fn cap(&self, pages: u32) -> u32 {
        self.discovered_pages.store(pages, Ordering::Relaxed);
        match self.max_pages {
            Some(max) if pages > max => max,
            _ => pages,
        }
    }

    /// Highest page number visible in the pagination widget
    fn visible_page_count(html: &str) -> Option<u32> {
        let document = Html::parse_document(html);
        document
            .select(&PAGE_LINK)
            .filter_map(|link| element_text(link).parse::<u32>().ok())
            .max()
    }

    fn parse_listing(&self, html: &str, page: PageId) -> Vec<Item> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for card in document.select(&CARD) {
            if let Some(item) = self.parse_card(card, page) {
                if seen.insert(item.detail_url.clone()) {
                    items.push(item);
                }
            }
        }

        items
    }

    fn parse_card(&self, card: ElementRef, page: PageId) -> Option<Item> {
        let link = card.select(&DETAILS_LINK).next()?;
        let detail_url = resolve_href(&self.base_url, link.value().attr("href")?)?;
        let title = element_text(link);
        if title.is_empty() {
            return None;
        }

        let mut item = Item::new(&self.id, title, detail_url);

        if let Some(info) = card.select(&INFO).next().map(element_text) {
            if let Some(c) = REGION_RE.captures(&info) {
                let rtype = c[1].to_string();
                item.region_name = Some(format!("{} {}", rtype, c[2].trim()));
                item.region_type = Some(rtype);
            }
            item.number = NUMBER_RE.captures(&info).map(|c| c[1].to_string());
            item.year = YEAR_RE.captures(&info).and_then(|c| c[1].parse().ok());
            item.metadata
                .insert("info".to_string(), serde_json::Value::from(info));
        }
        if item.year.is_none() {
            item.year = extract_year(&item.title);
        }

        item.description = card
            .select(&DESCRIPTION)
            .next()
            .map(element_text)
            .filter(|d| !d.is_empty());

        item.document_url = card
            .select(&DOWNLOAD_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| resolve_href(&self.base_url, href));

        let badges: Vec<String> = card
            .select(&BADGE)
            .map(element_text)
            .filter(|b| !b.is_empty())
            .collect();
        if !badges.is_empty() {
            item.status = Some(badges.join(", "));
        }

        item.metadata
            .insert("page".to_string(), serde_json::Value::from(page));
        Some(item)
    }
}

#[async_trait]
impl SourceAdapter for BpkAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn total_pages(&self) -> Result<u32, DiscoveryError> {
        let first_page = fetch_html(&self.client, self.page_url(1).as_str()).await;

        match (first_page, self.expected_total_pages) {
            (Ok(html), Some(expected)) => {
                if Self::visible_page_count(&html).is_some() {
                    tracing::info!("{}: pagination found, using configured total: {}", self.id, expected);
                } else {
                    tracing::warn!("{}: no pagination found, using configured total: {}", self.id, expected);
                }
                Ok(self.cap(expected))
            }
            (Ok(html), None) => Self::visible_page_count(&html)
                .map(|pages| self.cap(pages))
                .ok_or_else(|| {
                    DiscoveryError::Unparseable(format!(
                        "no pagination on {} and no expected-total-pages configured",
                        self.search_url
                    ))
                }),
            (Err(e), Some(expected)) => {
                tracing::warn!("{}: first page request failed ({}), using configured total: {}", self.id, e, expected);
                Ok(self.cap(expected))
            }
            (Err(e), None) => Err(DiscoveryError::Fetch(e)),
        }
    }

    async fn fetch_and_parse(&self, page: PageId) -> Result<Vec<Item>, PageError> {
        let url = self.page_url(page);
        let html = fetch_html(&self.client, url.as_str()).await?;
        let items = self.parse_listing(&html, page);
        tracing::debug!("{}: page {} parsed {} items", self.id, page, items.len());
        Ok(items)
    }

    fn minimum_items(&self, page: PageId, total_pages: u32) -> usize {
        // A max-pages cap does not make the capped page the last one
        let last_page = match self.discovered_pages.load(Ordering::Relaxed) {
            0 => total_pages,
            discovered => discovered,
        };
        if page >= last_page {
            0
        } else {
            self.min_items
        }
    }
}

fn element_text(element: ElementRef) -> String {
    clean_text(&element.text().collect::<String>())
}
