//! Adapter for the peraturan.go.id regional regulation catalog
//!
//! Listing pages live at `{base}/perda?page=N&per-page=M`. Each regulation is
//! rendered as a detail link (`/id/perda-...`) preceded by a title paragraph,
//! with the PDF link somewhere in the same block.

use crate::config::{SourceConfig, UserAgentConfig};
use crate::source::http::{build_http_client, fetch_html};
use crate::source::text::{clean_text, resolve_href};
use crate::source::{
    extract_number, extract_region, extract_year, DiscoveryError, Item, PageError, PageId,
    SourceAdapter,
};
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
    static ref DETAIL_LINK: Selector = Selector::parse(r#"a[href*="/id/perda-"]"#).unwrap();
    static ref PDF_LINK: Selector = Selector::parse(r#"a[href*=".pdf"]"#).unwrap();
    static ref ANY_LINK: Selector = Selector::parse("a[href]").unwrap();
    static ref FIRST_LINK: Selector = Selector::parse("a").unwrap();
    static ref PARAGRAPH: Selector = Selector::parse("p").unwrap();
    static ref PAGINATION_LINK: Selector =
        Selector::parse("ul.pagination a, div.pagination a").unwrap();
    static ref TOTAL_FOUND_RE: Regex = Regex::new(r"(?i)(\d[\d.,]*)\s*perda\s*ditemukan").unwrap();
}

/// Source adapter for https://peraturan.go.id
pub struct PeraturanGoIdAdapter {
    id: String,
    base_url: Url,
    listing_url: Url,
    client: Client,
    items_per_page: u32,
    min_items: usize,
    expected_total_items: Option<u64>,
    max_pages: Option<u32>,

    /// Page count found by discovery before any max-pages cap; 0 until known
    discovered_pages: AtomicU32,
}

impl PeraturanGoIdAdapter {
    /// Creates the adapter from its source configuration
    pub fn new(source: &SourceConfig, user_agent: &UserAgentConfig) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&source.base_url)?;
        let listing_url = base_url.join("perda")?;
        let client = build_http_client(
            user_agent,
            Duration::from_secs(source.request_timeout_secs),
        )?;

        Ok(Self {
            id: source.id.clone(),
            base_url,
            listing_url,
            client,
            items_per_page: source.items_per_page,
            min_items: source.min_items,
            expected_total_items: source.expected_total_items,
            max_pages: source.max_pages,
            discovered_pages: AtomicU32::new(0),
        })
    }

    fn page_url(&self, page: PageId) -> Url {
        let mut url = self.listing_url.clone();
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per-page", &self.items_per_page.to_string());
        url
    }

    fn cap(&self, pages: u32) -> u32 {
        self.discovered_pages.store(pages, Ordering::Relaxed);
        match self.max_pages {
            Some(max) if pages > max => {
                tracing::info!("{}: capping {} pages at {}", self.id, pages, max);
                max
            }
            _ => pages,
        }
    }

    /// Derives the page count from a listing document
    ///
    /// Tries the "N Perda ditemukan" banner first, then the highest pagination
    /// link, then the configured expected item count.
    fn discover_pages(&self, html: &str) -> Result<u32, DiscoveryError> {
        let document = Html::parse_document(html);
        let text: String = document.root_element().text().collect();
        let per_page = u64::from(self.items_per_page.max(1));

        if let Some(total) = TOTAL_FOUND_RE
            .captures(&text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().replace(['.', ','], "").parse::<u64>().ok())
        {
            let pages = total.div_ceil(per_page) as u32;
            tracing::info!("{}: found {} total items, {} pages", self.id, total, pages);
            return Ok(pages);
        }

        let mut max_page = 1u32;
        for link in document.select(&PAGINATION_LINK) {
            if let Some(page) = link
                .value()
                .attr("href")
                .and_then(|href| self.base_url.join(href).ok())
                .and_then(|url| {
                    url.query_pairs()
                        .find(|(k, _)| k == "page")
                        .and_then(|(_, v)| v.parse::<u32>().ok())
                })
            {
                max_page = max_page.max(page);
            }
            if let Ok(page) = element_text(link).parse::<u32>() {
                max_page = max_page.max(page);
            }
        }
        if max_page > 1 {
            return Ok(max_page);
        }

        match self.expected_total_items {
            Some(expected) => {
                let pages = expected.div_ceil(per_page) as u32;
                tracing::warn!(
                    "{}: could not determine total pages, using expected: {}",
                    self.id,
                    pages
                );
                Ok(pages)
            }
            None => Err(DiscoveryError::Unparseable(format!(
                "no item count or pagination on {}",
                self.listing_url
            ))),
        }
    }

    /// Parses one listing page into items
    fn parse_listing(&self, html: &str, page: PageId) -> Vec<Item> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for link in document.select(&DETAIL_LINK) {
            let parent = link.parent().and_then(ElementRef::wrap);
            let title_para = parent.and_then(find_title_paragraph);
            let pdf_link = parent.and_then(|p| {
                let area = p.parent().and_then(ElementRef::wrap).unwrap_or(p);
                area.select(&PDF_LINK).next()
            });

            if let Some(item) = self.build_item(link, pdf_link, title_para, page) {
                if seen.insert(item.detail_url.clone()) {
                    items.push(item);
                }
            }
        }

        if items.is_empty() {
            items = self.parse_listing_by_paragraphs(&document, page);
        }

        items
    }

    /// Alternative layout: title paragraph, link paragraph, PDF block as siblings
    fn parse_listing_by_paragraphs(&self, document: &Html, page: PageId) -> Vec<Item> {
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for para in document.select(&PARAGRAPH) {
            if !element_text(para).contains("Peraturan Daerah") {
                continue;
            }

            let Some(next) = next_element_sibling(para) else {
                continue;
            };
            if next.value().name() != "p" {
                continue;
            }
            let Some(link) = next.select(&FIRST_LINK).next() else {
                continue;
            };

            let pdf_link = next_element_sibling(next).and_then(|c| c.select(&PDF_LINK).next());
            if let Some(item) = self.build_item(link, pdf_link, Some(para), page) {
                if seen.insert(item.detail_url.clone()) {
                    items.push(item);
                }
            }
        }

        items
    }

    fn build_item(
        &self,
        link: ElementRef,
        pdf_link: Option<ElementRef>,
        title_para: Option<ElementRef>,
        page: PageId,
    ) -> Option<Item> {
        let detail_url = resolve_href(&self.base_url, link.value().attr("href")?)?;
        let description = element_text(link);
        let title_text = title_para.map(element_text).filter(|t| !t.is_empty());

        let title = match &title_text {
            Some(title) => title.clone(),
            None if !description.is_empty() => description.clone(),
            None => return None,
        };

        let mut item = Item::new(&self.id, title, detail_url);
        let text = title_text.as_deref().unwrap_or(&description);
        item.year = extract_year(text);
        item.number = extract_number(text);
        let region = extract_region(text);
        item.region_name = region.name;
        item.region_type = region.region_type;

        if !description.is_empty() {
            item.description = Some(description);
        }
        item.document_url = pdf_link
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| resolve_href(&self.base_url, href));
        item.metadata
            .insert("page".to_string(), serde_json::Value::from(page));

        Some(item)
    }
}

#[async_trait]
impl SourceAdapter for PeraturanGoIdAdapter {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn total_pages(&self) -> Result<u32, DiscoveryError> {
        let html = fetch_html(&self.client, self.listing_url.as_str()).await?;
        let pages = self.discover_pages(&html)?;
        Ok(self.cap(pages))
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

    async fn resolve_document_url(&self, item: &Item) -> Option<String> {
        let html = match fetch_html(&self.client, &item.detail_url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::debug!("Detail page {} unavailable: {}", item.detail_url, e);
                return None;
            }
        };

        let document = Html::parse_document(&html);
        let found = document.select(&ANY_LINK).find_map(|link| {
            let href = link.value().attr("href")?;
            let text = element_text(link).to_lowercase();
            if href.to_lowercase().contains(".pdf")
                || text.contains("download")
                || text.contains("unduh")
            {
                resolve_href(&self.base_url, href)
            } else {
                None
            }
        });

        if let Some(url) = &found {
            tracing::debug!("Found document URL on detail page: {}", url);
        }
        found
    }
}

/// Walks up from `start`, returning the first preceding `<p>` sibling that
/// looks like a regulation title
fn find_title_paragraph(start: ElementRef) -> Option<ElementRef> {
    let mut container = Some(start);
    while let Some(node) = container {
        let name = node.value().name();
        if name == "body" || name == "html" {
            break;
        }

        if let Some(prev) = node.prev_siblings().find_map(ElementRef::wrap) {
            if prev.value().name() == "p" {
                let text = element_text(prev);
                if text.contains("Peraturan Daerah") || text.contains("Nomor") {
                    return Some(prev);
                }
            }
        }

        container = node.parent().and_then(ElementRef::wrap);
    }
    None
}

fn next_element_sibling(element: ElementRef) -> Option<ElementRef> {
    element.next_siblings().find_map(ElementRef::wrap)
}

fn element_text(element: ElementRef) -> String {
    clean_text(&element.text().collect::<String>())
}
