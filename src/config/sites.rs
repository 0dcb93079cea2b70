use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Per-site selector overrides, matched against the current URL.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SiteOverride {
    pub name: String,
    pub pattern: String,
    pub search_selector: Option<String>,
    /// `None` means the query is submitted with Enter
    pub search_button: Option<String>,
    #[serde(default)]
    pub first_item_selectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// `{query}` is replaced by the url-encoded query
    pub default_search_url: String,
    pub searchable_sites: Vec<String>,
    pub generic_search_selectors: Vec<String>,
    pub generic_first_item_selectors: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_search_url: "https://www.google.com/search?q={query}".to_string(),
            searchable_sites: strings(&[
                "google.com",
                "bing.com",
                "duckduckgo.com",
                "yahoo.com",
                "youtube.com",
                "amazon.com",
                "wikipedia.org",
                "reddit.com",
                "twitter.com",
                "linkedin.com",
            ]),
            generic_search_selectors: strings(&[
                "input[type='search']",
                "input[name='q']",
                "input[name='query']",
                "input[name='search']",
                "input[placeholder*='search' i]",
                "input[aria-label*='search' i]",
                "input.search",
                "#search",
                ".search-input",
                "[role='search'] input",
            ]),
            generic_first_item_selectors: strings(&[
                ".search-results a",
                ".results a",
                ".search-result a",
                "article a",
                ".product-list a",
                ".item a",
                "ul li a",
                "div[role='main'] a",
            ]),
        }
    }
}

impl SearchConfig {
    pub fn is_searchable(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.searchable_sites.iter().any(|site| url.contains(site.as_str()))
    }

    pub fn search_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        self.default_search_url.replace("{query}", &encoded)
    }
}

/// Site overrides with their patterns compiled once.
#[derive(Debug, Clone)]
pub struct SiteTable {
    sites: Vec<(Regex, SiteOverride)>,
}

impl SiteTable {
    pub fn new(sites: &[SiteOverride]) -> Result<Self> {
        let sites = sites
            .iter()
            .map(|site| {
                Regex::new(&site.pattern)
                    .map(|re| (re, site.clone()))
                    .map_err(|e| AgentError::Config(format!("Invalid pattern for site '{}': {}", site.name, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sites })
    }

    /// First override whose pattern matches the url.
    pub fn site_for(&self, url: &str) -> Option<&SiteOverride> {
        let url = url.to_lowercase();
        self.sites
            .iter()
            .find(|(re, _)| re.is_match(&url))
            .map(|(_, site)| site)
    }
}

pub fn default_sites() -> Vec<SiteOverride> {
    vec![
        site(
            "amazon",
            r"amazon\.(com|in|co\.uk|ca|de|jp|fr)",
            Some("#twotabsearchtextbox"),
            Some("input[type='submit'][value='Go']"),
            &[
                "div[data-component-type='s-search-result'] h2 a",
                ".s-result-item h2 a",
                ".s-search-results .a-link-normal.a-text-normal",
            ],
        ),
        site(
            "google",
            r"google\.(com|co\.in|co\.uk|ca|de|jp|fr)",
            Some("textarea[name='q'], input[name='q']"),
            None,
            &[".g a", "div.yuRUbf > a", "#search .g .yuRUbf > a"],
        ),
        site(
            "youtube",
            r"youtube\.com",
            Some("input#search"),
            None,
            &["#contents ytd-video-renderer a#video-title", "ytd-video-renderer .title-and-badge a"],
        ),
        site("github", r"github\.com", Some("[data-target='qbsearch-input.queryInput']"), None, &[]),
        site("twitter", r"(twitter\.com|x\.com)", Some("[data-testid='SearchBox_Search_Input']"), None, &[]),
        site("reddit", r"reddit\.com", Some("input[name='q']"), None, &[]),
        site(
            "ebay",
            r"ebay\.(com|in|co\.uk|ca|de|jp|fr)",
            Some("input[name='_nkw']"),
            Some("input[type='submit']"),
            &[".s-item__link", ".srp-results .s-item__title"],
        ),
        site(
            "walmart",
            r"walmart\.com",
            Some("input[name='q']"),
            Some("[data-automation-id='search-icon']"),
            &["a[data-testid='product-title']", ".mb1 a"],
        ),
        site(
            "target",
            r"target\.com",
            Some("input[name='searchTerm']"),
            Some("button[data-test='@web/Search/SearchButton']"),
            &["a[data-test='product-link']"],
        ),
        site(
            "bestbuy",
            r"bestbuy\.com",
            Some("input[id='gh-search-input']"),
            Some("button.header-search-button"),
            &[".sku-title a", ".shop-sku-list-item a"],
        ),
    ]
}

fn site(
    name: &str,
    pattern: &str,
    search_selector: Option<&str>,
    search_button: Option<&str>,
    first_items: &[&str],
) -> SiteOverride {
    SiteOverride {
        name: name.to_string(),
        pattern: pattern.to_string(),
        search_selector: search_selector.map(String::from),
        search_button: search_button.map(String::from),
        first_item_selectors: strings(first_items),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
