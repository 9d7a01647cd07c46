//! Sitemap discovery (SPEC_FULL.md §E): when a fetched page is the root of
//! its site, check `/sitemap.xml` for additional URLs to seed. Extraction
//! is the teacher's line-oriented `<loc>` scan rather than a full XML
//! parser - sitemaps are large, flat, and namespaced in ways `scraper`
//! doesn't handle well, so the teacher never reached for a real XML crate
//! for this either.

use tracing::debug;
use url::Url;

const SITEMAP_PATHS: &[&str] = &["/sitemap.xml", "/sitemap_index.xml"];
const MAX_SITEMAPS: usize = 25;

pub async fn discover_sitemap_urls(client: &reqwest::Client, page_url: &Url) -> anyhow::Result<Vec<String>> {
    let mut origin = page_url.clone();
    origin.set_path("");
    origin.set_query(None);

    let mut all_urls = Vec::new();
    for path in SITEMAP_PATHS {
        let sitemap_url = format!("{}{}", origin.as_str().trim_end_matches('/'), path);
        if let Ok(urls) = fetch_and_parse(client, &sitemap_url).await {
            all_urls.extend(urls);
            break;
        }
    }

    all_urls.sort();
    all_urls.dedup();
    Ok(all_urls)
}

async fn fetch_and_parse(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<String>> {
    let mut all_urls = Vec::new();
    let mut pending = vec![url.to_string()];
    let mut processed = std::collections::HashSet::new();

    while let Some(sitemap_url) = pending.pop() {
        if !processed.insert(sitemap_url.clone()) || processed.len() > MAX_SITEMAPS {
            continue;
        }

        let response = client.get(&sitemap_url).send().await?;
        if !response.status().is_success() {
            continue;
        }
        let text = response.text().await?;

        if text.contains("<sitemapindex") {
            pending.extend(extract_locs(&text));
        } else {
            all_urls.extend(extract_locs(&text));
        }
    }

    debug!(url, count = all_urls.len(), "sitemap discovery found urls");
    Ok(all_urls)
}

fn extract_locs(xml: &str) -> Vec<String> {
    let mut locs = Vec::new();
    for line in xml.lines() {
        let line = line.trim();
        if let (Some(start), Some(end)) = (line.find("<loc>"), line.find("</loc>")) {
            let raw = &line[start + 5..end];
            locs.push(
                raw.replace("&amp;", "&")
                    .replace("&lt;", "<")
                    .replace("&gt;", ">")
                    .replace("&quot;", "\"")
                    .replace("&apos;", "'"),
            );
        }
    }
    locs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_locs_from_simple_sitemap() {
        let xml = r#"<urlset>
  <url><loc>https://example.com/a</loc></url>
  <url><loc>https://example.com/b?x=1&amp;y=2</loc></url>
</urlset>"#;
        let urls = extract_locs(xml);
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b?x=1&y=2"]);
    }
}
