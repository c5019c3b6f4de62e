use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;

use crate::http::http_client;
use crate::lyrics::parse::parse_plain_lyrics;
use crate::lyrics::providers::LyricsProvider;
use crate::lyrics::types::{LyricsDocument, LyricsError, ProviderResult};
use crate::mpris::metadata::Metadata;

const SEARCH_URL: &str = "https://genius.com/api/search/song";

static LEGACY_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.lyrics").unwrap());
static CONTAINER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"div[class^="Lyrics__Container"]"#).unwrap());

/// Plain lyrics scraped from genius.com song pages.
pub struct Genius;

#[async_trait]
impl LyricsProvider for Genius {
    fn name(&self) -> &'static str {
        "genius"
    }

    fn supports_synchronized(&self) -> bool {
        false
    }

    fn supports_platform(&self) -> bool {
        cfg!(target_os = "linux")
    }

    async fn search(&self, metadata: &Metadata) -> ProviderResult {
        let Some(url) = song_url(&metadata.artist, &metadata.title).await? else {
            tracing::debug!(title = %metadata.title, "Song not found on Genius");
            return Ok(None);
        };

        let resp = http_client().get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(LyricsError::Api(format!("genius: HTTP {}", resp.status())));
        }
        let page = resp.text().await?;

        let lines = parse_plain_lyrics(&extract_lyrics(&page));
        if lines.is_empty() {
            return Ok(None);
        }
        Ok(Some(LyricsDocument::new(self.name(), false, lines)))
    }
}

async fn song_url(artist: &str, title: &str) -> Result<Option<String>, LyricsError> {
    let query = format!("{artist} {title}");
    let url = format!("{SEARCH_URL}?q={}&per_page=1", urlencoding::encode(&query));
    let resp = http_client().get(&url).send().await?;
    if !resp.status().is_success() {
        return Err(LyricsError::Api(format!("genius search: HTTP {}", resp.status())));
    }
    let json: Value = resp.json().await?;
    Ok(json
        .pointer("/response/sections/0/hits/0/result/url")
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

/// Lyrics text of a song page. Old layouts keep everything in one
/// `div.lyrics`; current ones split it over several `Lyrics__Container` divs.
fn extract_lyrics(page: &str) -> String {
    let document = Html::parse_document(page);
    if let Some(legacy) = document.select(&LEGACY_SELECTOR).next() {
        return element_text(legacy).trim().to_string();
    }
    document
        .select(&CONTAINER_SELECTOR)
        .map(element_text)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text content with `<br>` turned into line breaks.
fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if el.name() == "br" => out.push('\n'),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_all_containers() {
        let page = r#"<html><body><div class="Lyrics__Container-sc-1 abc" data-x="1">[Verse]<br/>It&#x27;s <i>me</i><br>
<div class="inner">aside</div>again</div><p>ad</p><div class="Lyrics__Container-sc-1">Last &amp; line</div></body></html>"#;
        let text = extract_lyrics(page);
        assert_eq!(text, "[Verse]\nIt's me\n\nasideagain\nLast & line");
    }

    #[test]
    fn nested_divs_do_not_leak_page_content() {
        let page = r#"<div class="Lyrics__Container-sc-1">line one<div class="spacer"></div></div><footer>About Genius | Terms of Use</footer>"#;
        assert_eq!(extract_lyrics(page), "line one");
    }

    #[test]
    fn legacy_layout_wins() {
        let page = r#"<div class="lyrics">
  <p>Old<br/>school</p>
</div><div class="Lyrics__Container-x">new</div>"#;
        assert_eq!(extract_lyrics(page), "Old\nschool");
    }

    #[test]
    fn page_without_lyrics_is_empty() {
        assert_eq!(extract_lyrics("<html><div>nothing</div></html>"), "");
    }
}
