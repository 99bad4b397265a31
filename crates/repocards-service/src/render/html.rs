use std::fmt::Write;

use chrono::{DateTime, Utc};
use url::Url;

use crate::config::RenderConfig;
use crate::fetch::Resource;

use super::{Card, Locale, RenderError, RenderSurface};

const FALLBACK_COLOR: &str = "#8b949e";

/// Escapes the characters that are significant in HTML text and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// The badge color for a category label.
pub fn language_color(language: Option<&str>) -> &'static str {
    match language {
        Some("JavaScript") => "#f1e05a",
        Some("TypeScript") => "#3178c6",
        Some("Python") => "#3572A5",
        Some("C++") => "#f34b7d",
        Some("C") => "#555555",
        Some("HTML") => "#e34c26",
        Some("CSS") => "#563d7c",
        Some("Rust") => "#dea584",
        _ => FALLBACK_COLOR,
    }
}

/// Dark text on the light badges, white on everything else.
fn badge_text_color(background: &str) -> &'static str {
    match background {
        "#f1e05a" | "#e34c26" => "#000",
        _ => "#fff",
    }
}

fn truncate(s: &str, max_chars: usize) -> (&str, bool) {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}

/// Renders the markup of single cards.
#[derive(Debug, Clone)]
pub struct HtmlRenderer {
    locale: Locale,
    repo_url_base: Url,
    max_description: usize,
    now: Option<DateTime<Utc>>,
}

impl HtmlRenderer {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            locale: config.locale,
            repo_url_base: config.repo_url_base.clone(),
            max_description: config.max_description,
            now: None,
        }
    }

    /// Pins the time relative timestamps are computed against.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    fn repo_url(&self, key: &str) -> String {
        let mut url = self.repo_url_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key);
        }
        url.into()
    }

    /// A placeholder shown while the fetch is pending.
    pub fn loading_card(&self) -> String {
        concat!(
            r#"<div class="col-12 col-md-6 col-lg-4">"#,
            r#"<div class="sponsor-logo-card p-3 h-100 skeleton" aria-hidden="true">"#,
            r#"<div class="skeleton-title"></div>"#,
            r#"<div class="skeleton-line"></div>"#,
            r#"<div class="skeleton-line short"></div>"#,
            r#"<div class="skeleton-footer"></div>"#,
            "</div></div>",
        )
        .to_owned()
    }

    /// A card for a key that could not be loaded, with the failure reason if known.
    pub fn error_card(&self, key: &str, reason: Option<&str>) -> String {
        let mut html = String::new();
        html.push_str(r#"<div class="col-12 col-md-6 col-lg-4">"#);
        html.push_str(r#"<div class="sponsor-logo-card p-3 h-100">"#);
        let _ = write!(html, r#"<h3 class="h5 text-white">{}</h3>"#, escape_html(key));
        let _ = write!(html, r#"<p class="text-white">{}</p>"#, self.locale.load_failed());
        if let Some(reason) = reason {
            let _ = write!(
                html,
                r#"<div class="text-white-50 small mt-2">{}</div>"#,
                escape_html(reason)
            );
        }
        let _ = write!(
            html,
            r#"<div class="mt-2"><a href="{}" target="_blank" rel="noopener noreferrer" class="small text-white">{}</a></div>"#,
            escape_html(&self.repo_url(key)),
            self.locale.see_repo()
        );
        html.push_str("</div></div>");
        html
    }

    /// A card describing a loaded resource.
    pub fn resource_card(&self, resource: &Resource) -> String {
        let description = match resource.description.as_deref().unwrap_or_default() {
            "" => format!(
                r#"<span class="text-white">{}</span>"#,
                self.locale.no_description()
            ),
            description => match truncate(description, self.max_description) {
                (short, true) => format!("{}…", escape_html(short)),
                (full, false) => escape_html(full),
            },
        };
        let updated = resource
            .updated_at
            .map(|then| {
                self.locale
                    .relative_time(then, self.now.unwrap_or_else(Utc::now))
            })
            .unwrap_or_default();
        let url = resource.html_url.as_deref().unwrap_or("#");

        let mut html = String::new();
        html.push_str(r#"<div class="col-12 col-md-6 col-lg-4">"#);
        let _ = write!(
            html,
            r#"<a class="text-decoration-none" href="{}" target="_blank" rel="noopener noreferrer">"#,
            escape_html(url)
        );
        html.push_str(r#"<div class="sponsor-logo-card p-3 h-100"><div class="w-100">"#);
        let _ = write!(
            html,
            r#"<h3 class="h5 mb-2 text-white">{}</h3>"#,
            escape_html(&resource.name)
        );
        let _ = write!(html, r#"<p class="text-white mb-3">{description}</p>"#);
        let _ = write!(
            html,
            r#"<div class="d-flex justify-content-between align-items-center mb-2 w-100"><div class="d-flex align-items-center" aria-hidden="true"><span>⭐</span><span class="text-white">{}</span><span>•</span><span>🍴</span><span class="text-white">{}</span></div>"#,
            resource.stargazers_count, resource.forks_count
        );
        if let Some(language) = resource.language.as_deref() {
            let color = language_color(Some(language));
            let _ = write!(
                html,
                r#"<span class="badge rounded-pill px-2 py-1" style="background:{color};color:{};">{}</span>"#,
                badge_text_color(color),
                escape_html(language)
            );
        }
        html.push_str("</div>");
        let _ = write!(
            html,
            r#"<div class="text-white small">{} {}</div>"#,
            self.locale.updated(),
            escape_html(&updated)
        );
        html.push_str("</div></div></a></div>");
        html
    }

    pub fn card(&self, card: &Card<Resource>) -> String {
        match card {
            Card::Loaded { item, .. } => self.resource_card(item),
            Card::Failed { key, reason } => self.error_card(key, reason.as_deref()),
        }
    }
}

/// Renders into an in-memory container element.
#[derive(Debug, Clone)]
pub struct HtmlSurface {
    renderer: HtmlRenderer,
    container: String,
    busy: bool,
}

impl HtmlSurface {
    pub fn new(renderer: HtmlRenderer) -> Self {
        Self {
            renderer,
            container: String::new(),
            busy: false,
        }
    }

    /// The current content of the container.
    pub fn html(&self) -> &str {
        &self.container
    }

    /// Whether the container is still waiting for its final content (`aria-busy`).
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// The container element including its content.
    pub fn to_document(&self) -> String {
        format!(
            r#"<div id="github-projects-container" class="row g-4" aria-busy="{}">{}</div>"#,
            self.busy, self.container
        )
    }
}

impl RenderSurface<Resource> for HtmlSurface {
    fn show_loading(&mut self, keys: &[String]) -> Result<(), RenderError> {
        self.container = keys.iter().map(|_| self.renderer.loading_card()).collect();
        self.busy = true;
        Ok(())
    }

    fn render(&mut self, cards: &[Card<Resource>]) -> Result<(), RenderError> {
        self.container = cards.iter().map(|card| self.renderer.card(card)).collect();
        self.busy = false;
        Ok(())
    }
}
