//! Resource URL resolution.
//!
//! Carousel resources are addressed as `/<component:2 hex>/<module:4 hex>[/<file>]`
//! relative to the active document. `~` names the current component and the
//! `arib-dc://` scheme is accepted when it denotes the tuned service.

use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;
use url::Url;

static ARIB_DC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^arib-dc://(?P<onid>[0-9a-f]+|-1)\.(?P<tsid>[0-9a-f]+|-1)\.(?P<sid>[0-9a-f]+|-1)(?:;(?P<content>[0-9a-f]+))?(?:\.(?P<event>[0-9a-f]+|-1))?(?P<path>/.*)?$",
    )
    .expect("arib-dc pattern")
});

static ARIB_SERVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^arib://(?P<onid>[0-9a-f]+|-1)\.(?P<tsid>[0-9a-f]+|-1)\.(?P<sid>[0-9a-f]+|-1)/?$")
        .expect("arib service pattern")
});

/// Identifiers of the tuned service, used to strip `arib-dc://` prefixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TunedService {
    pub original_network_id: Option<u16>,
    pub transport_stream_id: Option<u16>,
    pub service_id:          Option<u16>,
    pub event_id:            Option<u16>,
}

/// Everything a URL is resolved against.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlContext<'a> {
    /// e.g. `/40/0000/startup.bml`
    pub active_document:    Option<&'a str>,
    pub base_uri_directory: Option<&'a str>,
    pub tuned:              TunedService,
}

/// Path segments of a resolved carousel URL, lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUrl {
    pub component: Option<String>,
    pub module:    Option<String>,
    pub filename:  Option<String>,
}

/// Numeric form of [`ParsedUrl`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUrlEx {
    pub component_id: Option<u8>,
    pub module_id:    Option<u16>,
    pub filename:     Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceReference {
    pub original_network_id: Option<u16>,
    pub transport_stream_id: Option<u16>,
    pub service_id:          Option<u16>,
}

/// `-1` stands for the current value; anything else must parse as hex.
fn id_matches(text: &str, current: Option<u16>) -> bool {
    text == "-1" || u16::from_str_radix(text, 16).ok().is_some_and(|v| Some(v) == current)
}

/// Rewrites an `arib-dc://` URL for the tuned service into its absolute
/// path. `None` when it points elsewhere.
fn strip_data_carousel_scheme(url: &str, tuned: &TunedService) -> Option<String> {
    let caps = ARIB_DC.captures(url)?;
    if !id_matches(&caps["onid"], tuned.original_network_id)
        || !id_matches(&caps["tsid"], tuned.transport_stream_id)
        || !id_matches(&caps["sid"], tuned.service_id)
    {
        return None;
    }
    if let Some(event) = caps.name("event") {
        if !id_matches(event.as_str(), tuned.event_id) {
            return None;
        }
    }
    Some(caps.name("path").map_or("/", |p| p.as_str()).to_string())
}

pub fn is_remote_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Absolute http(s) form of `url`. Relative references resolve against a
/// remote base directory or document; `None` for anything carousel-bound.
pub fn resolve_remote_url(url: &str, ctx: &UrlContext<'_>) -> Option<String> {
    let url = url.trim();
    let resolved = if is_remote_url(url) {
        Url::parse(url)
    } else {
        let base = match (ctx.base_uri_directory, ctx.active_document) {
            (Some(dir), _) if is_remote_url(dir) && dir.ends_with('/') => dir.to_string(),
            (Some(dir), _) if is_remote_url(dir) => format!("{dir}/"),
            (None, Some(doc)) if is_remote_url(doc) => doc.to_string(),
            _ => return None,
        };
        Url::parse(&base).and_then(|b| b.join(url))
    };
    resolved.ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .map(String::from)
}

pub fn parse_url(url: &str, ctx: &UrlContext<'_>) -> ParsedUrl {
    let url = url.trim();
    let rewritten;
    let mut url = if url.get(..8).is_some_and(|p| p.eq_ignore_ascii_case("arib-dc:")) {
        match strip_data_carousel_scheme(url, &ctx.tuned) {
            Some(path) => {
                rewritten = path;
                rewritten.as_str()
            }
            None => return ParsedUrl::default(),
        }
    } else {
        url
    };
    if url.contains("://") || url.to_ascii_lowercase().starts_with("arib:") {
        return ParsedUrl::default();
    }

    let shorthand;
    if url == "~" || url.starts_with("~/") {
        shorthand = format!("..{}", &url[1..]);
        url = &shorthand;
    }

    let Ok(root) = Url::parse("http://localhost/") else { return ParsedUrl::default() };
    let base = match (ctx.base_uri_directory, ctx.active_document) {
        (Some(dir), _) if dir.ends_with('/') => root.join(dir),
        (Some(dir), _) => root.join(&format!("{dir}/")),
        (None, Some(doc)) => root.join(doc),
        (None, None) => Ok(root),
    };
    let Ok(resolved) = base.and_then(|b| b.join(url)) else { return ParsedUrl::default() };

    let path = resolved.path().to_lowercase();
    let segments: Vec<&str> = path.split('/').collect();
    // [0] is the empty root segment
    if segments.len() > 4 {
        return ParsedUrl::default();
    }
    ParsedUrl {
        component: segments.get(1).map(|s| s.to_string()),
        module:    segments.get(2).map(|s| s.to_string()),
        filename:  segments.get(3).map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned()),
    }
}

pub fn parse_url_ex(url: &str, ctx: &UrlContext<'_>) -> ParsedUrlEx {
    let parsed = parse_url(url, ctx);
    let Some(component_id) = parsed.component.as_deref().and_then(|c| u8::from_str_radix(c, 16).ok()) else {
        return ParsedUrlEx::default();
    };
    let Some(module_id) = parsed.module.as_deref().and_then(|m| u16::from_str_radix(m, 16).ok()) else {
        return ParsedUrlEx { component_id: Some(component_id), ..Default::default() };
    };
    ParsedUrlEx { component_id: Some(component_id), module_id: Some(module_id), filename: parsed.filename }
}

/// `arib://<onid>.<tsid>.<sid>`; `-1` resolves to the tuned value.
pub fn parse_service_reference(reference: &str, tuned: &TunedService) -> Option<ServiceReference> {
    let caps = ARIB_SERVICE.captures(reference)?;
    let id = |text: &str, current: Option<u16>| {
        if text == "-1" { current } else { u16::from_str_radix(text, 16).ok() }
    };
    Some(ServiceReference {
        original_network_id: id(&caps["onid"], tuned.original_network_id),
        transport_stream_id: id(&caps["tsid"], tuned.transport_stream_id),
        service_id:          id(&caps["sid"], tuned.service_id),
    })
}

fn hex_or_unknown(v: Option<u16>) -> String {
    v.map_or_else(|| "-1".to_string(), |v| format!("{v:04x}"))
}

/// `arib-dc://<onid>.<tsid>.<sid>[;<content>][.<event>]`
pub fn data_carousel_uri(tuned: &TunedService, content_id: Option<u32>) -> String {
    let mut uri = format!(
        "arib-dc://{}.{}.{}",
        hex_or_unknown(tuned.original_network_id),
        hex_or_unknown(tuned.transport_stream_id),
        hex_or_unknown(tuned.service_id),
    );
    if let Some(content_id) = content_id {
        uri.push_str(&format!(";{content_id:08x}"));
    }
    if let Some(event_id) = tuned.event_id {
        uri.push_str(&format!(".{event_id:04x}"));
    }
    uri
}

pub fn service_uri(tuned: &TunedService) -> String {
    format!(
        "arib://{}.{}.{}",
        hex_or_unknown(tuned.original_network_id),
        hex_or_unknown(tuned.transport_stream_id),
        hex_or_unknown(tuned.service_id),
    )
}

pub fn event_uri(tuned: &TunedService) -> String {
    format!("{}.{}", service_uri(tuned), hex_or_unknown(tuned.event_id))
}

/// `/cc/mmmm`
pub fn module_ref(component_id: u8, module_id: u16) -> String {
    format!("/{component_id:02x}/{module_id:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUNED: TunedService = TunedService {
        original_network_id: Some(0x7FE1),
        transport_stream_id: Some(0x7FE1),
        service_id:          Some(0x0408),
        event_id:            Some(0x1234),
    };

    fn ctx() -> UrlContext<'static> {
        UrlContext { active_document: Some("/40/0000/startup.bml"), base_uri_directory: None, tuned: TUNED }
    }

    #[test]
    fn resolves_absolute_and_relative_paths() {
        let ex = parse_url_ex("/40/0001/Menu.BML", &ctx());
        assert_eq!(ex, ParsedUrlEx { component_id: Some(0x40), module_id: Some(1), filename: Some("menu.bml".into()) });

        let rel = parse_url_ex("logo.png", &ctx());
        assert_eq!(rel.module_id, Some(0));
        assert_eq!(rel.filename.as_deref(), Some("logo.png"));
    }

    #[test]
    fn tilde_names_current_component() {
        let ex = parse_url_ex("~/0002/a.bml", &ctx());
        assert_eq!((ex.component_id, ex.module_id), (Some(0x40), Some(2)));
        let bare = parse_url("~", &ctx());
        assert_eq!(bare.component.as_deref(), Some("40"));
    }

    #[test]
    fn module_without_file_and_too_deep() {
        let ex = parse_url_ex("/50/0003", &ctx());
        assert_eq!(ex, ParsedUrlEx { component_id: Some(0x50), module_id: Some(3), filename: None });
        assert_eq!(parse_url("/40/0000/a/b", &ctx()), ParsedUrl::default());
    }

    #[test]
    fn percent_encoded_filename_is_decoded() {
        let ex = parse_url_ex("/40/0000/a%20b.png", &ctx());
        assert_eq!(ex.filename.as_deref(), Some("a b.png"));
    }

    #[test]
    fn base_uri_directory_takes_precedence() {
        let c = UrlContext { base_uri_directory: Some("/60/0004"), ..ctx() };
        let ex = parse_url_ex("x.bml", &c);
        assert_eq!((ex.component_id, ex.module_id), (Some(0x60), Some(4)));
    }

    #[test]
    fn data_carousel_scheme_for_tuned_service_only() {
        let ex = parse_url_ex("arib-dc://-1.7fe1.0408/40/0000/startup.bml", &ctx());
        assert_eq!((ex.component_id, ex.module_id), (Some(0x40), Some(0)));
        let with_event = parse_url_ex("arib-dc://7fe1.7fe1.0408.1234/50/0001", &ctx());
        assert_eq!(with_event.component_id, Some(0x50));
        assert_eq!(parse_url_ex("arib-dc://7fe1.7fe1.0409/40/0000", &ctx()), ParsedUrlEx::default());
        assert_eq!(parse_url("http://example.com/a", &ctx()), ParsedUrl::default());
        assert!(is_remote_url("HTTPS://example.com/"));
    }

    #[test]
    fn remote_urls_resolve_against_remote_base() {
        assert_eq!(resolve_remote_url(" http://Example.com/a.bml", &ctx()).as_deref(), Some("http://example.com/a.bml"));
        assert_eq!(resolve_remote_url("b.bml", &ctx()), None);
        assert_eq!(resolve_remote_url("/40/0000", &ctx()), None);

        let c = UrlContext { active_document: Some("https://example.com/dir/top.bml"), ..ctx() };
        assert_eq!(resolve_remote_url("b.bml", &c).as_deref(), Some("https://example.com/dir/b.bml"));
        let c = UrlContext { base_uri_directory: Some("http://example.com/base"), ..c };
        assert_eq!(resolve_remote_url("b.bml", &c).as_deref(), Some("http://example.com/base/b.bml"));
        assert_eq!(resolve_remote_url("arib-dc://-1.-1.-1/40/0000", &c), None);
    }

    #[test]
    fn service_reference_and_uris() {
        let r = parse_service_reference("arib://-1.-1.0409", &TUNED).unwrap();
        assert_eq!(r.original_network_id, Some(0x7FE1));
        assert_eq!(r.service_id, Some(0x0409));
        assert!(parse_service_reference("arib://x", &TUNED).is_none());

        assert_eq!(service_uri(&TUNED), "arib://7fe1.7fe1.0408");
        assert_eq!(event_uri(&TUNED), "arib://7fe1.7fe1.0408.1234");
        assert_eq!(data_carousel_uri(&TunedService::default(), None), "arib-dc://-1.-1.-1");
        assert_eq!(module_ref(0x40, 1), "/40/0001");
    }
}
