use url::Url;

/// Reduces a captured request URL to its path and query.
///
/// Only a URL with a host is reduced; anything else, including a
/// scheme-less `host:port/path`, is assumed to already be a path and is
/// returned unchanged. The path is taken as captured, without dot-segment
/// removal or re-encoding, and a URL with no path yields an empty string.
pub fn path_and_query(full_url: &str) -> String {
    let parsed = match Url::parse(full_url) {
        Ok(parsed) if parsed.has_host() => parsed,
        _ => return full_url.to_string(),
    };

    let input = full_url.trim();
    let rest = input.get(parsed.scheme().len() + 1..).unwrap_or_default();
    let rest = rest.trim_start_matches(|c: char| c == '/' || c == '\\');
    let rest = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .map_or("", |start| &rest[start..]);
    let rest = rest.split('#').next().unwrap_or_default();

    match rest.split_once('?') {
        Some((path, query)) if !query.is_empty() => format!("{path}?{query}"),
        Some((path, _)) => path.to_string(),
        None => rest.to_string(),
    }
}

/// `host[:port]` of an absolute URL, if it has one.
pub fn host(full_url: &str) -> Option<String> {
    let parsed = Url::parse(full_url).ok()?;
    let host = parsed.host_str().filter(|h| !h.is_empty())?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
