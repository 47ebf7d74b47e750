use url::Url;

/// Maps a raw URL (or a bare `host/path`) to the key used for every identity
/// comparison between pages, watches and seen baselines.
///
/// Input that cannot be parsed is returned unchanged.
pub fn canonicalize(raw: &str) -> String {
    let Some(url) = parse_lenient(raw) else {
        return raw.to_owned();
    };
    let Some(host) = url.host_str() else {
        return raw.to_owned();
    };

    let mut out = format!("{}://{host}", url.scheme());
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }

    let path = url.path();
    if path.is_empty() {
        out.push('/');
    } else {
        out.push_str(path);
    }

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Host of a URL in canonical (lowercase) form, if it has one.
pub fn host_of(raw: &str) -> Option<String> {
    parse_lenient(raw).and_then(|url| url.host_str().map(str::to_owned))
}

/// Path of a URL, `/` when it is missing or the URL does not parse.
pub fn path_of(raw: &str) -> String {
    parse_lenient(raw)
        .map(|url| url.path().to_owned())
        .filter(|path| !path.is_empty())
        .unwrap_or_else(|| "/".to_owned())
}

/// The host-name spellings a site may have been recorded under: the id itself
/// and its `www.` counterpart.
pub fn host_variants(site_id: &str) -> Vec<String> {
    let site_id = site_id.trim();
    let toggled = match site_id.strip_prefix("www.") {
        Some(bare) => bare.to_owned(),
        None => format!("www.{site_id}"),
    };

    let mut variants = vec![site_id.to_owned()];
    if !toggled.is_empty() && toggled != site_id {
        variants.push(toggled);
    }
    variants
}

/// Key shared by both spellings of a site: `example.com` and
/// `www.example.com` map to `example.com`.
pub fn host_group(site_id: &str) -> String {
    let site_id = site_id.trim().to_ascii_lowercase();
    match site_id.strip_prefix("www.") {
        Some(bare) if !bare.is_empty() => bare.to_owned(),
        _ => site_id,
    }
}

fn parse_lenient(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if starts_with_scheme(trimmed) {
        return Url::parse(trimmed).ok();
    }
    Url::parse(&format!("http://{trimmed}")).ok()
}

/// True when the input opens with `scheme://`. A `://` later in the path or
/// query does not count.
fn starts_with_scheme(raw: &str) -> bool {
    let Some((scheme, _)) = raw.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-'))
}
