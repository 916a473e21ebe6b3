//! Pure URL helpers: canonical form, relative resolution, local file naming
//! and kind classification. Nothing here holds state; the per-kind naming
//! sequence is owned by the [`Registry`](crate::registry::Registry).

use url::Url;

use crate::error::{NormalizeError, UnresolvableReference};
use crate::reference::ResourceKind;

const MAX_NAME_LEN: usize = 100;
const MAX_EXT_LEN: usize = 5;

/// Canonical form of an absolute URL: lower-case scheme and host, no default
/// port, no fragment, dot segments collapsed.
///
/// Never fails. Input that does not parse comes back trimmed.
pub fn normalize(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Normalizes the user-supplied entry URL, adding `https://` to bare hosts.
pub fn normalize_target(input: &str) -> Result<String, NormalizeError> {
    let trimmed = input.trim();
    let lower = trimmed.to_ascii_lowercase();
    let with_scheme = if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = Url::parse(&with_scheme).map_err(|e| NormalizeError::InvalidTarget {
        url: input.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(NormalizeError::InvalidTarget {
            url: input.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(normalize(parsed.as_str()))
}

/// Resolves `raw` against `base` and returns the canonical absolute URL.
///
/// Empty values, fragment-only links and anything that does not end up on
/// `http`/`https` (`data:`, `mailto:`, `javascript:`) are unresolvable and
/// must be passed through untouched.
pub fn resolve(base: &str, raw: &str) -> Result<String, UnresolvableReference> {
    let unresolvable = || UnresolvableReference {
        raw: raw.to_string(),
    };

    let raw_trimmed = raw.trim();
    if raw_trimmed.is_empty() || raw_trimmed.starts_with('#') {
        return Err(unresolvable());
    }

    let base = Url::parse(base).map_err(|_| unresolvable())?;
    let joined = base.join(raw_trimmed).map_err(|_| unresolvable())?;

    match joined.scheme() {
        "http" | "https" if joined.host_str().is_some() => Ok(normalize(joined.as_str())),
        _ => Err(unresolvable()),
    }
}

/// True when `raw` already names its host, so it keeps working when left
/// verbatim in the output.
pub fn is_absolute(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.starts_with("//") {
        return true;
    }
    Url::parse(raw)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Host equality after normalization. Informational only.
pub fn same_domain(url: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    Url::parse(&normalize(url))
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_end_matches('.') == domain))
        .unwrap_or(false)
}

/// Host of a canonical URL, used as the project's domain.
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Directory name for a project: the host without a leading `www.`.
pub fn project_name(url: &str) -> String {
    let host = domain_of(url).unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let name = sanitize_component(host);
    if name.is_empty() {
        "site".to_string()
    } else {
        name
    }
}

/// Lower-cased extension of the URL's last path segment, when it looks like
/// a real extension.
pub fn extension_of(url: &str) -> Option<String> {
    let segment = last_segment(url)?;
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXT_LEN {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Kind implied by a file extension, if any.
pub fn classify_extension(ext: &str) -> Option<ResourceKind> {
    match ext.to_ascii_lowercase().as_str() {
        "css" => Some(ResourceKind::Stylesheet),
        "js" | "mjs" => Some(ResourceKind::Script),
        "woff" | "woff2" | "ttf" | "otf" | "eot" => Some(ResourceKind::Font),
        other => {
            let guess = mime_guess::from_ext(other).first()?;
            if guess.type_() == mime::IMAGE {
                Some(ResourceKind::Image)
            } else if guess.type_().as_str() == "font" {
                Some(ResourceKind::Font)
            } else if guess.subtype() == mime::CSS {
                Some(ResourceKind::Stylesheet)
            } else if guess.subtype() == mime::JAVASCRIPT {
                Some(ResourceKind::Script)
            } else {
                None
            }
        }
    }
}

/// Kind implied by a response `Content-Type`, if any.
pub fn classify_content_type(content_type: &str) -> Option<ResourceKind> {
    let parsed: mime::Mime = content_type.parse().ok()?;
    if parsed.subtype() == mime::CSS {
        Some(ResourceKind::Stylesheet)
    } else if parsed.subtype() == mime::JAVASCRIPT {
        Some(ResourceKind::Script)
    } else if parsed.type_() == mime::IMAGE {
        Some(ResourceKind::Image)
    } else if parsed.type_().as_str() == "font" {
        Some(ResourceKind::Font)
    } else {
        None
    }
}

/// Synthesized local file name: `<prefix>_<sequence>.<ext>`.
///
/// The URL's own extension is kept when it agrees with `kind`; otherwise the
/// kind's default extension is used.
pub fn safe_name(canonical: &str, kind: ResourceKind, sequence: usize) -> String {
    let ext = extension_of(canonical)
        .filter(|ext| kind == ResourceKind::Other || classify_extension(ext) == Some(kind))
        .unwrap_or_else(|| kind.default_extension().to_string());
    format!("{}_{}.{}", kind.name_prefix(), sequence, ext)
}

/// The URL's own base name, if it is usable as a file name as-is.
pub fn original_name(canonical: &str) -> Option<String> {
    let segment = last_segment(canonical)?;
    extension_of(canonical)?;

    let safe = segment.len() <= MAX_NAME_LEN
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
    safe.then(|| segment.to_string())
}

fn last_segment(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    (!segment.is_empty()).then_some(segment)
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' => c,
            _ => '_',
        })
        .collect()
}
