//! URL origin and domain helpers.

/// Extracts the scheme+host origin from a URL.
///
/// Given `"https://acme.com/pricing?plan=pro"`, returns `"https://acme.com"`.
#[must_use]
pub fn extract_origin(url: &str) -> String {
    reqwest::Url::parse(url).map_or_else(
        |e| {
            tracing::warn!(url, error = %e, "could not parse URL, using string split for origin");
            url.trim_end_matches('/')
                .splitn(4, '/')
                .take(3)
                .collect::<Vec<_>>()
                .join("/")
        },
        |u| u.origin().ascii_serialization(),
    )
}

/// Extracts the hostname for error messages. Falls back to the full string.
#[must_use]
pub fn extract_domain(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| url.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_origin_strips_path_and_query() {
        assert_eq!(
            extract_origin("https://acme.com/pricing?plan=pro"),
            "https://acme.com"
        );
    }

    #[test]
    fn extract_origin_keeps_non_default_port() {
        assert_eq!(
            extract_origin("http://127.0.0.1:8080/page"),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn extract_domain_falls_back_to_input() {
        assert_eq!(extract_domain("https://acme.com/x"), "acme.com");
        assert_eq!(extract_domain("not a url"), "not a url");
    }
}
