use url::Url;

/// Whether the page was reached through the provider's redirect (or the popup), rather than
/// by the user navigating explicitly.
pub fn is_oauth_redirect(url: &Url) -> bool {
    url.query_pairs().any(|(key, value)| match key.as_ref() {
        "code" | "error" => !value.is_empty(),
        "popup" => value == "1",
        _ => false,
    })
}

/// Links whose explicit use abandons a pending OAuth attempt.
pub fn is_login_or_signup_href(href: &str) -> bool {
    href.contains("/login") || href.contains("/signup")
}

/// Appends a `_t` parameter, forcing the browser to load the target fresh.
pub fn cache_busted(href: &str, now_millis: i64) -> String {
    let separator = match href.contains('?') {
        true => '&',
        false => '?',
    };
    format!("{href}{separator}_t={now_millis}")
}

/// Like an exact page match, but also accepting nested routes below one of `pages`.
pub(crate) fn is_within(pages: &[String], path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    pages.iter().any(|page| {
        let page = page.to_ascii_lowercase();
        path == page || path.starts_with(&format!("{page}/"))
    })
}
