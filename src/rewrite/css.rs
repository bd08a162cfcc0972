//! CSS `url(...)` rewriting for style attributes and `<style>` elements.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use url::Url;

use crate::rewrite::url::UrlResolver;

/// `url(...)` with a double-quoted, single-quoted or bare argument.
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^"')\s]*))\s*\)"#)
        .expect("CSS url() pattern is valid")
});

/// Rewrite every `url(...)` reference in `css` against `base`, keeping the
/// original quoting.
pub fn rewrite_css<'a>(css: &'a str, base: &Url, resolver: &UrlResolver) -> Cow<'a, str> {
    if !contains_url_function(css) {
        return Cow::Borrowed(css);
    }

    CSS_URL.replace_all(css, |caps: &Captures<'_>| {
        let (quote, reference) = if let Some(m) = caps.get(1) {
            ("\"", m.as_str())
        } else if let Some(m) = caps.get(2) {
            ("'", m.as_str())
        } else {
            ("", caps.get(3).map_or("", |m| m.as_str()))
        };
        let rewritten = resolver.resolve(reference.trim(), base);
        format!("url({quote}{rewritten}{quote})")
    })
}

fn contains_url_function(css: &str) -> bool {
    css.as_bytes()
        .windows(4)
        .any(|w| w.eq_ignore_ascii_case(b"url("))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::url::UrlMemo;
    use std::sync::Arc;

    fn rewrite(css: &str) -> String {
        let resolver = UrlResolver::new("/!!/", Arc::new(UrlMemo::with_limits(100, 256)));
        let base = Url::parse("https://example.com/css/").unwrap();
        rewrite_css(css, &base, &resolver).into_owned()
    }

    #[test]
    fn test_quote_styles_preserved() {
        assert_eq!(
            rewrite(r#"a{background:url("bg.png")}"#),
            r#"a{background:url("/!!/https://example.com/css/bg.png")}"#
        );
        assert_eq!(
            rewrite("a{background:url('bg.png')}"),
            "a{background:url('/!!/https://example.com/css/bg.png')}"
        );
        assert_eq!(
            rewrite("a{background:url( bg.png )}"),
            "a{background:url(/!!/https://example.com/css/bg.png)}"
        );
    }

    #[test]
    fn test_multiple_and_absolute() {
        assert_eq!(
            rewrite("@font-face{src:URL(https://fonts.example/f.woff2)} b{x:url(/i.svg)}"),
            "@font-face{src:url(/!!/https://fonts.example/f.woff2)} b{x:url(/!!/https://example.com/i.svg)}"
        );
    }

    #[test]
    fn test_data_uri_untouched() {
        let css = "a{background:url(data:image/png;base64,AAAA)}";
        assert_eq!(rewrite(css), css);
    }

    #[test]
    fn test_no_url_borrows() {
        let resolver = UrlResolver::new("/!!/", Arc::new(UrlMemo::with_limits(100, 256)));
        let base = Url::parse("https://example.com/").unwrap();
        assert!(matches!(
            rewrite_css("color: red", &base, &resolver),
            Cow::Borrowed(_)
        ));
    }
}
