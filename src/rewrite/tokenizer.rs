//! Incremental HTML tokenizer.
//!
//! # Responsibilities
//! - Split an arbitrarily chunked byte stream into text, tags and other markup
//! - Carry incomplete constructs across chunk boundaries
//! - Track raw-text elements (`<script>`, `<style>`, ...) whose content is never markup
//!
//! # Design Decisions
//! - Tokens keep their source bytes; an unmodified tag is written back byte-for-byte
//! - Attribute values are not entity-decoded; URLs are rewritten as written
//! - A construct still open after `MAX_PENDING` bytes is given up on and emitted as text

/// Pending bytes after which an unterminated construct is flushed as text.
pub const MAX_PENDING: usize = 1024 * 1024;

/// Elements whose content is raw text up to the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Lowercased name used for lookups.
    pub name: String,
    raw_name: String,
    pub value: Option<String>,
    quote: Option<u8>,
}

impl Attribute {
    fn new(name: &str, value: String) -> Self {
        Self {
            name: name.to_ascii_lowercase(),
            raw_name: name.to_string(),
            value: Some(value),
            quote: Some(b'"'),
        }
    }
}

/// A start tag with parsed attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    /// Lowercased tag name.
    pub name: String,
    raw_name: String,
    attrs: Vec<Attribute>,
    pub self_closing: bool,
    raw: Vec<u8>,
    modified: bool,
}

impl StartTag {
    /// First value of attribute `name` (lowercase).
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_deref().unwrap_or(""))
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|a| a.name == name)
    }

    /// Replace the value of `name`, or append the attribute.
    pub fn set_attr(&mut self, name: &str, value: String) {
        match self.attrs.iter_mut().find(|a| a.name == name) {
            Some(attr) => {
                if attr.value.as_deref() == Some(value.as_str()) {
                    return;
                }
                attr.value = Some(value);
            }
            None => self.attrs.push(Attribute::new(name, value)),
        }
        self.modified = true;
    }

    /// Remove every occurrence of `name`.
    pub fn remove_attr(&mut self, name: &str) -> bool {
        let before = self.attrs.len();
        self.attrs.retain(|a| a.name != name);
        let removed = self.attrs.len() != before;
        self.modified |= removed;
        removed
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Append the tag's serialized form.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        if !self.modified {
            out.extend_from_slice(&self.raw);
            return;
        }

        out.push(b'<');
        out.extend_from_slice(self.raw_name.as_bytes());
        for attr in &self.attrs {
            out.push(b' ');
            out.extend_from_slice(attr.raw_name.as_bytes());
            if let Some(value) = &attr.value {
                let quote = attr.quote.unwrap_or(b'"');
                out.push(b'=');
                out.push(quote);
                write_escaped(value, quote, out);
                out.push(quote);
            }
        }
        if self.self_closing {
            out.extend_from_slice(b" /");
        }
        out.push(b'>');
    }
}

fn write_escaped(value: &str, quote: u8, out: &mut Vec<u8>) {
    for &byte in value.as_bytes() {
        match byte {
            b'"' if quote == b'"' => out.extend_from_slice(b"&quot;"),
            b'\'' if quote == b'\'' => out.extend_from_slice(b"&#39;"),
            _ => out.push(byte),
        }
    }
}

/// Escape a value for a double-quoted attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = Vec::with_capacity(value.len());
    write_escaped(value, b'"', &mut out);
    String::from_utf8(out).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(Vec<u8>),
    StartTag(StartTag),
    EndTag { name: String, raw: Vec<u8> },
    /// Comments, doctypes, processing instructions; passed through.
    Other(Vec<u8>),
}

enum Markup {
    Token(Token, usize),
    /// Not markup; emit this many bytes as text.
    Text(usize),
    Incomplete,
}

enum RawTextEnd {
    Found(usize),
    /// This many bytes are certainly content; the rest might start the end tag.
    Pending(usize),
}

/// Streaming tokenizer state.
#[derive(Debug, Default)]
pub struct Tokenizer {
    buf: Vec<u8>,
    raw_text: Option<String>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk; every complete token is pushed onto `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<Token>) {
        self.buf.extend_from_slice(chunk);
        let consumed = self.drain(out);
        self.buf.drain(..consumed);
    }

    /// End of input: whatever is still buffered becomes text.
    pub fn finish(&mut self, out: &mut Vec<Token>) {
        let consumed = self.drain(out);
        self.buf.drain(..consumed);
        if !self.buf.is_empty() {
            out.push(Token::Text(std::mem::take(&mut self.buf)));
        }
        self.raw_text = None;
    }

    fn drain(&mut self, out: &mut Vec<Token>) -> usize {
        let mut pos = 0;

        loop {
            if let Some(name) = &self.raw_text {
                match find_raw_text_end(&self.buf[pos..], name) {
                    RawTextEnd::Found(len) => {
                        if len > 0 {
                            out.push(Token::Text(self.buf[pos..pos + len].to_vec()));
                        }
                        pos += len;
                        self.raw_text = None;
                    }
                    RawTextEnd::Pending(len) => {
                        if len > 0 {
                            out.push(Token::Text(self.buf[pos..pos + len].to_vec()));
                        }
                        return pos + len;
                    }
                }
            }

            let rest = &self.buf[pos..];
            if rest.is_empty() {
                return pos;
            }

            match rest.iter().position(|&b| b == b'<') {
                None => {
                    out.push(Token::Text(rest.to_vec()));
                    return self.buf.len();
                }
                Some(0) => {}
                Some(i) => {
                    out.push(Token::Text(rest[..i].to_vec()));
                    pos += i;
                    continue;
                }
            }

            match parse_markup(&self.buf[pos..]) {
                Markup::Token(token, len) => {
                    if let Token::StartTag(tag) = &token {
                        if RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
                            self.raw_text = Some(tag.name.clone());
                        }
                    }
                    out.push(token);
                    pos += len;
                }
                Markup::Text(len) => {
                    out.push(Token::Text(self.buf[pos..pos + len].to_vec()));
                    pos += len;
                }
                Markup::Incomplete => {
                    if self.buf.len() - pos > MAX_PENDING {
                        out.push(Token::Text(vec![b'<']));
                        pos += 1;
                    } else {
                        return pos;
                    }
                }
            }
        }
    }
}

fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c')
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| i + from)
}

fn find_raw_text_end(bytes: &[u8], name: &str) -> RawTextEnd {
    let name = name.as_bytes();
    let mut from = 0;

    while let Some(lt) = bytes[from..].iter().position(|&b| b == b'<').map(|i| i + from) {
        let after = &bytes[lt + 1..];
        if after.is_empty() {
            return RawTextEnd::Pending(lt);
        }
        if after[0] != b'/' {
            from = lt + 1;
            continue;
        }

        let candidate = &after[1..];
        let compared = candidate.len().min(name.len());
        if !candidate[..compared].eq_ignore_ascii_case(&name[..compared]) {
            from = lt + 1;
            continue;
        }
        if candidate.len() <= name.len() {
            return RawTextEnd::Pending(lt);
        }
        let delimiter = candidate[name.len()];
        if is_space(delimiter) || delimiter == b'/' || delimiter == b'>' {
            return RawTextEnd::Found(lt);
        }
        from = lt + 1;
    }

    RawTextEnd::Pending(bytes.len())
}

fn parse_markup(bytes: &[u8]) -> Markup {
    debug_assert_eq!(bytes.first(), Some(&b'<'));
    let Some(&next) = bytes.get(1) else {
        return Markup::Incomplete;
    };

    match next {
        b'!' => parse_declaration(bytes),
        b'?' => until_gt(bytes, 2),
        b'/' => parse_end_tag(bytes),
        b if b.is_ascii_alphabetic() => parse_start_tag(bytes),
        _ => Markup::Text(1),
    }
}

fn until_gt(bytes: &[u8], from: usize) -> Markup {
    match bytes[from..].iter().position(|&b| b == b'>') {
        Some(i) => Markup::Token(Token::Other(bytes[..from + i + 1].to_vec()), from + i + 1),
        None => Markup::Incomplete,
    }
}

fn parse_declaration(bytes: &[u8]) -> Markup {
    if bytes.len() < 4 && b"<!--".starts_with(bytes) {
        return Markup::Incomplete;
    }
    if bytes.starts_with(b"<!--") {
        return match find(bytes, b"-->", 2) {
            Some(i) => Markup::Token(Token::Other(bytes[..i + 3].to_vec()), i + 3),
            None => Markup::Incomplete,
        };
    }
    until_gt(bytes, 2)
}

fn parse_end_tag(bytes: &[u8]) -> Markup {
    let Some(&first) = bytes.get(2) else {
        return Markup::Incomplete;
    };
    if first == b'>' {
        return Markup::Token(Token::Other(bytes[..3].to_vec()), 3);
    }
    if !first.is_ascii_alphabetic() {
        return until_gt(bytes, 2);
    }

    let Some(gt) = bytes.iter().position(|&b| b == b'>') else {
        return Markup::Incomplete;
    };
    let name_end = bytes[2..gt]
        .iter()
        .position(|&b| is_space(b) || b == b'/')
        .map_or(gt, |i| i + 2);
    let name = String::from_utf8_lossy(&bytes[2..name_end]).to_ascii_lowercase();
    Markup::Token(
        Token::EndTag {
            name,
            raw: bytes[..gt + 1].to_vec(),
        },
        gt + 1,
    )
}

fn parse_start_tag(bytes: &[u8]) -> Markup {
    let len = bytes.len();
    let mut i = 1;
    while i < len && !is_space(bytes[i]) && bytes[i] != b'/' && bytes[i] != b'>' {
        i += 1;
    }
    if i >= len {
        return Markup::Incomplete;
    }
    let raw_name = String::from_utf8_lossy(&bytes[1..i]).into_owned();

    let mut attrs = Vec::new();
    let mut self_closing = false;

    loop {
        while i < len && is_space(bytes[i]) {
            i += 1;
        }
        if i >= len {
            return Markup::Incomplete;
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                if i + 1 >= len {
                    return Markup::Incomplete;
                }
                if bytes[i + 1] == b'>' {
                    self_closing = true;
                    i += 2;
                    break;
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        // A leading '=' belongs to the name.
        let name_start = i;
        i += 1;
        while i < len && !is_space(bytes[i]) && !matches!(bytes[i], b'/' | b'>' | b'=') {
            i += 1;
        }
        if i >= len {
            return Markup::Incomplete;
        }
        let attr_name = String::from_utf8_lossy(&bytes[name_start..i]).into_owned();

        let mut j = i;
        while j < len && is_space(bytes[j]) {
            j += 1;
        }
        if j >= len {
            return Markup::Incomplete;
        }

        let (value, quote) = if bytes[j] == b'=' {
            j += 1;
            while j < len && is_space(bytes[j]) {
                j += 1;
            }
            if j >= len {
                return Markup::Incomplete;
            }
            match bytes[j] {
                q @ (b'"' | b'\'') => {
                    let Some(close) = bytes[j + 1..].iter().position(|&b| b == q) else {
                        return Markup::Incomplete;
                    };
                    let value = &bytes[j + 1..j + 1 + close];
                    i = j + close + 2;
                    (Some(String::from_utf8_lossy(value).into_owned()), Some(q))
                }
                b'>' => {
                    i = j;
                    (Some(String::new()), None)
                }
                _ => {
                    let mut k = j;
                    while k < len && !is_space(bytes[k]) && bytes[k] != b'>' {
                        k += 1;
                    }
                    if k >= len {
                        return Markup::Incomplete;
                    }
                    i = k;
                    (Some(String::from_utf8_lossy(&bytes[j..k]).into_owned()), None)
                }
            }
        } else {
            i = j;
            (None, None)
        };

        attrs.push(Attribute {
            name: attr_name.to_ascii_lowercase(),
            raw_name: attr_name,
            value,
            quote,
        });
    }

    let tag = StartTag {
        name: raw_name.to_ascii_lowercase(),
        raw_name,
        attrs,
        self_closing,
        raw: bytes[..i].to_vec(),
        modified: false,
    };
    Markup::Token(Token::StartTag(tag), i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize_chunks(chunks: &[&str]) -> Vec<Token> {
        let mut tokenizer = Tokenizer::new();
        let mut out = Vec::new();
        for chunk in chunks {
            tokenizer.feed(chunk.as_bytes(), &mut out);
        }
        tokenizer.finish(&mut out);
        out
    }

    fn reassemble(tokens: &[Token]) -> String {
        let mut out = Vec::new();
        for token in tokens {
            match token {
                Token::Text(b) | Token::Other(b) | Token::EndTag { raw: b, .. } => out.extend_from_slice(b),
                Token::StartTag(tag) => tag.write_to(&mut out),
            }
        }
        String::from_utf8(out).unwrap()
    }

    fn start_tags(tokens: &[Token]) -> Vec<&StartTag> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::StartTag(tag) => Some(tag),
                _ => None,
            })
            .collect()
    }

    const DOC: &str = "<!DOCTYPE html><html><head><!-- c > d --><title>a<b</title>\
        <script>if (a < b && c > d) { x = '</scr' + 'ipt>'; }</script></head>\
        <body class=main data-x='1'><img src=\"a.png\" alt=x/><br/></body></html>";

    #[test]
    fn test_unmodified_stream_is_byte_identical() {
        assert_eq!(reassemble(&tokenize_chunks(&[DOC])), DOC);
    }

    #[test]
    fn test_any_chunking_gives_same_tokens() {
        let whole = tokenize_chunks(&[DOC]);
        for split in 1..DOC.len() {
            let tokens = tokenize_chunks(&[&DOC[..split], &DOC[split..]]);
            assert_eq!(reassemble(&tokens), DOC, "split at {split}");
            assert_eq!(start_tags(&tokens), start_tags(&whole), "split at {split}");
        }
    }

    #[test]
    fn test_script_content_is_not_markup() {
        let tokens = tokenize_chunks(&["<script>var s = '<img src=x>';</script><img src=y>"]);
        let tags = start_tags(&tokens);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].name, "script");
        assert_eq!(tags[1].attr("src"), Some("y"));
    }

    #[test]
    fn test_end_tag_case_insensitive() {
        let tokens = tokenize_chunks(&["<STYLE>a{}</Style><p>"]);
        assert!(tokens.iter().any(|t| matches!(t, Token::EndTag { name, .. } if name == "style")));
        assert_eq!(start_tags(&tokens)[1].name, "p");
    }

    #[test]
    fn test_attributes() {
        let tokens = tokenize_chunks(&["<a HREF='x' data-y=\"1 2\" hidden download=z>"]);
        let tag = start_tags(&tokens)[0];
        assert_eq!(tag.attr("href"), Some("x"));
        assert_eq!(tag.attr("data-y"), Some("1 2"));
        assert!(tag.has_attr("hidden"));
        assert_eq!(tag.attr("hidden"), Some(""));
        assert_eq!(tag.attr("download"), Some("z"));
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let tokens = tokenize_chunks(&["<a title=\"a>b\" href=x>t</a>"]);
        let tag = start_tags(&tokens)[0];
        assert_eq!(tag.attr("title"), Some("a>b"));
        assert_eq!(tag.attr("href"), Some("x"));
    }

    #[test]
    fn test_modified_tag_serialization() {
        let tokens = tokenize_chunks(&["<img src='a.png' integrity=sha crossorigin>"]);
        let mut tag = start_tags(&tokens)[0].clone();
        tag.remove_attr("integrity");
        tag.remove_attr("crossorigin");
        tag.set_attr("src", "/!!/x'y".into());
        tag.set_attr("data-n", "a\"b".into());
        let mut out = Vec::new();
        tag.write_to(&mut out);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "<img src='/!!/x&#39;y' data-n=\"a&quot;b\">"
        );
    }

    #[test]
    fn test_set_same_value_keeps_raw() {
        let tokens = tokenize_chunks(&["<a  href=x >"]);
        let mut tag = start_tags(&tokens)[0].clone();
        tag.set_attr("href", "x".into());
        assert!(!tag.is_modified());
    }

    #[test]
    fn test_lone_lt_is_text() {
        let input = "a < b <3 <> </ >";
        assert_eq!(reassemble(&tokenize_chunks(&[input])), input);
        assert!(start_tags(&tokenize_chunks(&[input])).is_empty());
    }

    #[test]
    fn test_unterminated_tag_flushed_on_finish() {
        let input = "<p>hello <a href=\"x";
        assert_eq!(reassemble(&tokenize_chunks(&[input])), input);
    }

    #[test]
    fn test_oversized_pending_construct_becomes_text() {
        let mut tokenizer = Tokenizer::new();
        let mut out = Vec::new();
        let big = format!("<img src=\"data:{}", "A".repeat(MAX_PENDING + 10));
        tokenizer.feed(big.as_bytes(), &mut out);
        assert!(!out.is_empty());
        tokenizer.feed(b"\">", &mut out);
        tokenizer.finish(&mut out);
        assert_eq!(reassemble(&out), format!("{big}\">"));
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(escape_attr("a\"b'c"), "a&quot;b'c");
    }
}
