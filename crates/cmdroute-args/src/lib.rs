//! Argument tokenizing for cmdroute.
//!
//! This crate is intentionally small and dependency-free so it can be reused by:
//! - `cmdroute` (the dispatch engine, which resolves and binds against an [`ArgumentSet`])
//! - transport adapters that only need to turn a console line, argv or an HTTP route
//!   into tokens
//!
//! The token grammar is documented on [`lexer::tokenize`].

pub mod set {
    use std::collections::HashMap;

    /// Tokenized form of one request's input.
    ///
    /// Positional tokens keep their input order. Named tokens are unique by key
    /// (the last occurrence wins). The set itself is never mutated after
    /// construction; consumption is tracked by a [`Cursor`].
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct ArgumentSet {
        positional: Vec<String>,
        named: HashMap<String, String>,
    }

    impl ArgumentSet {
        pub fn new(positional: Vec<String>, named: HashMap<String, String>) -> Self {
            Self { positional, named }
        }

        /// Tokenize pre-split arguments with the default options.
        pub fn from_args<S: AsRef<str>>(argv: &[S]) -> Self {
            crate::lexer::tokenize_args(argv, &crate::lexer::TokenizerOptions::default())
        }

        /// See [`crate::route::from_route`].
        pub fn from_route(path: &str, query: Option<&str>) -> Self {
            crate::route::from_route(path, query)
        }

        /// Number of positional tokens.
        pub fn len(&self) -> usize {
            self.positional.len()
        }

        pub fn is_empty(&self) -> bool {
            self.positional.is_empty() && self.named.is_empty()
        }

        /// Positional token at `index`.
        pub fn get(&self, index: usize) -> Option<&str> {
            self.positional.get(index).map(String::as_str)
        }

        pub fn positional(&self) -> &[String] {
            self.positional.as_slice()
        }

        /// Named value for `key`.
        ///
        /// An exact key match is preferred; otherwise keys are compared
        /// ASCII case-insensitively.
        pub fn named(&self, key: &str) -> Option<&str> {
            if let Some(v) = self.named.get(key) {
                return Some(v.as_str());
            }
            self.named
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        }

        pub fn named_len(&self) -> usize {
            self.named.len()
        }

        pub fn named_iter(&self) -> impl Iterator<Item = (&str, &str)> {
            self.named.iter().map(|(k, v)| (k.as_str(), v.as_str()))
        }

        /// Positional tokens from `position` to the end.
        pub fn remaining_from(&self, position: usize) -> Vec<String> {
            self.positional
                .get(position..)
                .map(<[String]>::to_vec)
                .unwrap_or_default()
        }

        /// Positional tokens from `position` to the end, joined by `separator`.
        pub fn join_from(&self, position: usize, separator: &str) -> String {
            self.positional
                .get(position..)
                .map(|rest| rest.join(separator))
                .unwrap_or_default()
        }

        /// A cursor positioned at the first positional token.
        pub fn cursor(&self) -> Cursor<'_> {
            Cursor {
                args: self,
                position: 0,
            }
        }
    }

    /// Read position into the positional tokens of an [`ArgumentSet`].
    ///
    /// `Copy`, so a caller can save a position and rewind to it.
    #[derive(Debug, Clone, Copy)]
    pub struct Cursor<'a> {
        args: &'a ArgumentSet,
        position: usize,
    }

    impl<'a> Cursor<'a> {
        pub fn at(args: &'a ArgumentSet, position: usize) -> Self {
            Self {
                args,
                position: position.min(args.len()),
            }
        }

        pub fn args(&self) -> &'a ArgumentSet {
            self.args
        }

        pub fn position(&self) -> usize {
            self.position
        }

        /// Tokens not yet consumed.
        pub fn remaining(&self) -> usize {
            self.args.len().saturating_sub(self.position)
        }

        pub fn is_exhausted(&self) -> bool {
            self.remaining() == 0
        }

        pub fn peek(&self) -> Option<&'a str> {
            self.args.get(self.position)
        }

        /// Consume and return the next positional token.
        #[allow(clippy::should_implement_trait)]
        pub fn next(&mut self) -> Option<&'a str> {
            let token = self.args.get(self.position)?;
            self.position += 1;
            Some(token)
        }

        /// Consume every remaining token.
        pub fn take_remaining(&mut self) -> Vec<String> {
            let rest = self.args.remaining_from(self.position);
            self.position = self.args.len();
            rest
        }

        /// Consume every remaining token, joined by `separator`.
        pub fn join_remaining(&mut self, separator: &str) -> String {
            let joined = self.args.join_from(self.position, separator);
            self.position = self.args.len();
            joined
        }
    }
}

pub mod lexer {
    use super::set::ArgumentSet;
    use std::collections::HashMap;

    /// Tokenizer settings.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TokenizerOptions {
        /// Characters that open and close a quoted value.
        pub quotes: Vec<char>,
    }

    impl Default for TokenizerOptions {
        fn default() -> Self {
            Self {
                quotes: vec!['"', '\''],
            }
        }
    }

    impl TokenizerOptions {
        fn is_quote(&self, c: char) -> bool {
            self.quotes.contains(&c)
        }

        fn starts_quoted(&self, seg: &str) -> bool {
            seg.chars().next().is_some_and(|c| self.is_quote(c))
        }

        fn ends_quoted(&self, seg: &str) -> bool {
            let mut rev = seg.chars().rev();
            match rev.next() {
                Some(c) if self.is_quote(c) => rev.next() != Some('\\'),
                _ => false,
            }
        }

        /// A segment that opens a quote without closing it.
        fn opens(&self, seg: &str) -> bool {
            self.starts_quoted(seg) && (seg.chars().count() == 1 || !self.ends_quoted(seg))
        }

        /// A segment that closes a quote without opening one.
        fn closes(&self, seg: &str) -> bool {
            self.ends_quoted(seg) && !self.starts_quoted(seg)
        }

        fn balanced(&self, seg: &str) -> bool {
            seg.chars().count() > 1 && self.starts_quoted(seg) && self.ends_quoted(seg)
        }
    }

    /// Tokenize a console line with the default options.
    ///
    /// Rules, applied left to right over whitespace-split segments:
    /// - `--name` names the following segment; if the following segment is itself a
    ///   flag, `name` becomes a positional token instead
    /// - `-x` is the positional token `x` (numbers such as `-5` stay values)
    /// - a segment opening a quote starts a concatenation that runs, space-joined,
    ///   until a segment closes the quote at nesting depth zero
    /// - anything else is the pending name's value, or a positional token
    /// - end of input flushes an open concatenation or pending name
    ///
    /// Tokenizing never fails; malformed input degrades to best-effort tokens.
    pub fn tokenize(input: &str) -> ArgumentSet {
        tokenize_with(input, &TokenizerOptions::default())
    }

    pub fn tokenize_with(input: &str, options: &TokenizerOptions) -> ArgumentSet {
        lex(input.split_whitespace(), options)
    }

    /// Tokenize pre-split arguments (e.g. process argv).
    pub fn tokenize_args<S: AsRef<str>>(argv: &[S], options: &TokenizerOptions) -> ArgumentSet {
        lex(argv.iter().map(AsRef::as_ref), options)
    }

    fn is_number(seg: &str) -> bool {
        seg.parse::<f64>().is_ok()
    }

    #[derive(Default)]
    struct State {
        positional: Vec<String>,
        named: HashMap<String, String>,
        pending: Option<String>,
    }

    impl State {
        fn emit(&mut self, value: String) {
            match self.pending.take() {
                Some(name) => {
                    self.named.insert(name, value);
                }
                None => self.positional.push(value),
            }
        }

        /// A flag follows: a pending name never consumes it.
        fn flush_pending(&mut self) {
            if let Some(name) = self.pending.take() {
                self.positional.push(name);
            }
        }
    }

    fn lex<'a, I>(segments: I, options: &TokenizerOptions) -> ArgumentSet
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut state = State::default();
        // (buffer, nesting depth)
        let mut concat: Option<(String, usize)> = None;

        for seg in segments {
            if let Some((buf, depth)) = concat.as_mut() {
                buf.push(' ');
                buf.push_str(seg);
                if options.balanced(seg) {
                    continue;
                }
                if options.opens(seg) {
                    *depth += 1;
                } else if options.closes(seg) {
                    if *depth == 0 {
                        let value = unquote(buf, options);
                        concat = None;
                        state.emit(value);
                    } else {
                        *depth -= 1;
                    }
                }
                continue;
            }

            if let Some(name) = seg.strip_prefix("--").filter(|n| !n.is_empty()) {
                state.flush_pending();
                state.pending = Some(name.to_string());
                continue;
            }

            if seg.len() > 1 && seg.starts_with('-') && seg != "--" && !is_number(seg) {
                state.flush_pending();
                state.positional.push(seg[1..].to_string());
                continue;
            }

            if options.opens(seg) {
                concat = Some((seg.to_string(), 0));
                continue;
            }

            let value = if options.balanced(seg) {
                unquote(seg, options)
            } else {
                seg.to_string()
            };
            state.emit(value);
        }

        if let Some((buf, _)) = concat.take() {
            let value = unquote(&buf, options);
            state.emit(value);
        }
        state.flush_pending();

        ArgumentSet::new(state.positional, state.named)
    }

    /// Strip the enclosing quotes of an assembled value and unescape `\<quote>`.
    fn unquote(raw: &str, options: &TokenizerOptions) -> String {
        let mut s = raw;
        if options.starts_quoted(s) {
            let mut chars = s.chars();
            chars.next();
            s = chars.as_str();
        }
        if options.ends_quoted(s) {
            let mut chars = s.chars();
            chars.next_back();
            s = chars.as_str();
        }

        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\\' && chars.peek().is_some_and(|n| options.is_quote(*n)) {
                continue;
            }
            out.push(c);
        }
        out
    }
}

pub mod route {
    use super::set::ArgumentSet;
    use std::collections::HashMap;

    /// Build an argument set from an HTTP-style path and query string.
    ///
    /// Non-empty path segments become positional tokens; `key=value` query pairs
    /// become named tokens and bare query keys become positional tokens after the
    /// path segments. Percent escapes and `+` are decoded.
    pub fn from_route(path: &str, query: Option<&str>) -> ArgumentSet {
        let mut positional: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(decode)
            .collect();

        let mut named = HashMap::new();
        for pair in query.unwrap_or_default().split('&') {
            if pair.is_empty() {
                continue;
            }
            match pair.split_once('=') {
                Some((k, v)) => {
                    named.insert(decode(k), decode(v));
                }
                None => positional.push(decode(pair)),
            }
        }

        ArgumentSet::new(positional, named)
    }

    fn hex(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    fn decode(raw: &str) -> String {
        let bytes = raw.as_bytes();
        let mut out = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'+' => out.push(b' '),
                b'%' if i + 2 < bytes.len() => {
                    match (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                        (Some(h), Some(l)) => {
                            out.push(h << 4 | l);
                            i += 3;
                            continue;
                        }
                        _ => out.push(b'%'),
                    }
                }
                b => out.push(b),
            }
            i += 1;
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

pub use lexer::{TokenizerOptions, tokenize, tokenize_args, tokenize_with};
pub use route::from_route;
pub use set::{ArgumentSet, Cursor};

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn quoted_value_binds_to_pending_name() {
        let set = tokenize(r#"find --name "New York" city"#);
        assert_eq!(set.named("name"), Some("New York"));
        assert_eq!(set.positional(), argv(&["find", "city"]).as_slice());
    }

    #[test]
    fn name_followed_by_flag_becomes_positional() {
        let set = tokenize("-v --name");
        assert_eq!(set.positional(), argv(&["v", "name"]).as_slice());
        assert_eq!(set.named_len(), 0);

        let set = tokenize("--dry --name x");
        assert_eq!(set.positional(), argv(&["dry"]).as_slice());
        assert_eq!(set.named("name"), Some("x"));
    }

    #[test]
    fn split_and_unsplit_input_agree() {
        let inputs = [
            "math add 2 3",
            r#"say --to bob "hello there world" -q"#,
            "--a 1 --b --c 'x y' tail",
            "--open \"never closed",
        ];
        for input in inputs {
            let split: Vec<&str> = input.split_whitespace().collect();
            assert_eq!(
                tokenize(input),
                tokenize_args(&split, &TokenizerOptions::default()),
                "mismatch for {input:?}"
            );
        }
    }

    #[test]
    fn nested_quotes_track_depth() {
        let set = tokenize(r#"say "outer "inner text" tail" end"#);
        assert_eq!(set.get(0), Some("say"));
        assert_eq!(set.get(1), Some(r#"outer "inner text" tail"#));
        assert_eq!(set.get(2), Some("end"));
    }

    #[test]
    fn escaped_quote_does_not_close() {
        let set = tokenize(r#"say "a \" b" c"#);
        assert_eq!(set.get(1), Some(r#"a " b"#));
        assert_eq!(set.get(2), Some("c"));
    }

    #[test]
    fn unterminated_input_flushes() {
        let set = tokenize("run --target");
        assert_eq!(set.positional(), argv(&["run", "target"]).as_slice());

        let set = tokenize(r#"run --msg "half open"#);
        assert_eq!(set.named("msg"), Some("half open"));
    }

    #[test]
    fn negative_numbers_stay_values() {
        let set = tokenize("math add -5 --y -2.5");
        assert_eq!(set.positional(), argv(&["math", "add", "-5"]).as_slice());
        assert_eq!(set.named("y"), Some("-2.5"));
    }

    #[test]
    fn named_lookup_falls_back_to_case_insensitive() {
        let set = tokenize("--Name bob");
        assert_eq!(set.named("Name"), Some("bob"));
        assert_eq!(set.named("name"), Some("bob"));
        assert_eq!(set.named("other"), None);
    }

    #[test]
    fn cursor_consumes_and_rewinds() {
        let set = tokenize("a b c d");
        let mut cursor = set.cursor();
        assert_eq!(cursor.next(), Some("a"));
        let saved = cursor;
        assert_eq!(cursor.remaining(), 3);
        assert_eq!(cursor.join_remaining("-"), "b-c-d");
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.next(), None);

        let mut cursor = saved;
        assert_eq!(cursor.take_remaining(), argv(&["b", "c", "d"]));
    }

    #[test]
    fn route_splits_path_and_query() {
        let set = from_route("/math/add/2", Some("y=3&verbose&note=a%20b+c"));
        assert_eq!(set.positional(), argv(&["math", "add", "2", "verbose"]).as_slice());
        assert_eq!(set.named("y"), Some("3"));
        assert_eq!(set.named("note"), Some("a b c"));
    }
}
