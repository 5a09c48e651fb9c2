//! Item-position `macro_rules!` expansion.
//!
//! Only macros defined in the unit being parsed are expanded, and only
//! through rules made of plain tokens and single-fragment captures.
//! Repetitions (`$(...)*`) are not supported; invocations that need them
//! stay unexpanded.

use std::collections::HashMap;

use proc_macro2::{Delimiter, Group, LineColumn, TokenStream, TokenTree};
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::Item;
use tracing::debug;

/// Expansions nested deeper than this are left alone.
pub const MAX_EXPANSION_DEPTH: usize = 8;

#[derive(Debug, Clone)]
enum Matcher {
    Token(TokenTree),
    Group(Delimiter, Vec<Matcher>),
    Fragment { name: String, kind: String },
}

#[derive(Debug, Clone)]
struct Rule {
    matcher: Vec<Matcher>,
    transcriber: TokenStream,
}

#[derive(Debug, Clone)]
pub struct MacroDef {
    rules: Vec<Rule>,
    /// Extent of the `macro_rules!` item.
    pub start: LineColumn,
    pub end: LineColumn,
}

impl MacroDef {
    /// Whether `at` is spelled inside this definition.
    pub fn contains(&self, at: LineColumn) -> bool {
        let pos = (at.line, at.column);
        (self.start.line, self.start.column) <= pos && pos <= (self.end.line, self.end.column)
    }
}

#[derive(Debug, Default)]
pub struct MacroTable {
    defs: HashMap<String, MacroDef>,
}

impl MacroTable {
    pub fn collect(file: &syn::File) -> Self {
        let mut table = MacroTable::default();
        table.visit_file(file);
        table
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Items an invocation expands to, with the definition that made them.
    pub fn expand(&self, mac: &syn::Macro) -> Option<(&MacroDef, Vec<Item>)> {
        let def = self.defs.get(&mac.path.get_ident()?.to_string())?;
        let input: Vec<TokenTree> = mac.tokens.clone().into_iter().collect();
        let output = def.rules.iter().find_map(|rule| {
            let mut captures = HashMap::new();
            if !match_sequence(&rule.matcher, &input, &mut captures) {
                return None;
            }
            transcribe(rule.transcriber.clone(), &captures)
        })?;
        match syn::parse2::<syn::File>(output) {
            Ok(file) => Some((def, file.items)),
            Err(e) => {
                debug!(error = %e, "macro expansion is not a list of items");
                None
            }
        }
    }
}

impl<'ast> Visit<'ast> for MacroTable {
    fn visit_item_macro(&mut self, m: &'ast syn::ItemMacro) {
        let Some(ident) = &m.ident else {
            return;
        };
        if !m.mac.path.is_ident("macro_rules") {
            return;
        }
        let Some(rules) = parse_rules(m.mac.tokens.clone()) else {
            debug!(name = %ident, "macro_rules body not understood");
            return;
        };
        let span = m.span();
        self.defs
            .entry(ident.to_string())
            .or_insert(MacroDef { rules, start: span.start(), end: span.end() });
    }

    // Macros local to a body do not produce items of the unit.
    fn visit_item_fn(&mut self, _: &'ast syn::ItemFn) {}

    fn visit_impl_item_fn(&mut self, _: &'ast syn::ImplItemFn) {}
}

/// `(matcher) => { transcriber };` repeated. Rules using repetitions are
/// dropped; the definition survives if any rule is usable.
fn parse_rules(tokens: TokenStream) -> Option<Vec<Rule>> {
    let mut rules = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(tt) = iter.next() {
        let TokenTree::Group(matcher) = tt else {
            return None;
        };
        match (iter.next(), iter.next()) {
            (Some(TokenTree::Punct(eq)), Some(TokenTree::Punct(gt))) if eq.as_char() == '=' && gt.as_char() == '>' => {}
            _ => return None,
        }
        let Some(TokenTree::Group(body)) = iter.next() else {
            return None;
        };
        if matches!(iter.peek(), Some(TokenTree::Punct(p)) if p.as_char() == ';') {
            iter.next();
        }
        if let Some(matcher) = compile_matcher(matcher.stream()) {
            rules.push(Rule { matcher, transcriber: body.stream() });
        }
    }
    (!rules.is_empty()).then_some(rules)
}

fn compile_matcher(stream: TokenStream) -> Option<Vec<Matcher>> {
    let mut out = Vec::new();
    let mut iter = stream.into_iter();
    while let Some(tt) = iter.next() {
        match tt {
            TokenTree::Punct(p) if p.as_char() == '$' => {
                let Some(TokenTree::Ident(name)) = iter.next() else {
                    return None;
                };
                match (iter.next(), iter.next()) {
                    (Some(TokenTree::Punct(colon)), Some(TokenTree::Ident(kind))) if colon.as_char() == ':' => {
                        out.push(Matcher::Fragment { name: name.to_string(), kind: kind.to_string() });
                    }
                    _ => return None,
                }
            }
            TokenTree::Group(g) => out.push(Matcher::Group(g.delimiter(), compile_matcher(g.stream())?)),
            other => out.push(Matcher::Token(other)),
        }
    }
    Some(out)
}

fn same_token(a: &TokenTree, b: &TokenTree) -> bool {
    match (a, b) {
        (TokenTree::Ident(x), TokenTree::Ident(y)) => x == y,
        (TokenTree::Punct(x), TokenTree::Punct(y)) => x.as_char() == y.as_char(),
        (TokenTree::Literal(x), TokenTree::Literal(y)) => x.to_string() == y.to_string(),
        _ => false,
    }
}

/// Token trees a fragment captures at the start of `input`; 0 means no match.
fn fragment_len(kind: &str, input: &[TokenTree], next: Option<&Matcher>) -> usize {
    let first = input.first();
    match kind {
        "ident" => usize::from(matches!(first, Some(TokenTree::Ident(_)))),
        "literal" => usize::from(matches!(first, Some(TokenTree::Literal(_)))),
        "tt" => usize::from(first.is_some()),
        "block" => usize::from(matches!(first, Some(TokenTree::Group(g)) if g.delimiter() == Delimiter::Brace)),
        // `ty`, `expr`, `path` and the rest run up to the next literal token.
        _ => match next {
            None => input.len(),
            Some(Matcher::Token(stop)) => input.iter().position(|tt| same_token(stop, tt)).unwrap_or(0),
            Some(_) => usize::from(first.is_some()),
        },
    }
}

fn match_sequence(pattern: &[Matcher], input: &[TokenTree], captures: &mut HashMap<String, TokenStream>) -> bool {
    let mut pos = 0;
    for (i, matcher) in pattern.iter().enumerate() {
        match matcher {
            Matcher::Token(expected) => match input.get(pos) {
                Some(tt) if same_token(expected, tt) => pos += 1,
                _ => return false,
            },
            Matcher::Group(delimiter, inner) => match input.get(pos) {
                Some(TokenTree::Group(g)) if g.delimiter() == *delimiter => {
                    let tokens: Vec<TokenTree> = g.stream().into_iter().collect();
                    if !match_sequence(inner, &tokens, captures) {
                        return false;
                    }
                    pos += 1;
                }
                _ => return false,
            },
            Matcher::Fragment { name, kind } => {
                let len = fragment_len(kind, &input[pos..], pattern.get(i + 1));
                if len == 0 {
                    return false;
                }
                captures.insert(name.clone(), input[pos..pos + len].iter().cloned().collect());
                pos += len;
            }
        }
    }
    pos == input.len()
}

/// Substitute captures into `stream`. Spans are kept, so tokens from the
/// definition still point into it.
fn transcribe(stream: TokenStream, captures: &HashMap<String, TokenStream>) -> Option<TokenStream> {
    let mut out = TokenStream::new();
    let mut iter = stream.into_iter();
    while let Some(tt) = iter.next() {
        match tt {
            TokenTree::Punct(p) if p.as_char() == '$' => match iter.next() {
                Some(TokenTree::Ident(name)) if name == "crate" => out.extend([TokenTree::Ident(name)]),
                Some(TokenTree::Ident(name)) => out.extend(captures.get(&name.to_string())?.clone()),
                _ => return None,
            },
            TokenTree::Group(g) => {
                let mut group = Group::new(g.delimiter(), transcribe(g.stream(), captures)?);
                group.set_span(g.span());
                out.extend([TokenTree::Group(group)]);
            }
            other => out.extend([other]),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(source: &str) -> (MacroTable, syn::File) {
        let file = syn::parse_file(source).unwrap();
        (MacroTable::collect(&file), file)
    }

    fn invocation(file: &syn::File) -> &syn::Macro {
        file.items
            .iter()
            .find_map(|item| match item {
                Item::Macro(m) if m.ident.is_none() => Some(&m.mac),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_expands_fragments_into_items() {
        let (macros, file) = table(
            "macro_rules! pair {\n    ($a:ident, $b:ident => $ty:ty) => {\n        fn $a() -> $ty { 0 }\n        fn $b() -> $ty { 1 }\n    };\n}\npair!(left, right => u8);\n",
        );
        assert_eq!(macros.len(), 1);
        let (def, items) = macros.expand(invocation(&file)).unwrap();
        let names: Vec<String> = items
            .iter()
            .filter_map(|item| match item {
                Item::Fn(f) => Some(f.sig.ident.to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["left", "right"]);
        assert_eq!((def.start.line, def.end.line), (1, 6));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let (macros, file) = table(
            "macro_rules! pick {\n    (one) => { fn one() {} };\n    ($other:ident) => { fn $other() {} };\n}\npick!(two);\n",
        );
        let (_, items) = macros.expand(invocation(&file)).unwrap();
        assert!(matches!(&items[0], Item::Fn(f) if f.sig.ident == "two"));
    }

    #[test]
    fn test_repetitions_and_unknown_macros_stay_opaque() {
        let (macros, file) = table("macro_rules! many {\n    ($($f:ident),*) => { $(fn $f() {})* };\n}\nmany!(a, b);\n");
        assert!(macros.is_empty());
        assert!(macros.expand(invocation(&file)).is_none());

        let (macros, file) = table("thread_local! { static X: u8 = 0; }\n");
        assert!(macros.expand(invocation(&file)).is_none());
    }

    #[test]
    fn test_body_local_macros_are_not_collected() {
        let (macros, _) = table("fn f() {\n    macro_rules! local { () => { fn g() {} }; }\n}\n");
        assert!(macros.is_empty());
    }
}
