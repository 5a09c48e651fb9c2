//! `syn` front end for Rust source units.
//!
//! A unit is parsed twice over: a symbol pass collects every function
//! symbol the unit defines or declares, then the declaration pass builds
//! the tree and resolves call paths against those symbols.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use proc_macro2::LineColumn;
use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::{self, Visit};
use syn::{FnArg, ForeignItem, ImplItem, Item, ItemImpl, Pat, ReturnType, Signature, Token, TraitItem};
use tracing::debug;

use crate::domain::ast::{
    Block, CalleeRef, Decl, Expr, FunctionDecl, LoopKind, ParamDecl, SourceLocation, SourceRange, SourceUnit,
    Stmt, TypeKind, TypeRef, Visibility,
};
use crate::error::FrontEndError;
use crate::infrastructure::macros::{MacroDef, MacroTable, MAX_EXPANSION_DEPTH};
use crate::ports::FrontEnd;

pub struct SynFrontEnd {
    system_roots: Vec<PathBuf>,
}

impl SynFrontEnd {
    pub fn new(system_roots: Vec<PathBuf>) -> Self {
        Self { system_roots }
    }

    /// Whether `path` lies under one of the system roots.
    pub fn is_system_path(&self, path: &str) -> bool {
        let path = Path::new(path);
        if self.system_roots.iter().any(|root| path.starts_with(root)) {
            return true;
        }
        match path.canonicalize() {
            Ok(abs) => self
                .system_roots
                .iter()
                .filter_map(|root| root.canonicalize().ok())
                .any(|root| abs.starts_with(root)),
            Err(_) => false,
        }
    }
}

/// System roots named by `-isystem <dir>` / `-isystem<dir>`. Other flags
/// have no meaning for this front end.
pub fn system_roots_from_flags(flags: &[String]) -> Vec<PathBuf> {
    let mut roots = Vec::new();
    let mut iter = flags.iter();
    while let Some(flag) = iter.next() {
        if flag == "-isystem" {
            match iter.next() {
                Some(dir) => roots.push(PathBuf::from(dir)),
                None => debug!("-isystem without a directory"),
            }
        } else if let Some(dir) = flag.strip_prefix("-isystem") {
            roots.push(PathBuf::from(dir));
        } else {
            debug!(flag = %flag, "ignoring compiler flag");
        }
    }
    roots
}

impl FrontEnd for SynFrontEnd {
    fn parse_unit(&self, path: &str, source: &str) -> Result<SourceUnit, FrontEndError> {
        let file = syn::parse_file(source).map_err(|e| {
            let start = e.span().start();
            FrontEndError::Parse {
                path: path.to_string(),
                line: start.line,
                column: start.column + 1,
                message: e.to_string(),
            }
        })?;

        let macros = MacroTable::collect(&file);
        let root = Scope::root(module_path(path));
        let mut collector = SymbolCollector { scope: root.clone(), symbols: HashSet::new(), macros: &macros };
        collector.visit_file(&file);

        let unit = UnitLowering {
            path,
            is_system: self.is_system_path(path),
            symbols: &collector.symbols,
            macros: &macros,
        };
        let decls = unit.items(&file.items, &root.clone().with_imports(&file.items));
        debug!(unit = %path, module = %root.module.join("::"), symbols = collector.symbols.len(), "parsed unit");
        Ok(SourceUnit { path: path.to_string(), decls })
    }
}

// ─────────────────────────────────────────────────────────────────────
// Scopes and symbols
// ─────────────────────────────────────────────────────────────────────

/// Module path of the file at `path` inside its crate: `src/util.rs` is
/// `util`, `src/net/mod.rs` is `net`. Crate roots (`src/lib.rs`,
/// `src/main.rs`, anything under `src/bin/`) and files outside a `src`
/// directory have an empty path.
pub fn module_path(path: &str) -> Vec<String> {
    let components: Vec<&str> = path.split(|c: char| c == '/' || c == '\\').filter(|c| !c.is_empty() && *c != ".").collect();
    let Some(src) = components.iter().rposition(|c| *c == "src") else {
        return Vec::new();
    };
    let rel = &components[src + 1..];
    if rel.first() == Some(&"bin") {
        return Vec::new();
    }
    let mut module: Vec<String> = rel.iter().map(|c| c.to_string()).collect();
    if let Some(file) = module.pop() {
        let stem = file.strip_suffix(".rs").unwrap_or(&file);
        let is_root = module.is_empty() && (stem == "lib" || stem == "main");
        if stem != "mod" && !is_root {
            module.push(stem.to_string());
        }
    }
    module
}

#[derive(Debug, Clone, Default)]
struct Scope {
    module: Vec<String>,
    /// `Type`, `<Type as Trait>` or `Trait` inside impl and trait blocks.
    owner: Option<String>,
    self_ty: Option<String>,
    /// Names brought in by `use`, mapped to crate-relative paths.
    imports: HashMap<String, Vec<String>>,
    /// Macro expansions this scope sits inside.
    macro_depth: usize,
}

impl Scope {
    fn root(module: Vec<String>) -> Scope {
        Scope { module, ..Scope::default() }
    }

    fn module(&self, name: &str) -> Scope {
        let mut module = self.module.clone();
        module.push(name.to_string());
        Scope { module, macro_depth: self.macro_depth, ..Scope::default() }
    }

    fn expansion(&self) -> Scope {
        Scope { macro_depth: self.macro_depth + 1, ..self.clone() }
    }

    /// This scope with the `use` items of `items` resolved against it.
    fn with_imports(mut self, items: &[Item]) -> Scope {
        let children: HashSet<String> = items
            .iter()
            .filter_map(|item| match item {
                Item::Mod(m) => Some(m.ident.to_string()),
                _ => None,
            })
            .collect();
        let mut imports = HashMap::new();
        for item in items {
            if let Item::Use(u) = item {
                collect_use(&u.tree, &mut Vec::new(), &mut imports);
            }
        }
        for (alias, path) in imports {
            let absolute = self.absolute(&path, &children);
            self.imports.insert(alias, absolute);
        }
        self
    }

    /// Crate-relative form of a path written in this module.
    fn absolute(&self, path: &[String], children: &HashSet<String>) -> Vec<String> {
        match path.first().map(String::as_str) {
            Some("crate") => path[1..].to_vec(),
            Some("self") => self.module.iter().chain(&path[1..]).cloned().collect(),
            Some("super") => {
                let mut module = self.module.clone();
                let mut rest = path;
                while rest.first().map(String::as_str) == Some("super") {
                    module.pop();
                    rest = &rest[1..];
                }
                module.into_iter().chain(rest.iter().cloned()).collect()
            }
            Some(first) if children.contains(first) => self.module.iter().chain(path).cloned().collect(),
            _ => path.to_vec(),
        }
    }

    fn impl_block(&self, imp: &ItemImpl) -> Scope {
        let self_ty = type_name(&imp.self_ty);
        let owner = match &imp.trait_ {
            Some((_, path, _)) => format!("<{} as {}>", self_ty, last_ident(path)),
            None => self_ty.clone(),
        };
        Scope { owner: Some(owner), self_ty: Some(self_ty), ..self.clone() }
    }

    fn trait_block(&self, name: &str) -> Scope {
        Scope { owner: Some(name.to_string()), self_ty: None, ..self.clone() }
    }

    fn qualify(&self, name: &str) -> String {
        let mut parts = self.module.clone();
        parts.extend(self.owner.clone());
        parts.push(name.to_string());
        parts.join("::")
    }

    fn in_module(&self, module: &[String], rest: &[String]) -> String {
        module.iter().chain(rest).cloned().collect::<Vec<_>>().join("::")
    }

    /// Symbols a written call path could refer to, most specific first.
    fn candidates(&self, segments: &[String]) -> Vec<String> {
        if let Some(imported) = segments.first().and_then(|first| self.imports.get(first)) {
            return vec![imported.iter().chain(&segments[1..]).cloned().collect::<Vec<_>>().join("::")];
        }
        match segments.first().map(String::as_str) {
            Some("crate") => vec![segments[1..].join("::")],
            Some("self") => vec![self.in_module(&self.module, &segments[1..])],
            Some("super") => {
                let mut module = self.module.clone();
                let mut rest = segments;
                while rest.first().map(String::as_str) == Some("super") {
                    module.pop();
                    rest = &rest[1..];
                }
                vec![self.in_module(&module, rest)]
            }
            Some("Self") => {
                let rest = &segments[1..];
                [&self.owner, &self.self_ty]
                    .into_iter()
                    .flatten()
                    .map(|owner| {
                        let mut path = vec![owner.clone()];
                        path.extend_from_slice(rest);
                        self.in_module(&self.module, &path)
                    })
                    .collect()
            }
            _ => vec![self.in_module(&self.module, segments), segments.join("::")],
        }
    }
}

/// Flatten a `use` tree into alias -> written path. Globs import nothing
/// nameable.
fn collect_use(tree: &syn::UseTree, prefix: &mut Vec<String>, out: &mut HashMap<String, Vec<String>>) {
    match tree {
        syn::UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            collect_use(&p.tree, prefix, out);
            prefix.pop();
        }
        syn::UseTree::Name(n) if n.ident == "self" => {
            if let Some(last) = prefix.last() {
                out.insert(last.clone(), prefix.clone());
            }
        }
        syn::UseTree::Name(n) => {
            let mut path = prefix.clone();
            path.push(n.ident.to_string());
            out.insert(n.ident.to_string(), path);
        }
        syn::UseTree::Rename(r) => {
            let mut path = prefix.clone();
            path.push(r.ident.to_string());
            out.insert(r.rename.to_string(), path);
        }
        syn::UseTree::Group(g) => {
            for item in &g.items {
                collect_use(item, prefix, out);
            }
        }
        syn::UseTree::Glob(_) => {}
    }
}

fn symbol_name(scope: &Scope, ident: &syn::Ident, attrs: &[syn::Attribute]) -> String {
    if is_no_mangle(attrs) {
        ident.to_string()
    } else {
        scope.qualify(&ident.to_string())
    }
}

fn is_no_mangle(attrs: &[syn::Attribute]) -> bool {
    attrs
        .iter()
        .any(|a| a.path().is_ident("no_mangle") || a.meta.to_token_stream().to_string().contains("no_mangle"))
}

struct SymbolCollector<'m> {
    scope: Scope,
    symbols: HashSet<String>,
    macros: &'m MacroTable,
}

impl SymbolCollector<'_> {
    fn expanded(&mut self, mac: &syn::Macro) {
        if self.scope.macro_depth >= MAX_EXPANSION_DEPTH {
            return;
        }
        let Some((_, items)) = self.macros.expand(mac) else {
            return;
        };
        let inner = self.scope.expansion();
        let outer = std::mem::replace(&mut self.scope, inner);
        for item in &items {
            Visit::visit_item(self, item);
        }
        self.scope = outer;
    }
}

impl<'ast> Visit<'ast> for SymbolCollector<'_> {
    fn visit_item_macro(&mut self, m: &'ast syn::ItemMacro) {
        if m.ident.is_none() {
            self.expanded(&m.mac);
        }
    }

    fn visit_item_fn(&mut self, f: &'ast syn::ItemFn) {
        // Items nested in bodies are not lowered.
        self.symbols.insert(symbol_name(&self.scope, &f.sig.ident, &f.attrs));
    }

    fn visit_item_mod(&mut self, m: &'ast syn::ItemMod) {
        if m.content.is_none() {
            return;
        }
        let inner = self.scope.module(&m.ident.to_string());
        let outer = std::mem::replace(&mut self.scope, inner);
        visit::visit_item_mod(self, m);
        self.scope = outer;
    }

    fn visit_item_impl(&mut self, imp: &'ast ItemImpl) {
        let scope = self.scope.impl_block(imp);
        for item in &imp.items {
            if let ImplItem::Fn(m) = item {
                self.symbols.insert(symbol_name(&scope, &m.sig.ident, &m.attrs));
            }
        }
    }

    fn visit_item_trait(&mut self, t: &'ast syn::ItemTrait) {
        let scope = self.scope.trait_block(&t.ident.to_string());
        for item in &t.items {
            if let TraitItem::Fn(m) = item {
                self.symbols.insert(symbol_name(&scope, &m.sig.ident, &m.attrs));
            }
        }
    }

    fn visit_item_foreign_mod(&mut self, fm: &'ast syn::ItemForeignMod) {
        for item in &fm.items {
            if let ForeignItem::Fn(f) = item {
                self.symbols.insert(f.sig.ident.to_string());
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Declarations
// ─────────────────────────────────────────────────────────────────────

struct UnitLowering<'a> {
    path: &'a str,
    is_system: bool,
    symbols: &'a HashSet<String>,
    macros: &'a MacroTable,
}

struct FnParts<'a> {
    attrs: &'a [syn::Attribute],
    sig: &'a Signature,
    body: Option<&'a syn::Block>,
    visibility: Visibility,
    /// Foreign functions keep their bare name.
    unmangled: bool,
    start: LineColumn,
    end: LineColumn,
}

impl UnitLowering<'_> {
    fn items(&self, items: &[Item], scope: &Scope) -> Vec<Decl> {
        items.iter().flat_map(|item| self.item(item, scope)).collect()
    }

    fn item(&self, item: &Item, scope: &Scope) -> Vec<Decl> {
        match item {
            Item::Fn(f) => vec![Decl::Function(self.function(
                scope,
                FnParts {
                    attrs: &f.attrs,
                    sig: &f.sig,
                    body: Some(&f.block),
                    visibility: visibility(&f.vis),
                    unmangled: false,
                    start: item_start(&f.vis, &f.sig),
                    end: f.span().end(),
                },
            ))],
            Item::Mod(m) => match &m.content {
                Some((_, items)) => {
                    let name = m.ident.to_string();
                    let decls = self.items(items, &scope.module(&name).with_imports(items));
                    vec![Decl::Module { name, decls }]
                }
                None => vec![Decl::Other],
            },
            Item::Impl(imp) => {
                let inner = scope.impl_block(imp);
                let decls = imp
                    .items
                    .iter()
                    .filter_map(|item| match item {
                        ImplItem::Fn(m) => Some(Decl::Function(self.function(
                            &inner,
                            FnParts {
                                attrs: &m.attrs,
                                sig: &m.sig,
                                body: Some(&m.block),
                                visibility: if imp.trait_.is_some() {
                                    Visibility::Public
                                } else {
                                    visibility(&m.vis)
                                },
                                unmangled: false,
                                start: item_start(&m.vis, &m.sig),
                                end: m.span().end(),
                            },
                        ))),
                        _ => None,
                    })
                    .collect();
                vec![Decl::Impl { self_ty: type_name(&imp.self_ty), decls }]
            }
            Item::Trait(t) => {
                let name = t.ident.to_string();
                let inner = scope.trait_block(&name);
                let decls = t
                    .items
                    .iter()
                    .filter_map(|item| match item {
                        TraitItem::Fn(m) => Some(Decl::Function(self.function(
                            &inner,
                            FnParts {
                                attrs: &m.attrs,
                                sig: &m.sig,
                                body: m.default.as_ref(),
                                visibility: Visibility::Public,
                                unmangled: false,
                                start: m.sig.span().start(),
                                end: m.span().end(),
                            },
                        ))),
                        _ => None,
                    })
                    .collect();
                vec![Decl::Impl { self_ty: name, decls }]
            }
            Item::Macro(m) if m.ident.is_none() && scope.macro_depth < MAX_EXPANSION_DEPTH => {
                let Some((def, items)) = self.macros.expand(&m.mac) else {
                    return vec![Decl::Other];
                };
                let start = m.span().start();
                let mut site = SourceLocation::new(self.path, start.line as u32, start.column as u32 + 1);
                site.is_system = self.is_system;
                let mut decls = self.items(&items, &scope.expansion());
                for decl in &mut decls {
                    mark_expansion(decl, def, &site);
                }
                decls
            }
            Item::ForeignMod(fm) => fm
                .items
                .iter()
                .filter_map(|item| match item {
                    ForeignItem::Fn(f) => Some(Decl::Function(self.function(
                        scope,
                        FnParts {
                            attrs: &f.attrs,
                            sig: &f.sig,
                            body: None,
                            visibility: Visibility::Public,
                            unmangled: true,
                            start: item_start(&f.vis, &f.sig),
                            end: f.span().end(),
                        },
                    ))),
                    _ => None,
                })
                .collect(),
            _ => vec![Decl::Other],
        }
    }

    fn function(&self, scope: &Scope, parts: FnParts<'_>) -> FunctionDecl {
        let sig = parts.sig;
        let name = sig.ident.to_string();
        let qualified_name = scope.qualify(&name);
        let symbol = if parts.unmangled {
            name.clone()
        } else {
            symbol_name(scope, &sig.ident, parts.attrs)
        };
        let params = param_decls(sig);
        let body = parts.body.map(|block| {
            let ctx = BodyContext {
                symbols: self.symbols,
                scope,
                params: params
                    .iter()
                    .enumerate()
                    .filter_map(|(i, p)| p.name.clone().map(|n| (n, i)))
                    .collect(),
            };
            ctx.block(block)
        });

        FunctionDecl {
            name,
            qualified_name,
            symbol,
            params,
            return_type: return_type(&sig.output),
            variadic: sig.variadic.is_some(),
            visibility: parts.visibility,
            range: self.range(parts.start, parts.end),
            body,
        }
    }

    /// Line 0 means the span carries no location.
    fn range(&self, start: LineColumn, end: LineColumn) -> SourceRange {
        let at = |line: usize, column: usize| {
            (line > 0).then(|| {
                let mut loc = SourceLocation::new(self.path, line as u32, column as u32);
                loc.is_system = self.is_system;
                loc
            })
        };
        SourceRange {
            begin: at(start.line, start.column + 1),
            // Exclusive 0-based end column is the 1-based column of the last character.
            end: at(end.line, end.column.max(1)),
        }
    }
}

fn mark_expansion(decl: &mut Decl, def: &MacroDef, site: &SourceLocation) {
    match decl {
        Decl::Function(f) => {
            for loc in [f.range.begin.as_mut(), f.range.end.as_mut()].into_iter().flatten() {
                set_expansion(loc, def, site);
            }
        }
        Decl::Module { decls, .. } | Decl::Impl { decls, .. } => {
            decls.iter_mut().for_each(|d| mark_expansion(d, def, site));
        }
        Decl::Other => {}
    }
}

/// Tokens spelled inside `def` were produced by the expansion at `site`;
/// tokens passed in by the invocation keep their own location.
fn set_expansion(loc: &mut SourceLocation, def: &MacroDef, site: &SourceLocation) {
    if let Some(outer) = loc.expansion.as_deref_mut() {
        return set_expansion(outer, def, site);
    }
    let at = LineColumn { line: loc.line as usize, column: (loc.column as usize).saturating_sub(1) };
    if def.contains(at) {
        loc.expansion = Some(Box::new(site.clone()));
    }
}

fn visibility(vis: &syn::Visibility) -> Visibility {
    match vis {
        syn::Visibility::Inherited => Visibility::Private,
        _ => Visibility::Public,
    }
}

/// First token of a function item, skipping attributes and doc comments.
fn item_start(vis: &syn::Visibility, sig: &Signature) -> LineColumn {
    match vis {
        syn::Visibility::Inherited => sig.span().start(),
        v => v.span().start(),
    }
}

fn param_decls(sig: &Signature) -> Vec<ParamDecl> {
    sig.inputs
        .iter()
        .map(|arg| match arg {
            FnArg::Receiver(r) => ParamDecl { name: Some("self".to_string()), ty: receiver_type(r) },
            FnArg::Typed(t) => ParamDecl { name: pat_name(&t.pat), ty: type_ref(&t.ty) },
        })
        .collect()
}

fn receiver_type(r: &syn::Receiver) -> TypeRef {
    if r.colon_token.is_some() {
        return type_ref(&r.ty);
    }
    match (&r.reference, &r.mutability) {
        (Some(_), Some(_)) => TypeRef::new("&mut Self", TypeKind::Pointer(Box::new(TypeKind::Other))),
        (Some(_), None) => TypeRef::new("&Self", TypeKind::Pointer(Box::new(TypeKind::Other))),
        (None, _) => TypeRef::new("Self", TypeKind::Other),
    }
}

fn pat_name(pat: &Pat) -> Option<String> {
    match pat {
        Pat::Ident(p) => Some(p.ident.to_string()),
        _ => None,
    }
}

fn return_type(output: &ReturnType) -> TypeRef {
    match output {
        ReturnType::Default => TypeRef::unit(),
        ReturnType::Type(_, ty) => type_ref(ty),
    }
}

// ─────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────

pub fn type_ref(ty: &syn::Type) -> TypeRef {
    TypeRef::new(spell_type(ty), type_kind(ty))
}

fn tokens(t: &impl ToTokens) -> String {
    t.to_token_stream().to_string()
}

fn last_ident(path: &syn::Path) -> String {
    path.segments
        .last()
        .map(|s| s.ident.to_string())
        .unwrap_or_else(|| tokens(path))
}

fn type_name(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(p) => last_ident(&p.path),
        syn::Type::Reference(r) => type_name(&r.elem),
        other => spell_type(other),
    }
}

fn spell_type(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(p) if p.qself.is_none() => spell_path(&p.path),
        syn::Type::Reference(r) => {
            let lifetime = r.lifetime.as_ref().map(|l| format!("'{} ", l.ident)).unwrap_or_default();
            let mutability = if r.mutability.is_some() { "mut " } else { "" };
            format!("&{}{}{}", lifetime, mutability, spell_type(&r.elem))
        }
        syn::Type::Ptr(p) => {
            let qualifier = if p.mutability.is_some() { "mut" } else { "const" };
            format!("*{} {}", qualifier, spell_type(&p.elem))
        }
        syn::Type::Slice(s) => format!("[{}]", spell_type(&s.elem)),
        syn::Type::Array(a) => format!("[{}; {}]", spell_type(&a.elem), tokens(&a.len)),
        syn::Type::Tuple(t) => {
            let elems: Vec<String> = t.elems.iter().map(spell_type).collect();
            match elems.len() {
                1 => format!("({},)", elems[0]),
                _ => format!("({})", elems.join(", ")),
            }
        }
        syn::Type::Paren(p) => spell_type(&p.elem),
        syn::Type::Group(g) => spell_type(&g.elem),
        syn::Type::Never(_) => "!".to_string(),
        other => tokens(other),
    }
}

fn spell_path(path: &syn::Path) -> String {
    let segments: Vec<String> = path
        .segments
        .iter()
        .map(|seg| match &seg.arguments {
            syn::PathArguments::None => seg.ident.to_string(),
            syn::PathArguments::AngleBracketed(args) => {
                let args: Vec<String> = args
                    .args
                    .iter()
                    .map(|arg| match arg {
                        syn::GenericArgument::Type(t) => spell_type(t),
                        syn::GenericArgument::Lifetime(l) => format!("'{}", l.ident),
                        other => tokens(other),
                    })
                    .collect();
                format!("{}<{}>", seg.ident, args.join(", "))
            }
            syn::PathArguments::Parenthesized(args) => format!("{}{}", seg.ident, tokens(args)),
        })
        .collect();
    let prefix = if path.leading_colon.is_some() { "::" } else { "" };
    format!("{}{}", prefix, segments.join("::"))
}

fn scalar_kind(name: &str) -> Option<TypeKind> {
    let kind = match name {
        "bool" => TypeKind::Int { bits: 1 },
        "i8" | "u8" | "c_char" | "c_schar" | "c_uchar" => TypeKind::Int { bits: 8 },
        "i16" | "u16" | "c_short" | "c_ushort" => TypeKind::Int { bits: 16 },
        "i32" | "u32" | "char" | "c_int" | "c_uint" => TypeKind::Int { bits: 32 },
        "i64" | "u64" | "isize" | "usize" | "c_long" | "c_ulong" | "c_longlong" | "c_ulonglong" => {
            TypeKind::Int { bits: 64 }
        }
        "i128" | "u128" => TypeKind::Int { bits: 128 },
        "f32" | "c_float" => TypeKind::Float { bits: 32 },
        "f64" | "c_double" => TypeKind::Float { bits: 64 },
        _ => return None,
    };
    Some(kind)
}

fn type_kind(ty: &syn::Type) -> TypeKind {
    match ty {
        syn::Type::Path(p) if p.qself.is_none() => p
            .path
            .segments
            .last()
            .filter(|seg| seg.arguments.is_none())
            .and_then(|seg| scalar_kind(&seg.ident.to_string()))
            .unwrap_or(TypeKind::Other),
        syn::Type::Ptr(p) => TypeKind::Pointer(Box::new(pointee_kind(&p.elem))),
        syn::Type::Reference(r) if is_c_text(&r.elem) => TypeKind::Pointer(Box::new(TypeKind::Int { bits: 8 })),
        syn::Type::Reference(r) if is_unsized(&r.elem) => TypeKind::Other,
        syn::Type::Reference(r) => TypeKind::Pointer(Box::new(pointee_kind(&r.elem))),
        syn::Type::Tuple(t) if t.elems.is_empty() => TypeKind::Unit,
        syn::Type::Paren(p) => type_kind(&p.elem),
        syn::Type::Group(g) => type_kind(&g.elem),
        _ => TypeKind::Other,
    }
}

/// Only `c_char` and `CStr` point at NUL-terminated text. Any other byte
/// pointee is opaque so the pointer is traced as an address.
fn pointee_kind(elem: &syn::Type) -> TypeKind {
    if is_c_text(elem) {
        return TypeKind::Int { bits: 8 };
    }
    match type_kind(elem) {
        TypeKind::Int { bits: 8 } => TypeKind::Other,
        kind => kind,
    }
}

fn is_c_text(ty: &syn::Type) -> bool {
    match ty {
        syn::Type::Path(p) if p.qself.is_none() => p
            .path
            .segments
            .last()
            .is_some_and(|seg| seg.ident == "c_char" || seg.ident == "CStr"),
        syn::Type::Paren(p) => is_c_text(&p.elem),
        syn::Type::Group(g) => is_c_text(&g.elem),
        _ => false,
    }
}

/// References to these are fat pointers.
fn is_unsized(ty: &syn::Type) -> bool {
    match ty {
        syn::Type::Slice(_) | syn::Type::TraitObject(_) | syn::Type::ImplTrait(_) => true,
        syn::Type::Path(p) => p.path.is_ident("str"),
        _ => false,
    }
}

/// `Some(x)`, `Point(1, 2)`: tuple structs and variants, not calls.
fn is_constructor(path: &syn::Path) -> bool {
    path.segments
        .last()
        .and_then(|seg| seg.ident.to_string().chars().next())
        .is_some_and(char::is_uppercase)
}

// ─────────────────────────────────────────────────────────────────────
// Bodies
// ─────────────────────────────────────────────────────────────────────

struct BodyContext<'a> {
    symbols: &'a HashSet<String>,
    scope: &'a Scope,
    params: HashMap<String, usize>,
}

impl BodyContext<'_> {
    fn block(&self, block: &syn::Block) -> Block {
        let mut out = Block::default();
        let last = block.stmts.len().saturating_sub(1);
        for (i, stmt) in block.stmts.iter().enumerate() {
            match stmt {
                syn::Stmt::Local(local) => out.stmts.push(Stmt::Let {
                    init: local.init.as_ref().map(|init| self.expr(&init.expr)),
                    diverge: local
                        .init
                        .as_ref()
                        .and_then(|init| init.diverge.as_ref())
                        .map(|(_, otherwise)| self.as_block(otherwise)),
                }),
                syn::Stmt::Item(_) => out.stmts.push(Stmt::Item),
                syn::Stmt::Expr(e, None) if i == last => out.tail = Some(Box::new(self.expr(e))),
                syn::Stmt::Expr(e, _) => out.stmts.push(Stmt::Expr(self.expr(e))),
                syn::Stmt::Macro(m) => out.stmts.push(Stmt::Expr(self.macro_call(&m.mac))),
            }
        }
        out
    }

    fn as_block(&self, expr: &syn::Expr) -> Block {
        match expr {
            syn::Expr::Block(b) => self.block(&b.block),
            other => Block { stmts: Vec::new(), tail: Some(Box::new(self.expr(other))) },
        }
    }

    fn exprs<'e>(&self, exprs: impl IntoIterator<Item = &'e syn::Expr>) -> Vec<Expr> {
        exprs.into_iter().map(|e| self.expr(e)).collect()
    }

    fn boxed(&self, expr: &syn::Expr) -> Box<Expr> {
        Box::new(self.expr(expr))
    }

    fn param(&self, path: &syn::Path) -> Option<usize> {
        path.get_ident().and_then(|id| self.params.get(&id.to_string()).copied())
    }

    fn resolve(&self, path: &syn::Path) -> String {
        let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
        let candidates = self.scope.candidates(&segments);
        // Unknown here: another unit defines it under the least specific name.
        candidates
            .iter()
            .find(|c| self.symbols.contains(*c))
            .or(candidates.last())
            .cloned()
            .unwrap_or_else(|| segments.join("::"))
    }

    /// `self.method(..)` on a method of the enclosing impl.
    fn resolve_self_method(&self, method: &syn::Ident) -> Option<String> {
        let name = method.to_string();
        [&self.scope.owner, &self.scope.self_ty]
            .into_iter()
            .flatten()
            .map(|owner| self.scope.in_module(&self.scope.module, &[owner.clone(), name.clone()]))
            .find(|c| self.symbols.contains(c))
    }

    fn macro_call(&self, mac: &syn::Macro) -> Expr {
        match mac.parse_body_with(Punctuated::<syn::Expr, Token![,]>::parse_terminated) {
            Ok(args) => Expr::Other(self.exprs(&args)),
            Err(_) => Expr::Other(Vec::new()),
        }
    }

    fn arm(&self, arm: &syn::Arm) -> Expr {
        let body = self.expr(&arm.body);
        match &arm.guard {
            Some((_, guard)) => Expr::Block(Block { stmts: vec![Stmt::Expr(self.expr(guard))], tail: Some(Box::new(body)) }),
            None => body,
        }
    }

    fn expr(&self, expr: &syn::Expr) -> Expr {
        use syn::Expr as E;
        match expr {
            E::Call(c) => {
                let callee = match &*c.func {
                    E::Path(p) if p.qself.is_none() => match self.param(&p.path) {
                        Some(i) => CalleeRef::Indirect(Box::new(Expr::Param(i))),
                        None => {
                            let symbol = self.resolve(&p.path);
                            if !self.symbols.contains(&symbol) && is_constructor(&p.path) {
                                return Expr::Other(self.exprs(&c.args));
                            }
                            CalleeRef::Direct(symbol)
                        }
                    },
                    other => CalleeRef::Indirect(self.boxed(other)),
                };
                Expr::Call { callee, args: self.exprs(&c.args) }
            }
            E::MethodCall(m) => {
                let receiver = self.expr(&m.receiver);
                let args = self.exprs(&m.args);
                let on_self = matches!(&*m.receiver, E::Path(p) if p.path.is_ident("self"));
                match self.resolve_self_method(&m.method).filter(|_| on_self) {
                    Some(symbol) => {
                        let mut all = vec![receiver];
                        all.extend(args);
                        Expr::Call { callee: CalleeRef::Direct(symbol), args: all }
                    }
                    None => Expr::MethodCall { receiver: Box::new(receiver), method: m.method.to_string(), args },
                }
            }
            E::Return(r) => Expr::Return(r.expr.as_ref().map(|e| self.boxed(e))),
            E::Try(t) => Expr::Try(self.boxed(&t.expr)),
            E::If(i) => Expr::If {
                cond: self.boxed(&i.cond),
                then_branch: self.block(&i.then_branch),
                else_branch: i.else_branch.as_ref().map(|(_, e)| self.boxed(e)),
            },
            E::Match(m) => Expr::Match {
                scrutinee: self.boxed(&m.expr),
                arms: m.arms.iter().map(|arm| self.arm(arm)).collect(),
            },
            E::Loop(l) => Expr::Loop { kind: LoopKind::Infinite, body: self.block(&l.body) },
            E::While(w) => Expr::Loop { kind: LoopKind::While(self.boxed(&w.cond)), body: self.block(&w.body) },
            E::ForLoop(f) => Expr::Loop { kind: LoopKind::For(self.boxed(&f.expr)), body: self.block(&f.body) },
            E::Break(b) => Expr::Break(b.expr.as_ref().map(|e| self.boxed(e))),
            E::Continue(_) => Expr::Continue,
            E::Block(b) => Expr::Block(self.block(&b.block)),
            E::Unsafe(u) => Expr::Block(self.block(&u.block)),
            E::Const(c) => Expr::Block(self.block(&c.block)),
            E::Closure(_) | E::Async(_) => Expr::Closure,
            E::Let(l) => Expr::Other(vec![self.expr(&l.expr)]),
            E::Lit(l) => match &l.lit {
                syn::Lit::Int(i) => i.base10_parse::<i64>().map(Expr::IntLiteral).unwrap_or(Expr::Other(Vec::new())),
                _ => Expr::Other(Vec::new()),
            },
            E::Paren(p) => self.expr(&p.expr),
            E::Group(g) => self.expr(&g.expr),
            E::Path(p) => match self.param(&p.path) {
                Some(i) => Expr::Param(i),
                None => Expr::Other(Vec::new()),
            },
            E::Macro(m) => self.macro_call(&m.mac),
            E::Binary(b) => Expr::Other(vec![self.expr(&b.left), self.expr(&b.right)]),
            E::Assign(a) => Expr::Other(vec![self.expr(&a.left), self.expr(&a.right)]),
            E::Index(i) => Expr::Other(vec![self.expr(&i.expr), self.expr(&i.index)]),
            E::Unary(u) => Expr::Other(vec![self.expr(&u.expr)]),
            E::Field(f) => Expr::Other(vec![self.expr(&f.base)]),
            E::Reference(r) => Expr::Other(vec![self.expr(&r.expr)]),
            E::Cast(c) => Expr::Other(vec![self.expr(&c.expr)]),
            E::Await(a) => Expr::Other(vec![self.expr(&a.base)]),
            E::Repeat(r) => Expr::Other(vec![self.expr(&r.expr)]),
            E::Array(a) => Expr::Other(self.exprs(&a.elems)),
            E::Tuple(t) => Expr::Other(self.exprs(&t.elems)),
            E::Struct(s) => {
                let mut operands: Vec<Expr> = s.fields.iter().map(|f| self.expr(&f.expr)).collect();
                operands.extend(s.rest.as_ref().map(|r| self.expr(r)));
                Expr::Other(operands)
            }
            E::Range(r) => Expr::Other(self.exprs(r.start.iter().chain(r.end.iter()).map(|e| &**e))),
            _ => Expr::Other(Vec::new()),
        }
    }
}
