//! Source metadata extraction.
//!
//! Walks a unit's declaration tree and produces one `FunctionRecord` per
//! function definition that has a resolvable, non-system location.

use tracing::debug;

use crate::domain::ast::{FunctionDecl, SourceUnit};
use crate::domain::record::FunctionRecord;
use crate::domain::store::{InsertOutcome, RecordStore};
use crate::domain::entry_symbol;

pub struct MetadataExtractor;

impl MetadataExtractor {
    /// Records for every eligible definition in `unit`, in declaration order.
    pub fn extract(unit: &SourceUnit) -> Vec<FunctionRecord> {
        unit.functions()
            .into_iter()
            .filter_map(Self::record_for)
            .collect()
    }

    /// Extract `unit` straight into `store`; returns how many records were new.
    pub fn extract_into(unit: &SourceUnit, store: &mut RecordStore) -> usize {
        Self::extract(unit)
            .into_iter()
            .filter(|r| matches!(store.insert(r.clone()), InsertOutcome::Inserted(_)))
            .count()
    }

    pub fn record_for(decl: &FunctionDecl) -> Option<FunctionRecord> {
        if !decl.is_definition() {
            return None;
        }
        let (Some(begin), Some(end)) = (&decl.range.begin, &decl.range.end) else {
            debug!(function = %decl.qualified_name, "skipping definition with unresolved location");
            return None;
        };
        let begin = begin.file_location();
        let end = end.file_location();
        if begin.is_system {
            debug!(function = %decl.qualified_name, file = %begin.file, "skipping system definition");
            return None;
        }

        Some(FunctionRecord {
            name: entry_symbol(&decl.symbol).to_string(),
            signature: render_signature(decl),
            file: begin.file.clone(),
            start_line: begin.line,
            end_line: end.line,
            start_col: begin.column,
            end_col: end.column,
            called_functions: None,
        })
    }
}

/// `<return type> <qualified name>(<type [name]>, ...)`.
pub fn render_signature(decl: &FunctionDecl) -> String {
    let mut params: Vec<String> = decl
        .params
        .iter()
        .map(|p| match &p.name {
            Some(name) if !name.is_empty() => format!("{} {}", p.ty.spelling, name),
            _ => p.ty.spelling.clone(),
        })
        .collect();
    if decl.variadic {
        params.push("...".to_string());
    }
    format!("{} {}({})", decl.return_type.spelling, decl.qualified_name, params.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::*;

    fn decl(symbol: &str, begin: Option<SourceLocation>, body: bool) -> FunctionDecl {
        let end = begin.as_ref().map(|b| SourceLocation::new(b.file.clone(), b.line + 2, 1));
        FunctionDecl {
            name: symbol.rsplit("::").next().unwrap_or(symbol).to_string(),
            qualified_name: symbol.to_string(),
            symbol: symbol.to_string(),
            params: vec![
                ParamDecl { name: Some("a".into()), ty: TypeRef::new("i32", TypeKind::Int { bits: 32 }) },
                ParamDecl { name: None, ty: TypeRef::new("f64", TypeKind::Float { bits: 64 }) },
            ],
            return_type: TypeRef::new("i32", TypeKind::Int { bits: 32 }),
            variadic: false,
            visibility: Visibility::Public,
            range: SourceRange { begin, end },
            body: body.then(Block::default),
        }
    }

    #[test]
    fn test_signature_rendering() {
        let d = decl("util::mix", Some(SourceLocation::new("lib.rs", 4, 1)), true);
        assert_eq!(render_signature(&d), "i32 util::mix(i32 a, f64)");
    }

    #[test]
    fn test_record_fields() {
        let d = decl("mix", Some(SourceLocation::new("src/lib.rs", 4, 5)), true);
        let r = MetadataExtractor::record_for(&d).unwrap();
        assert_eq!(r.name, "mix");
        assert_eq!(r.file, "src/lib.rs");
        assert_eq!((r.start_line, r.end_line, r.start_col, r.end_col), (4, 6, 5, 1));
        assert!(r.called_functions.is_none());
    }

    #[test]
    fn test_main_is_renamed() {
        let d = decl("main", Some(SourceLocation::new("main.rs", 1, 1)), true);
        assert_eq!(MetadataExtractor::record_for(&d).unwrap().name, "main_0");
        let nested = decl("m::main", Some(SourceLocation::new("main.rs", 1, 1)), true);
        assert_eq!(MetadataExtractor::record_for(&nested).unwrap().name, "m::main");
    }

    #[test]
    fn test_skips_declarations_system_and_unresolved() {
        assert!(MetadataExtractor::record_for(&decl("f", Some(SourceLocation::new("a.rs", 1, 1)), false)).is_none());
        assert!(MetadataExtractor::record_for(&decl("f", None, true)).is_none());

        let mut sys = SourceLocation::new("/usr/include/x.rs", 1, 1);
        sys.is_system = true;
        assert!(MetadataExtractor::record_for(&decl("f", Some(sys), true)).is_none());
    }

    #[test]
    fn test_macro_location_uses_expansion_site() {
        let mut loc = SourceLocation::new("macros.rs", 30, 9);
        loc.expansion = Some(Box::new(SourceLocation::new("lib.rs", 7, 1)));
        let r = MetadataExtractor::record_for(&decl("gen", Some(loc), true)).unwrap();
        assert_eq!(r.file, "lib.rs");
        assert_eq!(r.start_line, 7);
    }

    #[test]
    fn test_extract_into_collapses_duplicates() {
        let unit = SourceUnit {
            path: "a.rs".into(),
            decls: vec![
                Decl::Function(decl("f", Some(SourceLocation::new("a.rs", 1, 1)), true)),
                Decl::Function(decl("f", Some(SourceLocation::new("a.rs", 1, 1)), true)),
            ],
        };
        let mut store = RecordStore::default();
        assert_eq!(MetadataExtractor::extract_into(&unit, &mut store), 1);
        assert_eq!(store.len(), 1);
    }
}
