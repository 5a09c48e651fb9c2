// Declaration tree produced by a front end for one source unit.
// Lowering to IR and metadata extraction both walk these types.

/// A resolved position in a source file. Lines and columns are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Set when the file lives under a system root.
    pub is_system: bool,
    /// Where the macro producing this location was expanded, if any.
    pub expansion: Option<Box<SourceLocation>>,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            is_system: false,
            expansion: None,
        }
    }

    /// The location in real file text: follows macro expansions outward.
    pub fn file_location(&self) -> &SourceLocation {
        let mut loc = self;
        while let Some(outer) = &loc.expansion {
            loc = outer;
        }
        loc
    }
}

/// Begin/end of a declaration. `None` means the front end could not
/// resolve that end.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceRange {
    pub begin: Option<SourceLocation>,
    pub end: Option<SourceLocation>,
}

/// Lowering-relevant shape of a source type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Int { bits: u32 },
    Float { bits: u32 },
    Pointer(Box<TypeKind>),
    Unit,
    /// Aggregates and anything else without a scalar lowering.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    /// Type as printed in signatures.
    pub spelling: String,
    pub kind: TypeKind,
}

impl TypeRef {
    pub fn new(spelling: impl Into<String>, kind: TypeKind) -> Self {
        Self { spelling: spelling.into(), kind }
    }

    pub fn unit() -> Self {
        Self::new("()", TypeKind::Unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: Option<String>,
    pub ty: TypeRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Bare identifier.
    pub name: String,
    /// Path inside the unit (`util::helper`, `Point::new`).
    pub qualified_name: String,
    /// Name the compiled function gets.
    pub symbol: String,
    pub params: Vec<ParamDecl>,
    pub return_type: TypeRef,
    pub variadic: bool,
    pub visibility: Visibility,
    pub range: SourceRange,
    /// `None` for declarations.
    pub body: Option<Block>,
}

impl FunctionDecl {
    pub fn is_definition(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_system(&self) -> bool {
        self.range
            .begin
            .as_ref()
            .is_some_and(|loc| loc.file_location().is_system)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    Function(FunctionDecl),
    Module { name: String, decls: Vec<Decl> },
    Impl { self_ty: String, decls: Vec<Decl> },
    /// Anything that declares no functions.
    Other,
}

/// One parsed source unit.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceUnit {
    pub path: String,
    pub decls: Vec<Decl>,
}

impl SourceUnit {
    /// Every function declaration in declaration order, depth first.
    pub fn functions(&self) -> Vec<&FunctionDecl> {
        fn walk<'a>(decls: &'a [Decl], out: &mut Vec<&'a FunctionDecl>) {
            for decl in decls {
                match decl {
                    Decl::Function(f) => out.push(f),
                    Decl::Module { decls, .. } | Decl::Impl { decls, .. } => walk(decls, out),
                    Decl::Other => {}
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.decls, &mut out);
        out
    }
}

// ─────────────────────────────────────────────────────────────────────
// Function bodies
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub tail: Option<Box<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// `let` with an optional diverging `else` block.
    Let { init: Option<Expr>, diverge: Option<Block> },
    /// Nested item; lowered separately, if at all.
    Item,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalleeRef {
    /// Resolved to a symbol of this unit or an external symbol.
    Direct(String),
    Indirect(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoopKind {
    Infinite,
    While(Box<Expr>),
    For(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Call { callee: CalleeRef, args: Vec<Expr> },
    MethodCall { receiver: Box<Expr>, method: String, args: Vec<Expr> },
    Return(Option<Box<Expr>>),
    /// `expr?`: returns early on the failure path.
    Try(Box<Expr>),
    If { cond: Box<Expr>, then_branch: Block, else_branch: Option<Box<Expr>> },
    Match { scrutinee: Box<Expr>, arms: Vec<Expr> },
    Loop { kind: LoopKind, body: Block },
    Break(Option<Box<Expr>>),
    Continue,
    Block(Block),
    Param(usize),
    IntLiteral(i64),
    /// Closure bodies are separate functions and are not lowered.
    Closure,
    /// Any other expression, with its evaluated subexpressions.
    Other(Vec<Expr>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_location_follows_expansion() {
        let mut inner = SourceLocation::new("macros.rs", 3, 5);
        inner.expansion = Some(Box::new(SourceLocation::new("lib.rs", 40, 1)));
        assert_eq!(inner.file_location().file, "lib.rs");
        assert_eq!(inner.file_location().line, 40);
    }

    #[test]
    fn test_functions_walks_nested_decls() {
        let f = |name: &str| {
            Decl::Function(FunctionDecl {
                name: name.into(),
                qualified_name: name.into(),
                symbol: name.into(),
                params: vec![],
                return_type: TypeRef::unit(),
                variadic: false,
                visibility: Visibility::Private,
                range: SourceRange::default(),
                body: None,
            })
        };
        let unit = SourceUnit {
            path: "lib.rs".into(),
            decls: vec![
                f("a"),
                Decl::Module { name: "m".into(), decls: vec![f("b")] },
                Decl::Impl { self_ty: "T".into(), decls: vec![f("c")] },
                Decl::Other,
            ],
        };
        let names: Vec<&str> = unit.functions().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_block_tails_nest() {
        // `{ if x { { 1 } } }`
        let inner = Block { stmts: vec![], tail: Some(Box::new(Expr::IntLiteral(1))) };
        let branch = Block { stmts: vec![], tail: Some(Box::new(Expr::Block(inner.clone()))) };
        let outer = Block {
            stmts: vec![],
            tail: Some(Box::new(Expr::If { cond: Box::new(Expr::Param(0)), then_branch: branch, else_branch: None })),
        };
        let Some(Expr::If { then_branch, .. }) = outer.tail.as_deref() else {
            panic!("tail is not an if");
        };
        assert_eq!(then_branch.tail.as_deref(), Some(&Expr::Block(inner)));
    }
}
