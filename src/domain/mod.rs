// Domain layer: source metadata, the call graph and the trace injector.

pub mod ast;
pub mod callgraph;
pub mod correlator;
pub mod extractor;
pub mod injector;
pub mod record;
pub mod store;

/// Reserved entry symbol of the host runtime.
pub const ENTRY_SYMBOL: &str = "main";
/// Name the program's own entry point is moved to.
pub const RENAMED_ENTRY_SYMBOL: &str = "main_0";

/// Symbol name after the entry-point rename.
pub fn entry_symbol(symbol: &str) -> &str {
    if symbol == ENTRY_SYMBOL {
        RENAMED_ENTRY_SYMBOL
    } else {
        symbol
    }
}
