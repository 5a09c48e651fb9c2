//! Program image accumulation.

use tracing::{debug, info};

use crate::domain::{ENTRY_SYMBOL, RENAMED_ENTRY_SYMBOL};
use crate::ir::{LinkError, Linker, Module};

/// Folds per-unit modules into one image. The first module becomes the
/// link base.
#[derive(Default)]
pub struct ImageAccumulator {
    linker: Option<Linker>,
    linked: usize,
}

impl ImageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link `module` into the image. On error the image is unchanged.
    pub fn accumulate(&mut self, module: Module) -> Result<(), LinkError> {
        match self.linker.as_mut() {
            None => {
                debug!(module = %module.name, "image base");
                self.linker = Some(Linker::new(module));
            }
            Some(linker) => {
                let name = module.name.clone();
                let summary = linker.link_in_module(module)?;
                debug!(
                    module = %name,
                    added = summary.added,
                    resolved = summary.resolved_declarations,
                    renamed = summary.renamed.len(),
                    "linked module"
                );
            }
        }
        self.linked += 1;
        Ok(())
    }

    pub fn has_image(&self) -> bool {
        self.linker.is_some()
    }

    pub fn modules_linked(&self) -> usize {
        self.linked
    }

    /// The merged image, or `None` if no module was ever accumulated.
    pub fn finish(self) -> Option<Module> {
        self.linker.map(Linker::into_module)
    }
}

/// Move the program's `main` out of the way of the host runtime's.
pub fn rename_entry_point(image: &mut Module) -> bool {
    let renamed = image.rename_function(ENTRY_SYMBOL, RENAMED_ENTRY_SYMBOL);
    if renamed {
        info!("Renamed function: {} -> {}", ENTRY_SYMBOL, RENAMED_ENTRY_SYMBOL);
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Callee, DiFile, Function, Subprogram, Terminator, Type};

    fn defining(module: &str, symbol: &str) -> Module {
        let mut m = Module::new(module, format!("{}.rs", module));
        let mut f = Function::definition(symbol, vec![], Type::Void);
        f.blocks[0].terminator = Terminator::Ret(None);
        m.add_function(f);
        m
    }

    #[test]
    fn test_empty_accumulator_has_no_image() {
        let acc = ImageAccumulator::new();
        assert!(!acc.has_image());
        assert!(acc.finish().is_none());
    }

    #[test]
    fn test_failed_link_keeps_image() {
        let mut acc = ImageAccumulator::new();
        acc.accumulate(defining("a", "shared")).unwrap();
        acc.accumulate(defining("b", "other")).unwrap();
        let err = acc.accumulate(defining("c", "shared")).unwrap_err();
        assert!(matches!(err, LinkError::DuplicateSymbol { .. }));
        assert_eq!(acc.modules_linked(), 2);

        let image = acc.finish().unwrap();
        assert!(image.is_defined("shared"));
        assert!(image.is_defined("other"));
        assert_eq!(image.defined_functions().count(), 2);
    }

    #[test]
    fn test_rename_entry_point() {
        let mut image = defining("main", "main");
        image.get_function_mut("main").unwrap().subprogram = Some(Subprogram {
            name: "main".into(),
            linkage_name: "main".into(),
            file: DiFile { filename: "main.rs".into(), directory: ".".into() },
            line: 1,
            scope_line: 1,
        });
        let mut caller = Function::definition("start", vec![], Type::Void);
        let mut b = crate::ir::IrBuilder::new(&mut caller);
        b.call(Callee::Direct("main".into()), Type::Void, vec![]);
        b.terminate(Terminator::Ret(None));
        image.add_function(caller);

        assert!(rename_entry_point(&mut image));
        assert!(image.get_function("main").is_none());
        let renamed = image.get_function("main_0").unwrap();
        assert_eq!(renamed.subprogram.as_ref().unwrap().name, "main_0");
        assert_eq!(renamed.subprogram.as_ref().unwrap().linkage_name, "main");
        assert_eq!(image.get_function("start").unwrap().calls_to("main_0"), 1);

        assert!(!rename_entry_point(&mut image));
    }
}
