//! Catalog listing for CLI output.
//!
//! Formats the language/processor/task tree as indented lines, marking the
//! entries of the current selection.

use crate::model::{Catalog, Selection, TaskKind};

/// Pre-formatted lines for text output.
pub struct CatalogListing {
    pub lines: Vec<String>,
}

/// Build a listing of `catalog`. Entries named by `selection` are marked `*`.
pub fn build_catalog_listing(catalog: &Catalog, selection: &Selection) -> CatalogListing {
    let mut lines = Vec::new();
    if catalog.is_empty() {
        lines.push("(catalog is empty)".to_string());
        return CatalogListing { lines };
    }

    let mark = |selected: bool| if selected { '*' } else { ' ' };
    for lang in &catalog.languages {
        let lang_sel = selection.language_id.as_deref() == Some(lang.id.as_str());
        lines.push(format!("{} {} ({})", mark(lang_sel), lang.id, lang.display_name));

        for proc_ in &lang.processors {
            let proc_sel = lang_sel && selection.processor_id.as_deref() == Some(proc_.id.as_str());
            lines.push(format!(
                "  {} {} ({}) file: {}",
                mark(proc_sel),
                proc_.id,
                proc_.display_name,
                proc_.default_filename
            ));

            for task in &proc_.tasks {
                let task_sel = proc_sel && selection.task_id.as_deref() == Some(task.id.as_str());
                let kind = match task.kind {
                    TaskKind::Action => " [action]",
                    TaskKind::Tool => " [tool]",
                    TaskKind::Unspecified => "",
                };
                lines.push(format!(
                    "    {} {} ({}){}",
                    mark(task_sel),
                    task.id,
                    task.display_name,
                    kind
                ));
            }
        }
    }

    CatalogListing { lines }
}
