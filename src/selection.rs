//! Selection repair against a catalog snapshot.
//!
//! The resolver is a pure fold over the three nesting levels: each level keeps
//! its current ID if the catalog still offers it and otherwise falls back to
//! the first entry, after the level above has been settled.

use crate::model::{Catalog, Selection};

/// Resolve `current` against `catalog`.
///
/// Every non-empty ID in the result names an entry present in the catalog at
/// that level. A level with no entries empties itself and everything below it.
/// The function is idempotent.
pub fn resolve(catalog: &Catalog, current: &Selection) -> Selection {
    let language = pick(&catalog.languages, current.language_id.as_deref(), |l| &l.id);
    let processor = language.and_then(|l| {
        pick(&l.processors, current.processor_id.as_deref(), |p| &p.id)
    });
    let task = processor.and_then(|p| pick(&p.tasks, current.task_id.as_deref(), |t| &t.id));

    Selection {
        language_id: language.map(|l| l.id.clone()),
        processor_id: processor.map(|p| p.id.clone()),
        task_id: task.map(|t| t.id.clone()),
    }
}

/// Keep the entry matching `wanted`, else fall back to the first one.
fn pick<'a, T>(items: &'a [T], wanted: Option<&str>, id: impl Fn(&T) -> &String) -> Option<&'a T> {
    wanted
        .and_then(|w| items.iter().find(|item| id(item) == w))
        .or_else(|| items.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Language, Processor, Task, TaskKind};
    use proptest::prelude::*;

    fn task(id: &str) -> Task {
        Task {
            id: id.into(),
            display_name: id.to_uppercase(),
            kind: TaskKind::Action,
        }
    }

    fn processor(id: &str, tasks: &[&str]) -> Processor {
        Processor {
            id: id.into(),
            display_name: id.into(),
            default_filename: format!("{id}.src"),
            tasks: tasks.iter().map(|t| task(t)).collect(),
        }
    }

    fn sample_catalog() -> Catalog {
        Catalog {
            languages: vec![
                Language {
                    id: "py".into(),
                    display_name: "Python".into(),
                    processors: vec![
                        processor("cpython", &["run", "test"]),
                        processor("pypy", &["run"]),
                    ],
                },
                Language {
                    id: "rs".into(),
                    display_name: "Rust".into(),
                    processors: vec![processor("rustc", &["build", "run"])],
                },
                Language {
                    id: "empty".into(),
                    display_name: "Nothing".into(),
                    processors: vec![],
                },
            ],
        }
    }

    #[test]
    fn empty_selection_picks_first_of_everything() {
        let s = resolve(&sample_catalog(), &Selection::default());
        assert_eq!(s, Selection::new("py", "cpython", "run"));
    }

    #[test]
    fn valid_selection_is_kept() {
        let wanted = Selection::new("py", "pypy", "run");
        assert_eq!(resolve(&sample_catalog(), &wanted), wanted);
    }

    #[test]
    fn language_change_cascades_to_processor_and_task() {
        // "cpython"/"test" do not exist under "rs".
        let s = resolve(&sample_catalog(), &Selection::new("rs", "cpython", "test"));
        assert_eq!(s, Selection::new("rs", "rustc", "build"));
    }

    #[test]
    fn same_task_id_survives_processor_change() {
        let s = resolve(&sample_catalog(), &Selection::new("rs", "rustc", "run"));
        assert_eq!(s.task_id.as_deref(), Some("run"));
    }

    #[test]
    fn unknown_language_falls_back_to_first() {
        let s = resolve(&sample_catalog(), &Selection::new("cobol", "x", "y"));
        assert_eq!(s, Selection::new("py", "cpython", "run"));
    }

    #[test]
    fn language_without_processors_empties_deeper_levels() {
        let s = resolve(&sample_catalog(), &Selection::new("empty", "cpython", "run"));
        assert_eq!(s.language_id.as_deref(), Some("empty"));
        assert_eq!(s.processor_id, None);
        assert_eq!(s.task_id, None);
        assert!(!s.is_complete());
    }

    #[test]
    fn empty_catalog_empties_everything() {
        let s = resolve(&Catalog::default(), &Selection::new("py", "cpython", "run"));
        assert_eq!(s, Selection::default());
    }

    fn catalog_strategy() -> impl Strategy<Value = Catalog> {
        let ids = || prop::sample::select(vec!["a", "b", "c", "d"]);
        let tasks = prop::collection::vec(ids(), 0..3);
        let procs = prop::collection::vec((ids(), tasks), 0..3);
        prop::collection::vec((ids(), procs), 0..4).prop_map(|langs| Catalog {
            languages: langs
                .into_iter()
                .map(|(lid, procs)| Language {
                    id: lid.into(),
                    display_name: lid.into(),
                    processors: procs
                        .into_iter()
                        .map(|(pid, tasks)| processor(pid, &tasks))
                        .collect(),
                })
                .collect(),
        })
    }

    fn selection_strategy() -> impl Strategy<Value = Selection> {
        let id = || prop::option::of(prop::sample::select(vec!["a", "b", "c", "d", "zz"]));
        (id(), id(), id()).prop_map(|(l, p, t)| Selection {
            language_id: l.map(String::from),
            processor_id: p.map(String::from),
            task_id: t.map(String::from),
        })
    }

    proptest! {
        #[test]
        fn resolve_is_idempotent(catalog in catalog_strategy(), sel in selection_strategy()) {
            let once = resolve(&catalog, &sel);
            prop_assert_eq!(resolve(&catalog, &once), once);
        }

        #[test]
        fn resolved_ids_never_dangle(catalog in catalog_strategy(), sel in selection_strategy()) {
            let s = resolve(&catalog, &sel);
            if let Some(lid) = &s.language_id {
                let lang = catalog.language(lid);
                prop_assert!(lang.is_some());
                if let Some(pid) = &s.processor_id {
                    let proc_ = lang.and_then(|l| l.processor(pid));
                    prop_assert!(proc_.is_some());
                    if let Some(tid) = &s.task_id {
                        prop_assert!(proc_.and_then(|p| p.task(tid)).is_some());
                    }
                } else {
                    prop_assert!(s.task_id.is_none());
                }
            } else {
                prop_assert!(catalog.is_empty());
                prop_assert_eq!(s, Selection::default());
            }
        }

        #[test]
        fn empty_selection_resolves_to_first_entries(catalog in catalog_strategy()) {
            let s = resolve(&catalog, &Selection::default());
            let lang = catalog.languages.first();
            let proc_ = lang.and_then(|l| l.processors.first());
            let task = proc_.and_then(|p| p.tasks.first());
            prop_assert_eq!(s.language_id, lang.map(|l| l.id.clone()));
            prop_assert_eq!(s.processor_id, proc_.map(|p| p.id.clone()));
            prop_assert_eq!(s.task_id, task.map(|t| t.id.clone()));
        }
    }
}
