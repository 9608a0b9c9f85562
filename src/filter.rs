//! Hook filters: cheap declarative predicates evaluated before a plugin's
//! executor is invoked.

use crate::error::FilterError;
use crate::module::{ModuleDescriptor, ModuleType};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Serde-facing filter description with uncompiled string patterns, as it
/// appears in plugin options and config files.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub resolved_paths: Vec<String>,
    pub module_types: Vec<String>,
    pub sources: Vec<String>,
    pub importers: Vec<String>,
}

/// Compiled filter. Each declared category must match at least one entry;
/// categories left empty match everything. The overall result is the AND
/// of the declared categories.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    resolved_paths: Vec<Regex>,
    module_types: HashSet<ModuleType>,
    sources: Vec<Regex>,
    importers: Vec<Regex>,
}

/// Strings a filter can see beyond the descriptor itself: the raw import
/// specifier and the importing module, when the stage has them.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext<'a> {
    pub source: Option<&'a str>,
    pub importer: Option<&'a str>,
}

impl Filter {
    /// Compile a spec, failing on the first malformed regex or unknown
    /// module type.
    pub fn compile(spec: &FilterSpec) -> Result<Filter, FilterError> {
        Ok(Filter {
            resolved_paths: compile_patterns(&spec.resolved_paths)?,
            module_types: spec
                .module_types
                .iter()
                .map(|t| ModuleType::from_str(t))
                .collect::<Result<_, _>>()?,
            sources: compile_patterns(&spec.sources)?,
            importers: compile_patterns(&spec.importers)?,
        })
    }

    /// A filter with no declared categories. Matches every module; used by
    /// catch-all plugins.
    pub fn any() -> Filter {
        Filter::default()
    }

    pub fn module_types(types: impl IntoIterator<Item = ModuleType>) -> Filter {
        Filter {
            module_types: types.into_iter().collect(),
            ..Filter::default()
        }
    }

    /// Evaluate the filter. Pure regex tests and set membership only, so
    /// it is safe to run for every plugin on every module.
    pub fn matches(&self, descriptor: &ModuleDescriptor, ctx: MatchContext<'_>) -> bool {
        if !self.module_types.is_empty() && !self.module_types.contains(&descriptor.module_type) {
            return false;
        }
        if !category_matches(&self.resolved_paths, Some(&descriptor.resolved_path)) {
            return false;
        }
        if !category_matches(&self.sources, ctx.source) {
            return false;
        }
        if !category_matches(&self.importers, ctx.importer) {
            return false;
        }
        true
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, FilterError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| FilterError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// OR within a declared category; a declared category with no candidate
/// string to test against rejects.
fn category_matches(patterns: &[Regex], candidate: Option<&str>) -> bool {
    if patterns.is_empty() {
        return true;
    }
    match candidate {
        Some(text) => patterns.iter().any(|re| re.is_match(text)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(resolved: &[&str], types: &[&str], sources: &[&str], importers: &[&str]) -> FilterSpec {
        FilterSpec {
            resolved_paths: resolved.iter().map(|s| s.to_string()).collect(),
            module_types: types.iter().map(|s| s.to_string()).collect(),
            sources: sources.iter().map(|s| s.to_string()).collect(),
            importers: importers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = Filter::compile(&FilterSpec::default()).unwrap();
        let d = ModuleDescriptor::parse("/any/thing.bin");
        assert!(filter.matches(&d, MatchContext::default()));
    }

    #[test]
    fn any_pattern_in_category_suffices() {
        let filter = Filter::compile(&spec(&[r"\.ts$", r"\.tsx$"], &[], &[], &[])).unwrap();
        assert!(filter.matches(&ModuleDescriptor::parse("/src/a.ts"), MatchContext::default()));
        assert!(filter.matches(&ModuleDescriptor::parse("/src/a.tsx"), MatchContext::default()));
        assert!(!filter.matches(&ModuleDescriptor::parse("/src/a.js"), MatchContext::default()));
    }

    #[test]
    fn declared_categories_are_anded() {
        let filter = Filter::compile(&spec(&[r"^/src/"], &["css"], &[], &[])).unwrap();
        let css_in_src = ModuleDescriptor::parse("/src/app.css");
        let css_elsewhere = ModuleDescriptor::parse("/vendor/app.css");
        let ts_in_src = ModuleDescriptor::parse("/src/app.ts");
        assert!(filter.matches(&css_in_src, MatchContext::default()));
        assert!(!filter.matches(&css_elsewhere, MatchContext::default()));
        assert!(!filter.matches(&ts_in_src, MatchContext::default()));
    }

    #[test]
    fn source_and_importer_categories() {
        let filter = Filter::compile(&spec(&[], &[], &[r"^virtual:"], &[r"\.vue$"])).unwrap();
        let d = ModuleDescriptor::parse("/src/a.js");
        let ctx = MatchContext {
            source: Some("virtual:app:styles"),
            importer: Some("/src/button.vue"),
        };
        assert!(filter.matches(&d, ctx));
        // Declared importer category with no importer present rejects.
        let ctx_no_importer = MatchContext {
            source: Some("virtual:app:styles"),
            importer: None,
        };
        assert!(!filter.matches(&d, ctx_no_importer));
    }

    #[test]
    fn bad_regex_fails_compilation() {
        let err = Filter::compile(&spec(&["("], &[], &[], &[])).unwrap_err();
        assert!(matches!(err, FilterError::InvalidPattern { .. }));
    }

    #[test]
    fn unknown_module_type_fails_compilation() {
        let err = Filter::compile(&spec(&[], &["wat"], &[], &[])).unwrap_err();
        assert!(matches!(err, FilterError::UnknownModuleType(_)));
    }

    #[test]
    fn module_type_helper_filters_by_set() {
        let filter = Filter::module_types([ModuleType::Js, ModuleType::Ts]);
        assert!(filter.matches(&ModuleDescriptor::parse("/a.js"), MatchContext::default()));
        assert!(!filter.matches(&ModuleDescriptor::parse("/a.css"), MatchContext::default()));
    }
}
