use crate::error::{FilterError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of module types the dispatcher understands. Anything else is
/// rejected at the boundary rather than passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Js,
    Jsx,
    Ts,
    Tsx,
    Css,
    Html,
    Json,
    Asset,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Js => "js",
            ModuleType::Jsx => "jsx",
            ModuleType::Ts => "ts",
            ModuleType::Tsx => "tsx",
            ModuleType::Css => "css",
            ModuleType::Html => "html",
            ModuleType::Json => "json",
            ModuleType::Asset => "asset",
        }
    }

    /// Infer a module type from a path extension. Extensions outside the
    /// known script/style/markup set fold into `Asset`.
    pub fn from_path(path: &str) -> ModuleType {
        match path.rsplit('.').next() {
            Some("js") | Some("mjs") | Some("cjs") => ModuleType::Js,
            Some("jsx") => ModuleType::Jsx,
            Some("ts") | Some("mts") | Some("cts") => ModuleType::Ts,
            Some("tsx") => ModuleType::Tsx,
            Some("css") => ModuleType::Css,
            Some("html") | Some("htm") => ModuleType::Html,
            Some("json") => ModuleType::Json,
            _ => ModuleType::Asset,
        }
    }
}

impl FromStr for ModuleType {
    type Err = FilterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "js" => Ok(ModuleType::Js),
            "jsx" => Ok(ModuleType::Jsx),
            "ts" => Ok(ModuleType::Ts),
            "tsx" => Ok(ModuleType::Tsx),
            "css" => Ok(ModuleType::Css),
            "html" => Ok(ModuleType::Html),
            "json" => Ok(ModuleType::Json),
            "asset" => Ok(ModuleType::Asset),
            other => Err(FilterError::UnknownModuleType(other.to_string())),
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A module as seen by the pipeline. Identity is the raw `id` string,
/// path plus optional `?query`; `resolved_path` is the id with the query
/// stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub id: String,
    pub resolved_path: String,
    pub module_type: ModuleType,
    /// Query pairs in the order they appeared in the id. Bare flags
    /// (`?raw`) carry an empty value.
    pub query: Vec<(String, String)>,
}

impl ModuleDescriptor {
    /// Parse an id into a descriptor, inferring the module type from the
    /// path extension.
    pub fn parse(id: &str) -> ModuleDescriptor {
        let (path, query) = match id.split_once('?') {
            Some((path, raw)) => (path, parse_query(raw)),
            None => (id, Vec::new()),
        };
        ModuleDescriptor {
            id: id.to_string(),
            resolved_path: path.to_string(),
            module_type: ModuleType::from_path(path),
            query,
        }
    }

    /// Parse an id with an explicit module type, overriding extension
    /// inference. The type string must name a known type.
    pub fn parse_with_type(id: &str, module_type: &str) -> Result<ModuleDescriptor> {
        let mut descriptor = Self::parse(id);
        descriptor.module_type = module_type.parse().map_err(crate::error::PipelineError::Filter)?;
        Ok(descriptor)
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (part.to_string(), String::new()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_path() {
        let d = ModuleDescriptor::parse("/src/app.tsx");
        assert_eq!(d.resolved_path, "/src/app.tsx");
        assert_eq!(d.module_type, ModuleType::Tsx);
        assert!(d.query.is_empty());
        assert_eq!(d.id, "/src/app.tsx");
    }

    #[test]
    fn strips_query_and_preserves_order() {
        let d = ModuleDescriptor::parse("/src/button.vue?vue&type=style&index=0");
        assert_eq!(d.resolved_path, "/src/button.vue");
        assert_eq!(
            d.query,
            vec![
                ("vue".to_string(), String::new()),
                ("type".to_string(), "style".to_string()),
                ("index".to_string(), "0".to_string()),
            ]
        );
        assert_eq!(d.query_value("type"), Some("style"));
        assert_eq!(d.query_value("missing"), None);
    }

    #[test]
    fn unknown_extension_is_asset() {
        let d = ModuleDescriptor::parse("/assets/logo.svg");
        assert_eq!(d.module_type, ModuleType::Asset);
    }

    #[test]
    fn explicit_type_overrides_extension() {
        let d = ModuleDescriptor::parse_with_type("/src/app.vue", "js").unwrap();
        assert_eq!(d.module_type, ModuleType::Js);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = ModuleDescriptor::parse_with_type("/src/a.x", "wasm").unwrap_err();
        assert!(err.to_string().contains("unknown module type"));
    }

    #[test]
    fn module_type_round_trips_through_str() {
        for t in [
            ModuleType::Js,
            ModuleType::Jsx,
            ModuleType::Ts,
            ModuleType::Tsx,
            ModuleType::Css,
            ModuleType::Html,
            ModuleType::Json,
            ModuleType::Asset,
        ] {
            assert_eq!(t.as_str().parse::<ModuleType>().unwrap(), t);
        }
    }
}
