//! Route path grammar
//!
//! One template supports two operations: match an inbound URL path to a
//! parameter map, and compile a parameter map back into a path. Templates
//! may be written in colon form (`/posts/:id`) or bracket form
//! (`/posts/[id]`); both normalise to the same canonical colon form.
//! Catch-all parameters (`:slug*` / `[...slug]`) match one or more trailing
//! segments and are only valid in the last position.

mod url_builder;

use std::collections::HashMap;

use thiserror::Error;

pub use url_builder::{BoundUrl, UrlBuilder, UrlError, UrlValue};

/// Characters allowed in literal segments and parameter names
fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_segment_char)
}

/// Template grammar violation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("invalid path segment '{0}'")]
    InvalidSegment(String),

    #[error("duplicate parameter name ':{0}'")]
    DuplicateParameter(String),

    #[error("catch-all parameter ':{0}*' must be the last segment")]
    CatchAllNotLast(String),
}

/// One segment of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, catch_all: bool },
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, TemplateError> {
        // Bracket forms normalise to colon forms: [x] -> :x, [...x] -> :x*
        if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let (name, catch_all) = match inner.strip_prefix("...") {
                Some(name) => (name, true),
                None => (inner, false),
            };
            if !is_valid_name(name) {
                return Err(TemplateError::InvalidSegment(raw.to_string()));
            }
            return Ok(Segment::Param {
                name: name.to_string(),
                catch_all,
            });
        }
        if let Some(rest) = raw.strip_prefix(':') {
            let (name, catch_all) = match rest.strip_suffix('*') {
                Some(name) => (name, true),
                None => (rest, false),
            };
            if !is_valid_name(name) {
                return Err(TemplateError::InvalidSegment(raw.to_string()));
            }
            return Ok(Segment::Param {
                name: name.to_string(),
                catch_all,
            });
        }
        if is_valid_name(raw) {
            Ok(Segment::Literal(raw.to_string()))
        } else {
            Err(TemplateError::InvalidSegment(raw.to_string()))
        }
    }
}

/// A parsed, validated route template in canonical colon form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    path: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template in colon or bracket form
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let trimmed = template.trim_matches('/');
        let mut segments = Vec::new();
        if !trimmed.is_empty() {
            for raw in trimmed.split('/') {
                segments.push(Segment::parse(raw)?);
            }
        }

        let mut seen = Vec::new();
        for (index, segment) in segments.iter().enumerate() {
            if let Segment::Param { name, catch_all } = segment {
                if seen.contains(&name.as_str()) {
                    return Err(TemplateError::DuplicateParameter(name.clone()));
                }
                seen.push(name);
                if *catch_all && index + 1 != segments.len() {
                    return Err(TemplateError::CatchAllNotLast(name.clone()));
                }
            }
        }

        let path = canonical_path(&segments);
        Ok(Self { path, segments })
    }

    /// Canonical colon-form path, always with a leading slash
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Collision signature: each parameter name stripped, the catch-all
    /// star kept (`/a/:x` and `/a/:y` share the shape `/a/:`)
    pub fn shape(&self) -> String {
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(lit) => shape.push_str(lit),
                Segment::Param { catch_all, .. } => {
                    shape.push(':');
                    if *catch_all {
                        shape.push('*');
                    }
                }
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }
        shape
    }

    /// Declared parameter names, in order
    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param { name, .. } => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Whether the template declares the given parameter
    pub fn has_param(&self, name: &str) -> bool {
        self.param_names().contains(&name)
    }

    /// Match an inbound URL path, producing the captured parameter map.
    /// A catch-all parameter captures one or more trailing segments joined
    /// with `/`.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let trimmed = path.trim_matches('/');
        let parts: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        let mut params = HashMap::new();
        let mut cursor = 0usize;
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(cursor) != Some(&lit.as_str()) {
                        return None;
                    }
                    cursor += 1;
                }
                Segment::Param { name, catch_all } => {
                    if *catch_all {
                        if cursor >= parts.len() {
                            return None;
                        }
                        params.insert(name.clone(), parts[cursor..].join("/"));
                        cursor = parts.len();
                    } else {
                        let part = parts.get(cursor)?;
                        if part.is_empty() {
                            return None;
                        }
                        params.insert(name.clone(), (*part).to_string());
                        cursor += 1;
                    }
                }
            }
        }
        if cursor == parts.len() {
            Some(params)
        } else {
            None
        }
    }

    /// Compile the template into a concrete path from a parameter map.
    /// Catch-all parameters accept either a single value (slashes kept) or
    /// a list of segments.
    pub fn compile(&self, params: &HashMap<String, UrlValue>) -> Result<String, UrlError> {
        let mut path = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    path.push('/');
                    path.push_str(lit);
                }
                Segment::Param { name, catch_all } => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| UrlError::MissingParameter(name.clone()))?;
                    let rendered = match value {
                        UrlValue::One(v) => v.clone(),
                        UrlValue::Many(vs) if *catch_all => vs.join("/"),
                        UrlValue::Many(_) => {
                            return Err(UrlError::UnexpectedList(name.clone()));
                        }
                    };
                    if rendered.is_empty() {
                        return Err(UrlError::MissingParameter(name.clone()));
                    }
                    path.push('/');
                    path.push_str(&rendered);
                }
            }
        }
        if path.is_empty() {
            path.push('/');
        }
        Ok(path)
    }
}

fn canonical_path(segments: &[Segment]) -> String {
    let mut path = String::new();
    for segment in segments {
        path.push('/');
        match segment {
            Segment::Literal(lit) => path.push_str(lit),
            Segment::Param { name, catch_all } => {
                path.push(':');
                path.push_str(name);
                if *catch_all {
                    path.push('*');
                }
            }
        }
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_and_colon_forms_normalise_identically() {
        let colon = PathTemplate::parse("/posts/:id").unwrap();
        let bracket = PathTemplate::parse("/posts/[id]").unwrap();
        assert_eq!(colon.path(), "/posts/:id");
        assert_eq!(colon, bracket);

        let colon = PathTemplate::parse("/feed/:slug*").unwrap();
        let bracket = PathTemplate::parse("/feed/[...slug]").unwrap();
        assert_eq!(colon.path(), "/feed/:slug*");
        assert_eq!(colon, bracket);
    }

    #[test]
    fn test_match_captures_params() {
        let template = PathTemplate::parse("/posts/:id").unwrap();
        let params = template.matches("/posts/42").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("42"));

        assert!(template.matches("/posts").is_none());
        assert!(template.matches("/posts/42/comments").is_none());
        assert!(template.matches("/other/42").is_none());
    }

    #[test]
    fn test_catch_all_matches_one_or_more_segments() {
        let template = PathTemplate::parse("/files/:path*").unwrap();
        assert_eq!(
            template.matches("/files/a/b/c").unwrap().get("path"),
            Some(&"a/b/c".to_string())
        );
        assert_eq!(
            template.matches("/files/a").unwrap().get("path"),
            Some(&"a".to_string())
        );
        assert!(template.matches("/files").is_none());
    }

    #[test]
    fn test_root_template() {
        let template = PathTemplate::parse("/").unwrap();
        assert_eq!(template.path(), "/");
        assert!(template.matches("/").is_some());
        assert!(template.matches("/x").is_none());
    }

    #[test]
    fn test_shape_strips_parameter_names() {
        let x = PathTemplate::parse("/a/:x").unwrap();
        let y = PathTemplate::parse("/a/:y").unwrap();
        assert_eq!(x.shape(), y.shape());
        assert_eq!(x.shape(), "/a/:");

        let all = PathTemplate::parse("/a/:rest*").unwrap();
        assert_ne!(all.shape(), x.shape());
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let err = PathTemplate::parse("/a/:x/b/:x").unwrap_err();
        assert_eq!(err, TemplateError::DuplicateParameter("x".to_string()));
    }

    #[test]
    fn test_catch_all_must_be_last() {
        let err = PathTemplate::parse("/a/:rest*/b").unwrap_err();
        assert_eq!(err, TemplateError::CatchAllNotLast("rest".to_string()));
    }

    #[test]
    fn test_invalid_segment_rejected() {
        assert!(PathTemplate::parse("/a/b c").is_err());
        assert!(PathTemplate::parse("/a/:").is_err());
        assert!(PathTemplate::parse("/a/[x").is_err());
    }

    #[test]
    fn test_compile_round_trips_match() {
        let template = PathTemplate::parse("/posts/:id").unwrap();
        let captured = template.matches("/posts/42").unwrap();
        let params: HashMap<String, UrlValue> = captured
            .into_iter()
            .map(|(k, v)| (k, UrlValue::One(v)))
            .collect();
        assert_eq!(template.compile(&params).unwrap(), "/posts/42");
    }

    #[test]
    fn test_compile_catch_all_from_list() {
        let template = PathTemplate::parse("/files/:path*").unwrap();
        let mut params = HashMap::new();
        params.insert(
            "path".to_string(),
            UrlValue::Many(vec!["a".to_string(), "b".to_string()]),
        );
        assert_eq!(template.compile(&params).unwrap(), "/files/a/b");
    }

    #[test]
    fn test_compile_missing_parameter() {
        let template = PathTemplate::parse("/posts/:id").unwrap();
        let err = template.compile(&HashMap::new()).unwrap_err();
        assert!(matches!(err, UrlError::MissingParameter(name) if name == "id"));
    }
}
