//! Outbound URL construction
//!
//! The same templates that route inbound requests build outbound URLs.
//! Parameter keys not declared by the template become query parameters, an
//! explicit query map is merged on top, and list values repeat the key.
//! With a configured base URL the result is absolute, otherwise it is
//! pathname + query.

use std::collections::HashMap;

use thiserror::Error;
use url::Url;

use super::{PathTemplate, TemplateError};

/// A single- or multi-valued URL parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlValue {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for UrlValue {
    fn from(value: &str) -> Self {
        Self::One(value.to_string())
    }
}

impl From<String> for UrlValue {
    fn from(value: String) -> Self {
        Self::One(value)
    }
}

impl From<Vec<String>> for UrlValue {
    fn from(values: Vec<String>) -> Self {
        Self::Many(values)
    }
}

impl From<&[&str]> for UrlValue {
    fn from(values: &[&str]) -> Self {
        Self::Many(values.iter().map(|v| (*v).to_string()).collect())
    }
}

/// URL construction failure
#[derive(Error, Debug)]
pub enum UrlError {
    #[error("missing value for parameter ':{0}'")]
    MissingParameter(String),

    #[error("parameter ':{0}' does not accept a list value")]
    UnexpectedList(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("base URL cannot resolve '{path}': {source}")]
    Base {
        path: String,
        source: url::ParseError,
    },
}

/// Builds URLs from route templates, optionally against a base URL
#[derive(Debug, Clone, Default)]
pub struct UrlBuilder {
    base: Option<Url>,
}

impl UrlBuilder {
    /// Builder producing relative URLs (pathname + query)
    pub fn new() -> Self {
        Self { base: None }
    }

    /// Builder producing absolute URLs against the given base
    pub fn with_base(base: Url) -> Self {
        Self { base: Some(base) }
    }

    /// Configured base URL, if any
    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Construct a URL from a template and parameter/query maps.
    /// Keys in `params` not declared by the template become query
    /// parameters; `query` is merged on top of those.
    pub fn url(
        &self,
        template: &str,
        params: &HashMap<String, UrlValue>,
        query: &HashMap<String, UrlValue>,
    ) -> Result<String, UrlError> {
        self.bind(template)?.build(params, query)
    }

    /// Pre-parse a template into a reusable bound builder
    pub fn bind(&self, template: &str) -> Result<BoundUrl, UrlError> {
        Ok(BoundUrl {
            template: PathTemplate::parse(template)?,
            base: self.base.clone(),
        })
    }

    /// Bind an already-parsed template
    pub fn bind_template(&self, template: PathTemplate) -> BoundUrl {
        BoundUrl {
            template,
            base: self.base.clone(),
        }
    }
}

/// A URL builder fixed to one route template
#[derive(Debug, Clone)]
pub struct BoundUrl {
    template: PathTemplate,
    base: Option<Url>,
}

impl BoundUrl {
    /// The canonical template this builder is bound to
    pub fn template(&self) -> &str {
        self.template.path()
    }

    /// Build the URL. See [`UrlBuilder::url`].
    pub fn build(
        &self,
        params: &HashMap<String, UrlValue>,
        query: &HashMap<String, UrlValue>,
    ) -> Result<String, UrlError> {
        let path = self.template.compile(params)?;

        // Excess params become query pairs; the explicit query map wins on
        // key conflicts. Keys are emitted in sorted order so output is
        // stable across runs.
        let mut pairs: Vec<(&str, &UrlValue)> = params
            .iter()
            .filter(|(key, _)| !self.template.has_param(key) && !query.contains_key(*key))
            .map(|(key, value)| (key.as_str(), value))
            .collect();
        pairs.extend(query.iter().map(|(key, value)| (key.as_str(), value)));
        pairs.sort_by_key(|(key, _)| *key);

        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            match value {
                UrlValue::One(v) => {
                    serializer.append_pair(key, v);
                }
                UrlValue::Many(vs) => {
                    for v in vs {
                        serializer.append_pair(key, v);
                    }
                }
            }
        }
        let query_string = serializer.finish();

        match &self.base {
            Some(base) => {
                let mut url = base.join(&path).map_err(|source| UrlError::Base {
                    path: path.clone(),
                    source,
                })?;
                if !query_string.is_empty() {
                    url.set_query(Some(&query_string));
                }
                Ok(url.to_string())
            }
            None if query_string.is_empty() => Ok(path),
            None => Ok(format!("{path}?{query_string}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, UrlValue)]) -> HashMap<String, UrlValue> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_absolute_url_with_excess_param_as_query() {
        let builder = UrlBuilder::with_base(Url::parse("https://h").unwrap());
        let url = builder
            .url(
                "/bookmarks/:id",
                &params(&[("id", "9".into()), ("q", "z".into())]),
                &HashMap::new(),
            )
            .unwrap();
        assert_eq!(url, "https://h/bookmarks/9?q=z");
    }

    #[test]
    fn test_relative_url_without_base() {
        let builder = UrlBuilder::new();
        let url = builder
            .url("/bookmarks/:id", &params(&[("id", "9".into())]), &HashMap::new())
            .unwrap();
        assert_eq!(url, "/bookmarks/9");
    }

    #[test]
    fn test_explicit_query_overrides_excess_params() {
        let builder = UrlBuilder::new();
        let url = builder
            .url(
                "/search",
                &params(&[("q", "old".into())]),
                &params(&[("q", "new".into())]),
            )
            .unwrap();
        assert_eq!(url, "/search?q=new");
    }

    #[test]
    fn test_list_values_repeat_query_keys() {
        let builder = UrlBuilder::new();
        let url = builder
            .url(
                "/search",
                &HashMap::new(),
                &params(&[(
                    "tag",
                    UrlValue::Many(vec!["a".to_string(), "b".to_string()]),
                )]),
            )
            .unwrap();
        assert_eq!(url, "/search?tag=a&tag=b");
    }

    #[test]
    fn test_query_values_are_encoded() {
        let builder = UrlBuilder::new();
        let url = builder
            .url("/search", &params(&[("q", "a b".into())]), &HashMap::new())
            .unwrap();
        assert_eq!(url, "/search?q=a+b");
    }

    #[test]
    fn test_bracket_template_accepted() {
        let builder = UrlBuilder::new();
        let url = builder
            .url("/posts/[id]", &params(&[("id", "42".into())]), &HashMap::new())
            .unwrap();
        assert_eq!(url, "/posts/42");
    }

    #[test]
    fn test_compile_reproduces_matched_pathname() {
        let template = PathTemplate::parse("/posts/:id/comments/:cid").unwrap();
        let captured = template.matches("/posts/7/comments/9").unwrap();
        let as_values: HashMap<String, UrlValue> = captured
            .into_iter()
            .map(|(k, v)| (k, UrlValue::One(v)))
            .collect();
        let builder = UrlBuilder::new();
        let bound = builder.bind_template(template);
        assert_eq!(
            bound.build(&as_values, &HashMap::new()).unwrap(),
            "/posts/7/comments/9"
        );
    }
}
