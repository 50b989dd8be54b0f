//! Source-path translation
//!
//! Registered modules carry project-relative source paths in the
//! `api/**` / `queues/*` layout. These helpers translate a source path
//! into its canonical route path or logical queue name:
//!
//! - drop the base directory and the file extension
//! - collapse a trailing `/index`
//! - expand `.`-nested filename segments into path segments
//! - normalise bracket parameters to colon form (done by the template
//!   parser)

use crate::errors::{ManifestError, ManifestResult};

/// Maximum length of a logical queue name
pub const MAX_QUEUE_NAME: usize = 40;

fn strip_extension(path: &str) -> &str {
    match path.rfind('/') {
        Some(slash) => match path[slash..].rfind('.') {
            Some(dot) => &path[..slash + dot],
            None => path,
        },
        None => match path.rfind('.') {
            Some(dot) => &path[..dot],
            None => path,
        },
    }
}

/// Split a filename on dots that sit outside bracket parameters, so
/// `posts.[id]` expands to `posts/[id]` while `[...slug]` stays intact.
fn expand_dot_segments(segment: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in segment.chars() {
        match c {
            '[' => {
                depth += 1;
                current.push(c);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '.' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                current = String::new();
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Whether any path segment is underscore-reserved
pub fn is_reserved(source: &str) -> bool {
    source.split('/').any(|segment| segment.starts_with('_'))
}

/// Translate an `api/**` source path into its route template (bracket or
/// colon parameters preserved for the template parser to normalise)
pub fn route_path_for_source(source: &str) -> ManifestResult<String> {
    if is_reserved(source) {
        return Err(ManifestError::ReservedFilename {
            filename: source.to_string(),
        });
    }
    let relative = source.strip_prefix("api/").ok_or_else(|| ManifestError::EmptyPath {
        filename: source.to_string(),
    })?;
    let without_ext = strip_extension(relative);

    let mut segments: Vec<String> = Vec::new();
    for raw in without_ext.split('/') {
        for part in expand_dot_segments(raw) {
            if part.is_empty() {
                return Err(ManifestError::InvalidSegment {
                    filename: source.to_string(),
                    segment: raw.to_string(),
                });
            }
            segments.push(part);
        }
    }

    // `index` collapses to the directory itself
    if segments.last().map(String::as_str) == Some("index") {
        segments.pop();
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Translate a `queues/*` source path into its logical queue name and
/// FIFO flag
pub fn queue_name_for_source(source: &str) -> ManifestResult<(String, bool)> {
    if is_reserved(source) {
        return Err(ManifestError::ReservedFilename {
            filename: source.to_string(),
        });
    }
    let relative = source
        .strip_prefix("queues/")
        .ok_or_else(|| ManifestError::InvalidQueueName {
            filename: source.to_string(),
            name: source.to_string(),
        })?;
    let name = strip_extension(relative);

    if name.contains('/') {
        return Err(ManifestError::InvalidQueueName {
            filename: source.to_string(),
            name: name.to_string(),
        });
    }

    let fifo = name.ends_with(".fifo");
    let stem = name.strip_suffix(".fifo").unwrap_or(name);
    let valid = !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ManifestError::InvalidQueueName {
            filename: source.to_string(),
            name: name.to_string(),
        });
    }
    if name.len() > MAX_QUEUE_NAME {
        return Err(ManifestError::QueueNameTooLong {
            filename: source.to_string(),
            name: name.to_string(),
            max: MAX_QUEUE_NAME,
        });
    }
    Ok((name.to_string(), fifo))
}
