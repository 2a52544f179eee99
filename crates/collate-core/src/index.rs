//! Index page generation.
//!
//! The index is rendered from the manifest alone, before any object is
//! fetched, so it always lists the intended keys even when some fetches fail.
//!
//! # Template language
//!
//! ```text
//! {{count}}                  number of keys
//! {{#keys}} ... {{/keys}}    repeated once per key, in manifest order
//! {{key}}                    the current key (HTML-escaped), inside the section only
//! {{key_url}}                the current key as a relative URL path, for `href`/`src`
//! ```
//!
//! Everything else is copied verbatim. Templates are checked when parsed, so
//! a bad template is a configuration error and rendering itself cannot fail.

use std::path::Path;

use thiserror::Error;

/// Default index page.
pub const DEFAULT_INDEX_TEMPLATE: &str = include_str!("templates/index.html");

/// Default name of the index entry inside the archive.
pub const DEFAULT_INDEX_ENTRY: &str = "index.html";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated tag at byte {offset}")]
    Unterminated { offset: usize },

    #[error("unknown tag '{{{{{tag}}}}}' at byte {offset}")]
    UnknownTag { tag: String, offset: usize },

    #[error("'{{{{{tag}}}}}' used outside '{{{{#keys}}}}' at byte {offset}")]
    KeyOutsideSection { tag: String, offset: usize },

    #[error("nested '{{{{#keys}}}}' at byte {offset}")]
    NestedSection { offset: usize },

    #[error("'{{{{/keys}}}}' without matching '{{{{#keys}}}}' at byte {offset}")]
    UnopenedSection { offset: usize },

    #[error("'{{{{#keys}}}}' opened at byte {offset} is never closed")]
    UnclosedSection { offset: usize },

    #[error("failed to read template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Count,
    Key,
    KeyUrl,
    Keys(Vec<Node>),
}

/// A parsed index template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTemplate {
    nodes: Vec<Node>,
}

impl Default for IndexTemplate {
    fn default() -> Self {
        // The bundled template is covered by tests.
        Self::parse(DEFAULT_INDEX_TEMPLATE).unwrap_or(Self { nodes: Vec::new() })
    }
}

impl IndexTemplate {
    /// Parse template text.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut top: Vec<Node> = Vec::new();
        // Open `{{#keys}}` section: (start offset, body)
        let mut section: Option<(usize, Vec<Node>)> = None;
        let mut rest = text;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                push(&mut top, &mut section, Node::Text(rest[..start].to_string()));
            }
            let tag_offset = offset + start;
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or(TemplateError::Unterminated {
                offset: tag_offset,
            })?;
            let tag = after_open[..end].trim();

            match tag {
                "count" => push(&mut top, &mut section, Node::Count),
                "key" | "key_url" => match section.as_mut() {
                    Some((_, body)) if tag == "key" => body.push(Node::Key),
                    Some((_, body)) => body.push(Node::KeyUrl),
                    None => {
                        return Err(TemplateError::KeyOutsideSection {
                            tag: tag.to_string(),
                            offset: tag_offset,
                        })
                    }
                },
                "#keys" => {
                    if section.is_some() {
                        return Err(TemplateError::NestedSection { offset: tag_offset });
                    }
                    section = Some((tag_offset, Vec::new()));
                }
                "/keys" => match section.take() {
                    Some((_, body)) => top.push(Node::Keys(body)),
                    None => return Err(TemplateError::UnopenedSection { offset: tag_offset }),
                },
                other => {
                    return Err(TemplateError::UnknownTag {
                        tag: other.to_string(),
                        offset: tag_offset,
                    })
                }
            }

            let consumed = start + 2 + end + 2;
            rest = &rest[consumed..];
            offset += consumed;
        }

        if let Some((open_offset, _)) = section {
            return Err(TemplateError::UnclosedSection {
                offset: open_offset,
            });
        }
        if !rest.is_empty() {
            top.push(Node::Text(rest.to_string()));
        }

        Ok(Self { nodes: top })
    }

    /// Read and parse a template file.
    pub fn from_file(path: &Path) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Render the index for `keys`, in order.
    pub fn render(&self, keys: &[String]) -> Vec<u8> {
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Count => out.push_str(&keys.len().to_string()),
                Node::Keys(body) => {
                    for key in keys {
                        for inner in body {
                            match inner {
                                Node::Text(text) => out.push_str(text),
                                Node::Count => out.push_str(&keys.len().to_string()),
                                Node::Key => escape_html(key, &mut out),
                                Node::KeyUrl => escape_html(&url_path(key), &mut out),
                                // Nested sections are rejected by the parser
                                Node::Keys(_) => {}
                            }
                        }
                    }
                }
                Node::Key | Node::KeyUrl => {}
            }
        }
        out.into_bytes()
    }
}

fn push(top: &mut Vec<Node>, section: &mut Option<(usize, Vec<Node>)>, node: Node) {
    match section {
        Some((_, body)) => body.push(node),
        None => top.push(node),
    }
}

/// Percent-encode each `/`-separated segment of `key`.
fn url_path(key: &str) -> String {
    let Ok(mut url) = url::Url::parse("relative:///") else {
        return key.to_string();
    };
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().extend(key.split('/'));
        }
        Err(()) => return key.to_string(),
    }
    url.path().trim_start_matches('/').to_string()
}

fn escape_html(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
