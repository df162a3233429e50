//! Entity addressing.
//!
//! Every entity in the store is identified by a path-like URI, e.g.
//! `dap:session:kodira/thread:3/stack:7/frame:42/scope:Locals/var:x.y`.
//! URIs stay opaque strings everywhere except at API ingress, where
//! [`Uri::parse_segments`] validates the segment grammar.

use crate::error::Error;
use std::fmt;
use std::rc::Rc;

const SCHEME: &str = "dap:";

/// An owned, cheaply clonable entity URI.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Uri(Rc<str>);

/// One `type:id` segment of a parsed URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriSegment {
    pub tag: String,
    pub id: String,
}

impl Uri {
    pub(crate) fn root(tag: &str, id: &str) -> Uri {
        Uri(Rc::from(format!("{SCHEME}{tag}:{id}")))
    }

    /// Append a `tag:id` segment.
    pub(crate) fn child(&self, tag: &str, id: impl fmt::Display) -> Uri {
        Uri(Rc::from(format!("{}/{tag}:{id}", self.0)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate the segment grammar and split the URI into `type:id` pairs.
    pub fn parse_segments(uri: &str) -> Result<Vec<UriSegment>, Error> {
        let body = uri.strip_prefix(SCHEME).ok_or_else(|| Error::UriParse {
            uri: uri.to_string(),
            reason: "missing `dap:` scheme",
        })?;
        let mut segments = Vec::new();
        for raw in body.split('/') {
            let (tag, id) = raw.split_once(':').ok_or_else(|| Error::UriParse {
                uri: uri.to_string(),
                reason: "segment is not of the form `type:id`",
            })?;
            if tag.is_empty() || id.is_empty() {
                return Err(Error::UriParse {
                    uri: uri.to_string(),
                    reason: "empty segment tag or id",
                });
            }
            segments.push(UriSegment {
                tag: tag.to_string(),
                id: id.to_string(),
            });
        }
        if segments.is_empty() {
            return Err(Error::UriParse {
                uri: uri.to_string(),
                reason: "no segments",
            });
        }
        Ok(segments)
    }
}

impl std::borrow::Borrow<str> for Uri {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({})", self.0)
    }
}

impl From<&Uri> for Uri {
    fn from(value: &Uri) -> Self {
        value.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let uri = Uri::root("session", "kodira")
            .child("thread", 3)
            .child("stack", 7)
            .child("frame", 42)
            .child("scope", "Locals")
            .child("var", "x.y");
        assert_eq!(
            uri.as_str(),
            "dap:session:kodira/thread:3/stack:7/frame:42/scope:Locals/var:x.y"
        );

        let segments = Uri::parse_segments(uri.as_str()).unwrap();
        assert_eq!(segments.len(), 6);
        assert_eq!(segments[0].tag, "session");
        assert_eq!(segments[0].id, "kodira");
        assert_eq!(segments[5].tag, "var");
        assert_eq!(segments[5].id, "x.y");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Uri::parse_segments("session:abc").is_err());
        assert!(Uri::parse_segments("dap:").is_err());
        assert!(Uri::parse_segments("dap:session").is_err());
        assert!(Uri::parse_segments("dap:session:a//thread:1").is_err());
    }

    #[test]
    fn test_segment_id_may_contain_colons() {
        let segments = Uri::parse_segments("dap:exception:node:uncaught").unwrap();
        assert_eq!(segments[0].tag, "exception");
        assert_eq!(segments[0].id, "node:uncaught");
    }
}
