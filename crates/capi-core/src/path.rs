//! CAPI request path grammar
//!
//! Splits a raw (still percent-encoded) request path into segments and
//! classifies it by segment count and shape. Classification looks at the
//! raw segments, so an escaped `%5F` never turns a document id into a
//! sub-resource; handlers only ever see decoded names.

use crate::error::{CapiError, Result};

/// Prefix shared by all local (checkpoint) document ids.
pub const LOCAL_PREFIX: &str = "_local/";

/// Database-level `_` sub-resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSpecial {
    /// `_bulk_docs`
    BulkDocs,
    /// `_revs_diff`
    RevsDiff,
    /// `_ensure_full_commit`
    EnsureFullCommit,
    /// Any other `_` segment, kept raw
    Other(String),
}

impl DatabaseSpecial {
    fn from_segment(segment: &str) -> Self {
        match segment {
            "_bulk_docs" => DatabaseSpecial::BulkDocs,
            "_revs_diff" => DatabaseSpecial::RevsDiff,
            "_ensure_full_commit" => DatabaseSpecial::EnsureFullCommit,
            other => DatabaseSpecial::Other(other.to_string()),
        }
    }
}

/// Classified request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapiPath {
    /// `/`
    Root,
    /// `/_something`
    RootSpecial {
        /// The raw special segment, e.g. `_pre_replicate`
        special: String,
    },
    /// `/{db}`
    Database {
        /// Database name
        db: String,
    },
    /// `/{db}/_something`
    DatabaseSpecial {
        /// Database name
        db: String,
        /// Which sub-resource
        special: DatabaseSpecial,
    },
    /// `/{db}/{docid}`
    Document {
        /// Database name
        db: String,
        /// Document id
        doc_id: String,
    },
    /// `/{db}/_local/{docid}`
    LocalDocument {
        /// Database name
        db: String,
        /// Document id including the `_local/` prefix
        doc_id: String,
    },
    /// `/{db}/{docid}/{attachment}`
    Attachment {
        /// Database name
        db: String,
        /// Document id
        doc_id: String,
        /// Attachment name
        attachment: String,
    },
    /// `/{db}/_local/{docid}/{attachment}...`
    LocalAttachment {
        /// Database name
        db: String,
        /// Local document id (without prefix)
        doc_id: String,
        /// Attachment name
        attachment: String,
    },
    /// Four or more segments without `_local`
    Unrecognized,
}

impl CapiPath {
    /// Short name of the classification, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CapiPath::Root => "root",
            CapiPath::RootSpecial { .. } => "root-special",
            CapiPath::Database { .. } => "database",
            CapiPath::DatabaseSpecial { .. } => "database-special",
            CapiPath::Document { .. } => "document",
            CapiPath::LocalDocument { .. } => "local-document",
            CapiPath::Attachment { .. } => "attachment",
            CapiPath::LocalAttachment { .. } => "local-attachment",
            CapiPath::Unrecognized => "unrecognized",
        }
    }
}

/// Splits a path into raw segments after stripping one leading `/`.
///
/// Trailing empty segments are dropped; the empty path and `/` both yield
/// a single empty segment.
pub fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut pieces: Vec<&str> = trimmed.split('/').collect();
    while pieces.len() > 1 && pieces.last().is_some_and(|p| p.is_empty()) {
        pieces.pop();
    }
    pieces
}

/// Percent-decodes one path segment (form-style: `+` is a space).
pub fn unescape_segment(segment: &str) -> Result<String> {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = bytes.len() > i + 2
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(CapiError::malformed(format!(
                    "incomplete escape sequence in '{}'",
                    segment
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    let spaced = segment.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| CapiError::malformed(format!("segment '{}' is not valid UTF-8", segment)))
}

/// Classifies a raw request path.
pub fn classify_path(path: &str) -> Result<CapiPath> {
    let pieces = split_path(path);

    match pieces.as_slice() {
        [first] if first.is_empty() => Ok(CapiPath::Root),
        [special] if special.starts_with('_') => Ok(CapiPath::RootSpecial {
            special: unescape_segment(special)?,
        }),
        [db] => Ok(CapiPath::Database {
            db: unescape_segment(db)?,
        }),
        [db, second] => {
            let db = unescape_segment(db)?;
            if second.starts_with('_') {
                Ok(CapiPath::DatabaseSpecial {
                    db,
                    special: DatabaseSpecial::from_segment(second),
                })
            } else {
                Ok(CapiPath::Document {
                    db,
                    doc_id: unescape_segment(second)?,
                })
            }
        }
        [db, "_local", doc_id] => Ok(CapiPath::LocalDocument {
            db: unescape_segment(db)?,
            doc_id: format!("{}{}", LOCAL_PREFIX, unescape_segment(doc_id)?),
        }),
        [db, doc_id, attachment] => Ok(CapiPath::Attachment {
            db: unescape_segment(db)?,
            doc_id: unescape_segment(doc_id)?,
            attachment: unescape_segment(attachment)?,
        }),
        [db, "_local", doc_id, attachment, ..] => Ok(CapiPath::LocalAttachment {
            db: unescape_segment(db)?,
            doc_id: unescape_segment(doc_id)?,
            attachment: unescape_segment(attachment)?,
        }),
        _ => Ok(CapiPath::Unrecognized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_empty_and_slash() {
        assert_eq!(split_path(""), vec![""]);
        assert_eq!(split_path("/"), vec![""]);
        assert_eq!(split_path("//"), vec![""]);
    }

    #[test]
    fn test_split_drops_trailing_empty() {
        assert_eq!(split_path("/default/"), vec!["default"]);
        assert_eq!(split_path("/default/docid"), vec!["default", "docid"]);
    }

    #[test]
    fn test_split_keeps_inner_empty() {
        assert_eq!(split_path("/a//b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_unescape_plain() {
        assert_eq!(unescape_segment("default").unwrap(), "default");
    }

    #[test]
    fn test_unescape_slash_and_plus() {
        assert_eq!(unescape_segment("a%2Fb").unwrap(), "a/b");
        assert_eq!(unescape_segment("a+b").unwrap(), "a b");
        assert_eq!(unescape_segment("a%2Bb").unwrap(), "a+b");
    }

    #[test]
    fn test_unescape_utf8() {
        assert_eq!(unescape_segment("caf%C3%A9").unwrap(), "café");
    }

    #[test]
    fn test_unescape_rejects_truncated_escape() {
        assert!(matches!(
            unescape_segment("abc%2"),
            Err(CapiError::MalformedRequest { .. })
        ));
        assert!(unescape_segment("abc%").is_err());
        assert!(unescape_segment("%zz").is_err());
    }

    #[test]
    fn test_unescape_rejects_invalid_utf8() {
        assert!(matches!(
            unescape_segment("%FF%FE"),
            Err(CapiError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_classify_root() {
        assert_eq!(classify_path("/").unwrap(), CapiPath::Root);
        assert_eq!(classify_path("").unwrap(), CapiPath::Root);
    }

    #[test]
    fn test_classify_root_special() {
        assert_eq!(
            classify_path("/_pre_replicate").unwrap(),
            CapiPath::RootSpecial {
                special: "_pre_replicate".to_string()
            }
        );
    }

    #[test]
    fn test_classify_database() {
        assert_eq!(
            classify_path("/default").unwrap(),
            CapiPath::Database {
                db: "default".to_string()
            }
        );
    }

    #[test]
    fn test_classify_escaped_database() {
        assert_eq!(
            classify_path("/beer-sample%2Fmaster").unwrap(),
            CapiPath::Database {
                db: "beer-sample/master".to_string()
            }
        );
    }

    #[test]
    fn test_classify_database_specials() {
        let cases = [
            ("/default/_bulk_docs", DatabaseSpecial::BulkDocs),
            ("/default/_revs_diff", DatabaseSpecial::RevsDiff),
            (
                "/default/_ensure_full_commit",
                DatabaseSpecial::EnsureFullCommit,
            ),
            (
                "/default/_changes",
                DatabaseSpecial::Other("_changes".to_string()),
            ),
        ];
        for (path, special) in cases {
            assert_eq!(
                classify_path(path).unwrap(),
                CapiPath::DatabaseSpecial {
                    db: "default".to_string(),
                    special
                }
            );
        }
    }

    #[test]
    fn test_classify_document() {
        assert_eq!(
            classify_path("/default/docid").unwrap(),
            CapiPath::Document {
                db: "default".to_string(),
                doc_id: "docid".to_string()
            }
        );
    }

    #[test]
    fn test_escaped_underscore_is_a_document() {
        assert_eq!(
            classify_path("/default/%5Fbulk_docs").unwrap().kind(),
            "document"
        );
    }

    #[test]
    fn test_classify_local_document() {
        assert_eq!(
            classify_path("/default/_local/441-0921e80de6603d60b1d553bb7c253def%2Fbeer-sample%2Fbeer-sample")
                .unwrap(),
            CapiPath::LocalDocument {
                db: "default".to_string(),
                doc_id: "_local/441-0921e80de6603d60b1d553bb7c253def/beer-sample/beer-sample"
                    .to_string()
            }
        );
    }

    #[test]
    fn test_classify_attachment() {
        assert_eq!(
            classify_path("/default/docid/photo.png").unwrap(),
            CapiPath::Attachment {
                db: "default".to_string(),
                doc_id: "docid".to_string(),
                attachment: "photo.png".to_string()
            }
        );
    }

    #[test]
    fn test_classify_local_attachment() {
        assert_eq!(
            classify_path("/default/_local/docid/att/extra").unwrap(),
            CapiPath::LocalAttachment {
                db: "default".to_string(),
                doc_id: "docid".to_string(),
                attachment: "att".to_string()
            }
        );
    }

    #[test]
    fn test_classify_unrecognized() {
        assert_eq!(
            classify_path("/default/docid/att/extra").unwrap(),
            CapiPath::Unrecognized
        );
    }

    #[test]
    fn test_classify_bad_escape_fails() {
        assert!(classify_path("/default/doc%G1").is_err());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(CapiPath::Root.kind(), "root");
        assert_eq!(
            classify_path("/default/_local/x").unwrap().kind(),
            "local-document"
        );
    }
}
