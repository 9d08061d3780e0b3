//! The canonical `db.collection` namespace, and the `$out`/`$merge` rewrite applied to
//! aggregation pipelines that target a different database than the one the command runs against.

use std::{fmt, str::FromStr};

use bson::{doc, Bson, Document};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};

/// A struct modeling the canonical name for a collection: the database it lives in, and its name
/// within that database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Constructs a `Namespace` with the given database and collection.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(2, '.');
        let db = parts.next()?;
        let coll = parts.next()?;
        if coll.is_empty() {
            return None;
        }
        Some(Self {
            db: db.to_string(),
            coll: coll.to_string(),
        })
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(())
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(&s).ok_or_else(|| D::Error::custom("missing one or more fields in namespace"))
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{}.{}", self.db, self.coll))
    }
}

/// Rewrites a pipeline's trailing `$out`/`$merge` stage so that a target database matching the
/// operation's own database is expressed in the compact string/collection-name form the server
/// expects, rather than the fully qualified `{db, coll}` document form (which the server only
/// accepts for cross-database `$out`/`$merge`).
///
/// Returns the pipeline unchanged if the last stage is not `$out`/`$merge`, or if its target
/// database differs from `operation_db`.
pub(crate) fn rewrite_out_stage_for_db(mut pipeline: Vec<Document>, operation_db: &str) -> Vec<Document> {
    let Some(last) = pipeline.last_mut() else {
        return pipeline;
    };

    if let Some(target) = last.get("$out").and_then(Bson::as_document) {
        if let (Ok(db), Ok(coll)) = (target.get_str("db"), target.get_str("coll")) {
            if db == operation_db {
                let coll = coll.to_string();
                last.insert("$out", coll);
            }
        }
    } else if let Some(Bson::Document(merge)) = last.get("$merge").cloned() {
        if let Some((db, coll)) = merge
            .get("into")
            .and_then(Bson::as_document)
            .and_then(|into| into.get_str("db").ok().zip(into.get_str("coll").ok()))
        {
            if db == operation_db {
                let mut rewritten = merge;
                rewritten.insert("into", coll.to_string());
                last.insert("$merge", rewritten);
            }
        }
    }

    pipeline
}

/// Returns `true` if the pipeline's last stage is `$out` or `$merge`; such pipelines must run
/// against the primary regardless of the operation's configured read preference, and their
/// cursor response never carries a `batchSize`.
pub(crate) fn is_out_or_merge(pipeline: &[Document]) -> bool {
    pipeline
        .last()
        .and_then(|stage| stage.keys().next())
        .is_some_and(|key| key == "$out" || key == "$merge")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn namespace_round_trips_through_display() {
        let ns = Namespace::new("store", "widgets");
        assert_eq!(ns.to_string(), "store.widgets");
        assert_eq!(Namespace::from_str("store.widgets").unwrap(), ns);
    }

    #[test]
    fn namespace_parse_rejects_missing_collection() {
        assert!("store".parse::<Namespace>().is_err());
    }

    #[test]
    fn rewrite_out_stage_same_db_becomes_string_form() {
        let pipeline = vec![doc! { "$out": { "db": "store", "coll": "archive" } }];
        let rewritten = rewrite_out_stage_for_db(pipeline, "store");
        assert_eq!(rewritten[0].get_str("$out").unwrap(), "archive");
    }

    #[test]
    fn rewrite_out_stage_cross_db_is_untouched() {
        let pipeline = vec![doc! { "$out": { "db": "other", "coll": "archive" } }];
        let rewritten = rewrite_out_stage_for_db(pipeline.clone(), "store");
        assert_eq!(rewritten, pipeline);
    }

    #[test]
    fn is_out_or_merge_detects_trailing_stage() {
        assert!(is_out_or_merge(&[doc! { "$match": {} }, doc! { "$merge": { "into": "x" } }]));
        assert!(!is_out_or_merge(&[doc! { "$match": {} }]));
    }
}
