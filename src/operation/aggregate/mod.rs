//! The aggregate-to-collection command builder (C5): an aggregation pipeline whose final stage
//! writes its output into a collection (`$out`/`$merge`), rather than returning a cursor of
//! documents to the caller.

use bson::{doc, Bson, Document};

use crate::{
    coll::{is_out_or_merge, rewrite_out_stage_for_db, Namespace},
    error::{Error, Result},
    handshake::ConnectionDescription,
    operation::{append_options, command_error_from_reply, CursorBody, Operation},
    options::AggregateOptions,
    selection_criteria::SelectionCriteria,
};

/// What an `aggregate` command runs against: a specific collection (the ordinary case), or the
/// database itself for pipelines like `$currentOp`/`$listLocalSessions` that have no collection
/// to name, per the `aggregate: 1` wire convention.
#[derive(Debug, Clone)]
pub(crate) enum AggregateTarget {
    Collection(Namespace),
    Database(String),
}

impl AggregateTarget {
    /// The database this target's command runs against, regardless of variant.
    pub(crate) fn db(&self) -> &str {
        match self {
            AggregateTarget::Collection(ns) => &ns.db,
            AggregateTarget::Database(db) => db,
        }
    }

    fn to_bson(&self) -> Bson {
        match self {
            AggregateTarget::Collection(ns) => Bson::String(ns.coll.clone()),
            AggregateTarget::Database(_) => Bson::Int32(1),
        }
    }
}

/// Builds an `aggregate` command whose pipeline must end in `$out`/`$merge`. Constructed only via
/// [`Aggregate::to_collection`], which validates and rewrites the pipeline up front so that
/// `build` itself cannot fail on pipeline shape.
#[derive(Debug)]
pub(crate) struct Aggregate {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
}

impl Aggregate {
    /// Validates that `pipeline` ends in `$out`/`$merge`, rewrites a same-database `$out`/`$merge`
    /// target to its compact string form, and builds the operation. Fails synchronously, before
    /// any command is sent, if the pipeline has no output stage.
    pub(crate) fn to_collection(
        ns: Namespace,
        pipeline: Vec<Document>,
        options: Option<AggregateOptions>,
    ) -> Result<Self> {
        if !is_out_or_merge(&pipeline) {
            return Err(Error::configuration_error(
                "an aggregation pipeline targeting a collection must end in $out or $merge",
            ));
        }
        let pipeline = rewrite_out_stage_for_db(pipeline, &ns.db);
        Ok(Self {
            target: AggregateTarget::Collection(ns),
            pipeline,
            options,
        })
    }

    /// Builds a database-scoped aggregation (`aggregate: 1`), for pipelines with no specific
    /// collection target (e.g. `$currentOp`, `$listLocalSessions`). No `$out`/`$merge` output
    /// stage is required or rewritten, since such pipelines never target a collection.
    pub(crate) fn to_database(db: impl Into<String>, pipeline: Vec<Document>, options: Option<AggregateOptions>) -> Self {
        Self {
            target: AggregateTarget::Database(db.into()),
            pipeline,
            options,
        }
    }
}

impl Operation for Aggregate {
    type O = CursorBody;

    const NAME: &'static str = "aggregate";

    fn build(&self, _description: &ConnectionDescription) -> Result<Document> {
        let mut command = doc! {
            Self::NAME: self.target.to_bson(),
            "pipeline": self.pipeline.clone(),
            "cursor": {},
        };

        if let Some(options) = &self.options {
            append_options(&mut command, Some(options))?;
            if let Some(write_concern) = &options.write_concern {
                command.insert("writeConcern", bson::to_bson(write_concern)?);
            }
            if let Some(read_concern) = &options.read_concern {
                command.insert("readConcern", bson::to_bson(read_concern)?);
            }
        }

        Ok(command)
    }

    fn handle_response(&self, response: Document, _description: &ConnectionDescription) -> Result<Self::O> {
        if let Some(err) = command_error_from_reply(&response) {
            return Err(err);
        }
        Ok(bson::from_document(response)?)
    }

    fn write_concern(&self) -> Option<&crate::concern::WriteConcern> {
        self.options.as_ref().and_then(|o| o.write_concern.as_ref())
    }

    fn cursor_batch_size(&self) -> Option<u32> {
        self.options.as_ref().and_then(|o| o.batch_size)
    }

    fn cursor_max_await_time(&self) -> Option<std::time::Duration> {
        self.options.as_ref().and_then(|o| o.max_await_time)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::concern::{Acknowledgment, ReadConcern, WriteConcern};
    use crate::handshake::{ConnectionId, HelloResult};
    use crate::server_type::ServerType;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn description() -> ConnectionDescription {
        ConnectionDescription {
            connection_id: ConnectionId {
                local: 1,
                server_value: Some(1),
            },
            hello_result: HelloResult {
                server_type: ServerType::RsPrimary,
                max_wire_version: Some(17),
                min_wire_version: Some(0),
                logical_session_timeout: Some(Duration::from_secs(1800)),
                service_id: None,
                connection_id: Some(1),
                sasl_supported_mechs: None,
                max_write_batch_size: None,
                max_bson_object_size: None,
            },
        }
    }

    #[test]
    fn pipeline_without_output_stage_is_rejected_at_construction() {
        let pipeline = vec![doc! { "$match": { "x": 1 } }];
        let err = Aggregate::to_collection(Namespace::new("store", "widgets"), pipeline, None);
        assert!(err.is_err());
    }

    #[test]
    fn same_database_out_stage_is_rewritten_to_string_form() {
        let pipeline = vec![doc! { "$out": { "db": "store", "coll": "archive" } }];
        let aggregate =
            Aggregate::to_collection(Namespace::new("store", "widgets"), pipeline, None).unwrap();
        let command = aggregate.build(&description()).unwrap();
        let pipeline = command.get_array("pipeline").unwrap();
        assert_eq!(pipeline[0].as_document().unwrap().get_str("$out").unwrap(), "archive");
    }

    #[test]
    fn cross_database_out_stage_is_left_as_a_document() {
        let pipeline = vec![doc! { "$out": { "db": "other", "coll": "archive" } }];
        let aggregate =
            Aggregate::to_collection(Namespace::new("store", "widgets"), pipeline, None).unwrap();
        let command = aggregate.build(&description()).unwrap();
        let pipeline = command.get_array("pipeline").unwrap();
        assert!(pipeline[0].as_document().unwrap().get_document("$out").is_ok());
    }

    #[test]
    fn database_scoped_target_emits_aggregate_one() {
        let pipeline = vec![doc! { "$currentOp": {} }];
        let aggregate = Aggregate::to_database("admin", pipeline, None);
        let command = aggregate.build(&description()).unwrap();
        assert_eq!(command.get_i32("aggregate").unwrap(), 1);
        assert_eq!(aggregate.target.db(), "admin");
    }

    #[test]
    fn write_concern_and_read_concern_are_sent_on_the_wire() {
        let options = AggregateOptions::builder()
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .read_concern(ReadConcern::Majority)
            .build();
        let pipeline = vec![doc! { "$out": "archive" }];
        let aggregate =
            Aggregate::to_collection(Namespace::new("store", "widgets"), pipeline, Some(options)).unwrap();
        let command = aggregate.build(&description()).unwrap();
        assert_eq!(
            command.get_document("writeConcern").unwrap().get_str("w").unwrap(),
            "majority"
        );
        assert_eq!(
            command.get_document("readConcern").unwrap().get_str("level").unwrap(),
            "majority"
        );
    }
}
