//! The `find` command builder (C5).

use bson::{doc, Document};

use crate::{
    coll::Namespace,
    error::{Error, Result},
    handshake::ConnectionDescription,
    operation::{append_options, CursorBody, Operation},
    options::{CursorType, FindOptions},
    selection_criteria::SelectionCriteria,
    server_type::ServerType,
};

/// Builds a `find` command, folding legacy `modifiers` keys into their modern option-field
/// equivalents wherever the typed option was left unset.
#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<FindOptions>,
    selection_criteria: Option<SelectionCriteria>,
}

impl Find {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        options: Option<FindOptions>,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Self {
        Self {
            ns,
            filter,
            options,
            selection_criteria,
        }
    }

    /// Maps a legacy OP_QUERY `modifiers` document onto `command`, only for keys whose
    /// equivalent typed option field was left unset (the typed field always shadows the legacy
    /// key, per SPEC §4.3). The mapping is exhaustive: a key in `modifiers` that isn't one of the
    /// recognized legacy keys fails with an argument error naming it.
    fn apply_legacy_modifiers(command: &mut Document, modifiers: &Document, options: &FindOptions) -> Result<()> {
        const LEGACY_KEYS: &[(&str, &str)] = &[
            ("$comment", "comment"),
            ("$hint", "hint"),
            ("$max", "max"),
            ("$maxScan", "maxScan"),
            ("$maxTimeMS", "maxTimeMS"),
            ("$min", "min"),
            ("$orderby", "sort"),
            ("$returnKey", "returnKey"),
            ("$showDiskLoc", "showRecordId"),
            ("$snapshot", "snapshot"),
        ];

        if let Some(unknown) = modifiers
            .keys()
            .find(|key| !LEGACY_KEYS.iter().any(|(legacy_key, _)| legacy_key == key))
        {
            return Err(Error::invalid_argument(format!(
                "unrecognized legacy find modifier: {unknown}"
            )));
        }

        let explicitly_set = |field: &str| -> bool {
            match field {
                "comment" => options.comment.is_some(),
                "hint" => options.hint.is_some(),
                "max" => options.max.is_some(),
                "maxScan" => options.max_scan.is_some(),
                "maxTimeMS" => options.max_time.is_some(),
                "min" => options.min.is_some(),
                "sort" => options.sort.is_some(),
                "returnKey" => options.return_key.is_some(),
                "showRecordId" => options.show_record_id.is_some(),
                "snapshot" => options.snapshot.is_some(),
                _ => false,
            }
        };

        for (legacy_key, field) in LEGACY_KEYS {
            if explicitly_set(field) {
                continue;
            }
            if let Some(value) = modifiers.get(legacy_key) {
                command.insert(*field, value.clone());
            }
        }

        Ok(())
    }
}

impl Operation for Find {
    type O = CursorBody;

    const NAME: &'static str = "find";

    fn build(&self, description: &ConnectionDescription) -> Result<Document> {
        let mut command = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        if let Some(options) = &self.options {
            append_options(&mut command, Some(options))?;

            if let Some(read_concern) = &options.read_concern {
                command.insert("readConcern", bson::to_bson(read_concern)?);
            }

            if let Some(modifiers) = &options.modifiers {
                Self::apply_legacy_modifiers(&mut command, modifiers, options)?;
            }

            if let Some(limit) = options.limit {
                command.insert("limit", limit.unsigned_abs() as i64);
                if limit < 0 {
                    command.insert("singleBatch", true);
                }
            }

            if let Some(batch_size) = options.batch_size {
                command.insert("batchSize", i64::from(batch_size));
            }

            match options.cursor_type {
                Some(CursorType::Tailable) => {
                    command.insert("tailable", true);
                }
                Some(CursorType::TailableAwait) => {
                    command.insert("tailable", true);
                    command.insert("awaitData", true);
                    if let Some(max_await_time) = options.max_await_time {
                        command.insert("maxAwaitTimeMS", max_await_time.as_millis() as i64);
                    }
                }
                Some(CursorType::NonTailable) | None => {}
            }

            if options.allow_partial_results == Some(true)
                && description.initial_server_type() == ServerType::Mongos
            {
                command.insert("allowPartialResults", true);
            }
        }

        Ok(command)
    }

    fn handle_response(&self, response: Document, _description: &ConnectionDescription) -> Result<Self::O> {
        if let Some(err) = crate::operation::command_error_from_reply(&response) {
            return Err(err);
        }
        Ok(bson::from_document(response)?)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn cursor_limit(&self) -> Option<i64> {
        self.options.as_ref().and_then(|o| o.limit)
    }

    fn cursor_batch_size(&self) -> Option<u32> {
        self.options.as_ref().and_then(|o| o.batch_size)
    }

    fn cursor_max_await_time(&self) -> Option<std::time::Duration> {
        self.options.as_ref().and_then(|o| {
            matches!(o.cursor_type, Some(CursorType::TailableAwait)).then_some(o.max_await_time).flatten()
        })
    }
}
