//! The `getMore` command builder (C7): fetches the next batch for an already-open cursor. Used
//! directly by the command translation layer for testing the wire shape; the cursor materializer
//! (`crate::cursor`) builds the same document inline so it can pin the call to a specific channel.

use std::time::Duration;

use bson::{doc, Document};

use crate::{
    coll::Namespace,
    error::Result,
    handshake::ConnectionDescription,
    operation::{command_error_from_reply, CursorBody, Operation},
};

#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    batch_size: Option<u32>,
    max_await_time: Option<Duration>,
}

impl GetMore {
    pub(crate) fn new(ns: Namespace, cursor_id: i64, batch_size: Option<u32>, max_await_time: Option<Duration>) -> Self {
        Self {
            ns,
            cursor_id,
            batch_size,
            max_await_time,
        }
    }
}

impl Operation for GetMore {
    type O = CursorBody;

    const NAME: &'static str = "getMore";

    fn build(&self, _description: &ConnectionDescription) -> Result<Document> {
        let mut command = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };
        if let Some(batch_size) = self.batch_size {
            command.insert("batchSize", i64::from(batch_size));
        }
        if let Some(max_await_time) = self.max_await_time {
            command.insert("maxTimeMS", max_await_time.as_millis() as i64);
        }
        Ok(command)
    }

    fn handle_response(&self, response: Document, _description: &ConnectionDescription) -> Result<Self::O> {
        if let Some(err) = command_error_from_reply(&response) {
            return Err(err);
        }
        Ok(bson::from_document(response)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn build_includes_cursor_id_and_collection() {
        let get_more = GetMore::new(Namespace::new("store", "widgets"), 42, None, None);
        let command = get_more.build(&super::super::test_description()).unwrap();
        assert_eq!(command.get_i64("getMore").unwrap(), 42);
        assert_eq!(command.get_str("collection").unwrap(), "widgets");
        assert!(!command.contains_key("batchSize"));
    }

    #[test]
    fn build_includes_batch_size_and_max_time_when_set() {
        let get_more = GetMore::new(
            Namespace::new("store", "widgets"),
            42,
            Some(100),
            Some(Duration::from_millis(500)),
        );
        let command = get_more.build(&super::super::test_description()).unwrap();
        assert_eq!(command.get_i64("batchSize").unwrap(), 100);
        assert_eq!(command.get_i64("maxTimeMS").unwrap(), 500);
    }
}
