//! Blocking iteration over a materialized cursor (§5): drives [`crate::cursor::Cursor::try_next`]
//! on the process-wide runtime so callers outside an async context can iterate a cursor with a
//! plain `for` loop.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::Result;

/// A blocking wrapper over [`crate::cursor::Cursor`].
pub struct Cursor<T> {
    inner: crate::cursor::Cursor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Cursor<T> {
    pub(crate) fn new(inner: crate::cursor::Cursor) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The namespace this cursor iterates.
    pub fn namespace(&self) -> &crate::coll::Namespace {
        self.inner.namespace()
    }
}

impl<T: DeserializeOwned> Iterator for Cursor<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match super::block_on(self.inner.try_next::<T>()) {
            Ok(Some(doc)) => Some(Ok(doc)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
