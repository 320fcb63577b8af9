use crate::error::{DataError, Result};
use crate::sequence::Sequence;
use crate::types::{Header, Meta, Row};
use std::fmt;
use tracing::debug;

pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// Pull-based stream of rows returned by [`Driver::query`](crate::Driver::query)
///
/// Rows come out in the order the backend produced them. The cleanup action
/// registered by the driver (closing a per-query connection or cursor) runs
/// exactly once: on [`close`](Self::close), when the end of the stream is
/// observed, when a row fails, or when the stream is dropped.
pub struct ResultStream {
    sequence: Box<dyn Sequence<Row>>,
    header: Header,
    meta: Meta,
    cleanup: Option<Cleanup>,
    failed: bool,
}

impl ResultStream {
    pub(crate) fn new(
        sequence: Box<dyn Sequence<Row>>,
        header: Header,
        meta: Meta,
        cleanup: Option<Cleanup>,
    ) -> Self {
        Self {
            sequence,
            header,
            meta,
            cleanup,
            failed: false,
        }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Whether another row (or a pending error) can be pulled
    pub fn has_next(&mut self) -> bool {
        if self.failed {
            return false;
        }
        let more = self.sequence.has_next();
        if !more {
            self.release();
        }
        more
    }

    /// Pull the next row
    ///
    /// Errors from the source are returned as-is and fail the stream; every
    /// later call returns [`DataError::Exhausted`].
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Row> {
        if !self.has_next() {
            return Err(DataError::Exhausted);
        }

        match self.sequence.next() {
            Ok(row) if row.len() == self.header.len() => Ok(row),
            Ok(row) => {
                self.fail();
                Err(DataError::MalformedReply(format!(
                    "row has {} cells but the header has {} columns",
                    row.len(),
                    self.header.len()
                )))
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    /// Iterate over the remaining rows
    pub fn rows(&mut self) -> Rows<'_> {
        Rows { stream: self }
    }

    /// Release the stream's resources; later calls do nothing
    pub fn close(&mut self) {
        self.release();
    }

    pub fn is_closed(&self) -> bool {
        self.cleanup.is_none()
    }

    fn fail(&mut self) {
        self.failed = true;
        self.release();
    }

    fn release(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            debug!("Releasing result stream resources");
            cleanup();
        }
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("header", &self.header)
            .field("meta", &self.meta)
            .field("failed", &self.failed)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Borrowing iterator returned by [`ResultStream::rows`]
pub struct Rows<'a> {
    stream: &'a mut ResultStream,
}

impl Iterator for Rows<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stream.has_next() {
            Some(self.stream.next())
        } else {
            None
        }
    }
}
