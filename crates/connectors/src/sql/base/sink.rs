use crate::sql::base::error::DbError;
use async_trait::async_trait;
use bytes::Bytes;

/// The byte stream of an open `COPY ... FROM STDIN` session.
///
/// Each chunk handed to [`CopySink::write`] is forwarded whole, so callers
/// that write one complete record per chunk never leave a partial record on
/// the wire. Dropping a sink without calling [`CopySink::finish`] aborts the
/// copy.
#[async_trait]
pub trait CopySink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<(), DbError>;

    async fn flush(&mut self) -> Result<(), DbError>;

    /// Signals end of data and waits for the server to acknowledge it.
    /// Returns the number of rows the destination reports as copied.
    async fn finish(&mut self) -> Result<u64, DbError>;
}
