use std::io;
use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use futures::{Stream, StreamExt};

use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::client::{ClientError, MalformedResponseSnafu, Result, ServiceUnavailableSnafu};
use crate::transport::BodyStream;

const MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

type Lines = FramedRead<StreamReader<BodyStream, Bytes>, LinesCodec>;

/// One result row, aligned with the query's view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultRow {
    view: Arc<Vec<String>>,
    values: Vec<String>,
}

impl ResultRow {
    /// The value in the column of `path`.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.view
            .iter()
            .position(|v| v == path)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn view(&self) -> &[String] {
        &self.view
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }
}

impl Index<usize> for ResultRow {
    type Output = str;

    fn index(&self, i: usize) -> &str {
        &self.values[i]
    }
}

fn read_error(e: LinesCodecError) -> ClientError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => ClientError::MalformedResponseError {
            message: String::from("result row is too long"),
        },
        LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
            ClientError::MalformedResponseError {
                message: e.to_string(),
            }
        }
        LinesCodecError::Io(e) => ClientError::ServiceUnavailableError {
            message: format!("failed to read results: {}", e),
        },
    }
}

/// Rows of a running query, read from the response as they are needed.
///
/// The response body is owned by the iterator and released as soon as the rows run out, a row
/// fails to parse, the row limit is hit, or the iterator is closed or dropped. Once released,
/// `next_row` keeps returning `None`.
pub struct ResultIterator {
    view: Arc<Vec<String>>,
    lines: Option<Lines>,
    read_timeout: Duration,
    limit: Option<usize>,
    rows_read: usize,
}

impl ResultIterator {
    pub(crate) fn new(body: BodyStream, view: Vec<String>, read_timeout: Duration, limit: Option<usize>) -> Self {
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        );

        Self {
            view: Arc::new(view),
            lines: Some(lines),
            read_timeout,
            limit,
            rows_read: 0,
        }
    }

    pub fn view(&self) -> &[String] {
        &self.view
    }

    /// How many rows were yielded so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    /// Whether the response body is still held.
    pub fn is_open(&self) -> bool {
        self.lines.is_some()
    }

    pub fn close(&mut self) {
        if self.lines.take().is_some() {
            tracing::debug!(rows = self.rows_read, "released result stream");
        }
    }

    fn fail<T>(&mut self, e: ClientError) -> Option<Result<T>> {
        tracing::debug!(rows = self.rows_read, "result stream failed: {}", e);
        self.close();
        Some(Err(e))
    }

    fn parse_row(&self, line: &str) -> Result<ResultRow> {
        let values: Vec<String> = line.split('\t').map(String::from).collect();
        if values.len() != self.view.len() {
            return MalformedResponseSnafu {
                message: format!(
                    "expected {} columns, got {} in row {}",
                    self.view.len(),
                    values.len(),
                    self.rows_read + 1
                ),
            }
            .fail();
        }

        Ok(ResultRow {
            view: self.view.clone(),
            values,
        })
    }

    pub async fn next_row(&mut self) -> Option<Result<ResultRow>> {
        if self.limit.map(|l| self.rows_read >= l).unwrap_or(false) {
            self.close();
            return None;
        }

        loop {
            let lines = self.lines.as_mut()?;

            let next = match tokio::time::timeout(self.read_timeout, lines.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return self.fail(
                        ServiceUnavailableSnafu {
                            message: "timed out reading results",
                        }
                        .build(),
                    )
                }
            };

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => return self.fail(read_error(e)),
                None => {
                    self.close();
                    return None;
                }
            };

            let line = line.trim_end_matches('\r');
            // Blank lines only carry data when the view has a single column.
            if line.is_empty() && self.view.len() > 1 {
                continue;
            }

            match self.parse_row(line) {
                Ok(row) => {
                    self.rows_read += 1;
                    tracing::trace!(row = self.rows_read, "read row");
                    return Some(Ok(row));
                }
                Err(e) => return self.fail(e),
            }
        }
    }

    /// Reads every remaining row.
    pub async fn collect_rows(mut self) -> Result<Vec<ResultRow>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ResultRow>> + Send {
        futures::stream::unfold(self, |mut it| async move {
            it.next_row().await.map(|row| (row, it))
        })
    }
}
