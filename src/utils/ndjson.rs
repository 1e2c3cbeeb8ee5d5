use futures_util::TryStreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;

use crate::{ConductorError, Result};

#[derive(Clone, Copy, Debug)]
pub struct NdjsonLimits {
    pub max_line_bytes: usize,
}

impl Default for NdjsonLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 256 * 1024,
        }
    }
}

async fn read_next_line_bytes_limited<R>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    if max_bytes == 0 {
        return Err(ConductorError::InvalidResponse(
            "max_bytes must be > 0".to_string(),
        ));
    }

    out.clear();

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(!out.is_empty());
        }

        let newline_pos = buf.iter().position(|b| *b == b'\n');
        let take_len = newline_pos.map(|pos| pos + 1).unwrap_or(buf.len());

        if out.len().saturating_add(take_len) > max_bytes {
            return Err(ConductorError::InvalidResponse(format!(
                "stream line exceeds max_line_bytes={max_bytes}"
            )));
        }

        out.extend_from_slice(&buf[..take_len]);
        reader.consume(take_len);

        if newline_pos.is_some() {
            return Ok(true);
        }
    }
}

/// Splits a byte stream into newline-delimited records.
///
/// Records may arrive split across any number of reads; a trailing record
/// without a terminator is still yielded at end of data. Blank records are
/// passed through so callers decide how to treat them.
pub fn ndjson_line_stream_from_reader_with_limits<R>(
    reader: R,
    limits: NdjsonLimits,
) -> BoxStream<'static, Result<String>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream::try_unfold(
        (reader, Vec::<u8>::new(), limits),
        |(mut reader, mut line_bytes, limits)| async move {
            let has_line =
                read_next_line_bytes_limited(&mut reader, &mut line_bytes, limits.max_line_bytes)
                    .await
                    .map_err(|err| {
                        ConductorError::InvalidResponse(format!(
                            "failed to read stream line: {err}"
                        ))
                    })?;
            if !has_line {
                return Ok(None);
            }

            let line = std::str::from_utf8(&line_bytes).map_err(|err| {
                ConductorError::InvalidResponse(format!("invalid stream UTF-8: {err}"))
            })?;
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            Ok(Some((line, (reader, line_bytes, limits))))
        },
    ))
}

pub fn ndjson_line_stream_from_reader<R>(reader: R) -> BoxStream<'static, Result<String>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    ndjson_line_stream_from_reader_with_limits(reader, NdjsonLimits::default())
}

pub fn ndjson_line_stream_from_response(
    response: reqwest::Response,
) -> BoxStream<'static, Result<String>> {
    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
    let reader = StreamReader::new(byte_stream);
    ndjson_line_stream_from_reader(tokio::io::BufReader::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn reader_over(parts: Vec<String>) -> impl AsyncBufRead + Unpin + Send + 'static {
        let chunks: Vec<std::io::Result<Bytes>> =
            parts.into_iter().map(|p| Ok(Bytes::from(p))).collect();
        tokio::io::BufReader::new(StreamReader::new(stream::iter(chunks)))
    }

    #[tokio::test]
    async fn reassembles_records_split_across_reads() -> Result<()> {
        let reader = reader_over(vec![
            "{\"response\":\"He".to_string(),
            "llo\"}\n\n{\"resp".to_string(),
            "onse\":\"!\"}".to_string(),
        ]);

        let mut lines = ndjson_line_stream_from_reader(reader);
        let mut out = Vec::new();
        while let Some(line) = lines.next().await {
            out.push(line?);
        }

        assert_eq!(
            out,
            vec![
                "{\"response\":\"Hello\"}".to_string(),
                String::new(),
                "{\"response\":\"!\"}".to_string(),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn strips_carriage_returns() -> Result<()> {
        let reader = reader_over(vec!["a\r\nb\r\n".to_string()]);
        let out: Vec<String> = ndjson_line_stream_from_reader(reader)
            .try_collect()
            .await?;
        assert_eq!(out, vec!["a", "b"]);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_lines_over_max_line_bytes() -> Result<()> {
        let reader = reader_over(vec![format!("{}\n", "x".repeat(1024))]);

        let mut lines = ndjson_line_stream_from_reader_with_limits(
            reader,
            NdjsonLimits { max_line_bytes: 64 },
        );

        let err = lines.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("max_line_bytes"));
        Ok(())
    }
}
