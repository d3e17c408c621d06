use std::io::SeekFrom;

use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

/// Moves the cursor back to the beginning of the line that ends at the current position.
/// A newline right before the cursor is treated as the terminator of that line, so calling
/// this at the end of `a\nb\n` lands on `b`.
pub async fn seek_line_backwards(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<(), io::Error> {
    let mut skip_terminator = true;
    loop {
        let position = file.stream_position().await?;
        if position == 0 {
            return Ok(());
        }
        let chunk = u64::min(position, buffer.len() as u64) as usize;
        file.seek(SeekFrom::Current(-(chunk as i64))).await?;
        file.read_exact(&mut buffer[..chunk]).await?;

        let mut scanned = &buffer[..chunk];
        if skip_terminator {
            skip_terminator = false;
            if scanned.last() == Some(&b'\n') {
                scanned = &scanned[..chunk - 1];
            }
        }

        if let Some(newline) = scanned.iter().rposition(|v| *v == b'\n') {
            // Land right after the newline.
            let back = chunk - newline - 1;
            file.seek(SeekFrom::Current(-(back as i64))).await?;
            return Ok(());
        }

        file.seek(SeekFrom::Current(-(chunk as i64))).await?;
    }
}

/// Reads the line that ends at the current position without its terminator and leaves the
/// cursor at the start of that line, so repeated calls walk a file from the end. Returns
/// `None` once the start of the file is reached.
pub async fn read_line_backwards(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
    buffer: &mut [u8],
) -> Result<Option<Vec<u8>>, io::Error> {
    let end = file.stream_position().await?;
    if end == 0 {
        return Ok(None);
    }
    seek_line_backwards(file, buffer).await?;
    let start = file.stream_position().await?;
    let mut line = vec![0; (end - start) as usize];
    file.read_exact(&mut line).await?;
    file.seek(SeekFrom::Start(start)).await?;

    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(line))
}

/// Whether the last byte of the file is a newline. Empty files count as terminated.
pub async fn ends_with_newline(
    file: &mut (impl AsyncSeek + AsyncRead + Unpin),
) -> Result<bool, io::Error> {
    if file.seek(SeekFrom::End(0)).await? == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).await?;
    Ok(file.read_u8().await? == b'\n')
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use anyhow::Result;
    use tempfile::tempfile;
    use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

    use crate::fs::operations::{ends_with_newline, read_line_backwards, seek_line_backwards};

    const TEXT: &str = "first entry\n\
                        second entry\n\
                        third entry\n";

    fn line_starts() -> Vec<u64> {
        TEXT.bytes()
            .enumerate()
            .filter(|v| v.1 == b'\n')
            .map(|v| v.0 as u64 + 1)
            .collect()
    }

    #[tokio::test]
    async fn seek_line_backwards_walks_to_start() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(TEXT.as_bytes())?;
        let mut file = tokio::fs::File::from_std(file);
        file.seek(std::io::SeekFrom::End(0)).await?;

        let starts = line_starts();
        seek_line_backwards(&mut file, &mut [0; 1024]).await?;
        assert_eq!(file.stream_position().await?, starts[1]);
        seek_line_backwards(&mut file, &mut [0; 1024]).await?;
        assert_eq!(file.stream_position().await?, starts[0]);
        seek_line_backwards(&mut file, &mut [0; 1024]).await?;
        assert_eq!(file.stream_position().await?, 0);
        seek_line_backwards(&mut file, &mut [0; 1024]).await?;
        assert_eq!(file.stream_position().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn seek_line_backwards_small_buffer() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(TEXT.as_bytes())?;
        let mut file = BufReader::new(tokio::fs::File::from_std(file));
        file.seek(std::io::SeekFrom::Start(0)).await?;

        file.read_line(&mut String::new()).await?;
        file.read_line(&mut String::new()).await?;
        let position = file.stream_position().await?;
        assert_eq!(position, line_starts()[1]);

        seek_line_backwards(&mut file, &mut [0; 2]).await?;
        assert_eq!(file.stream_position().await?, line_starts()[0]);
        seek_line_backwards(&mut file, &mut [0; 2]).await?;
        assert_eq!(file.stream_position().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn read_line_backwards_walks_every_line() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(TEXT.as_bytes())?;
        let mut file = tokio::fs::File::from_std(file);
        file.seek(std::io::SeekFrom::End(0)).await?;

        let mut lines = vec![];
        while let Some(line) = read_line_backwards(&mut file, &mut [0; 4]).await? {
            lines.push(String::from_utf8(line)?);
        }
        assert_eq!(lines, vec!["third entry", "second entry", "first entry"]);
        Ok(())
    }

    #[tokio::test]
    async fn read_line_backwards_without_terminator() -> Result<()> {
        let mut file = tempfile()?;
        file.write_all(b"only\nlast one")?;
        let mut file = tokio::fs::File::from_std(file);
        file.seek(std::io::SeekFrom::End(0)).await?;

        assert_eq!(
            read_line_backwards(&mut file, &mut [0; 1024]).await?,
            Some(b"last one".to_vec())
        );
        assert_eq!(file.stream_position().await?, 5);
        assert_eq!(
            read_line_backwards(&mut file, &mut [0; 1024]).await?,
            Some(b"only".to_vec())
        );
        assert_eq!(read_line_backwards(&mut file, &mut [0; 1024]).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn read_line_backwards_empty() -> Result<()> {
        let mut file = tokio::fs::File::from_std(tempfile()?);
        assert_eq!(read_line_backwards(&mut file, &mut [0; 1024]).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn newline_at_end_is_detected() -> Result<()> {
        let mut file = tokio::fs::File::from_std(tempfile()?);
        assert!(ends_with_newline(&mut file).await?);

        let mut file = tempfile()?;
        file.write_all(TEXT.as_bytes())?;
        assert!(ends_with_newline(&mut tokio::fs::File::from_std(file)).await?);

        let mut file = tempfile()?;
        file.write_all(b"cut sho")?;
        assert!(!ends_with_newline(&mut tokio::fs::File::from_std(file)).await?);
        Ok(())
    }
}
