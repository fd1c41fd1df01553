//! Binary wire codec
//!
//! Each `write_*` has a matching `read_*`. All integers travel in network
//! (big-endian) byte order; tokio's `read_u16`/`write_u16` family already
//! uses that order. Strings are a `u64` byte length followed by the raw UTF-8
//! bytes, with no terminator. Reads use `read_exact`, so short reads are
//! retried until the value is complete or the stream fails.
//!
//! Writers return the number of bytes handed to the stream.

use std::convert::TryFrom;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{LengthKind, ProtocolError, ProtocolResult};
use super::types::*;

pub async fn write_command<W>(w: &mut W, cmd: Command) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	w.write_u16(cmd.to_wire()).await?;
	Ok(2)
}

/// Read one command
///
/// Unknown values come back as `ProtocolError::UnknownCommand`; the two bytes
/// have been consumed, so the stream stays aligned.
pub async fn read_command<R>(r: &mut R) -> ProtocolResult<Command>
where
	R: AsyncRead + Unpin,
{
	let raw = r.read_u16().await?;
	Command::try_from(raw)
}

pub async fn write_error<W>(w: &mut W, err: ErrorCode) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	w.write_i64(err).await?;
	Ok(8)
}

pub async fn read_error<R>(r: &mut R) -> ProtocolResult<ErrorCode>
where
	R: AsyncRead + Unpin,
{
	Ok(r.read_i64().await?)
}

pub async fn write_size<W>(w: &mut W, size: SizeValue) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	w.write_u64(size).await?;
	Ok(8)
}

pub async fn read_size<R>(r: &mut R) -> ProtocolResult<SizeValue>
where
	R: AsyncRead + Unpin,
{
	Ok(r.read_u64().await?)
}

pub async fn write_mask<W>(w: &mut W, mask: MaskValue) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	w.write_u32(mask).await?;
	Ok(4)
}

pub async fn read_mask<R>(r: &mut R) -> ProtocolResult<MaskValue>
where
	R: AsyncRead + Unpin,
{
	Ok(r.read_u32().await?)
}

pub async fn write_string<W>(w: &mut W, s: &str) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	let n = write_size(w, s.len() as SizeValue).await?;
	w.write_all(s.as_bytes()).await?;
	Ok(n + s.len())
}

/// Read a length-prefixed string, refusing declared lengths above `max_len`
///
/// On `LengthExceeded` the payload bytes are left unread; the caller must
/// treat the stream as desynchronised and close it.
pub async fn read_string<R>(r: &mut R, max_len: u64) -> ProtocolResult<String>
where
	R: AsyncRead + Unpin,
{
	let len = read_size(r).await?;
	if len > max_len {
		return Err(ProtocolError::LengthExceeded { kind: LengthKind::Name, len, max: max_len });
	}
	let bytes = read_bounded(r, len, max_len).await?;
	String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Read exactly `len` raw bytes after checking `len` against `max_len`
pub async fn read_bounded<R>(r: &mut R, len: u64, max_len: u64) -> ProtocolResult<Vec<u8>>
where
	R: AsyncRead + Unpin,
{
	if len > max_len {
		return Err(ProtocolError::LengthExceeded { kind: LengthKind::Payload, len, max: max_len });
	}
	let mut buf = vec![0u8; len as usize];
	r.read_exact(&mut buf).await?;
	Ok(buf)
}

pub async fn write_stat<W>(w: &mut W, stat: &FileStat) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	w.write_u64(stat.dev).await?;
	w.write_u32(stat.mode).await?;
	w.write_u64(stat.size).await?;
	w.write_i64(stat.atime).await?;
	w.write_i64(stat.mtime).await?;
	w.write_i64(stat.ctime).await?;
	Ok(FileStat::WIRE_LEN)
}

pub async fn read_stat<R>(r: &mut R) -> ProtocolResult<FileStat>
where
	R: AsyncRead + Unpin,
{
	Ok(FileStat {
		dev: r.read_u64().await?,
		mode: r.read_u32().await?,
		size: r.read_u64().await?,
		atime: r.read_i64().await?,
		mtime: r.read_i64().await?,
		ctime: r.read_i64().await?,
	})
}

/// Write the fixed-width handshake token: key bytes, NUL padded or truncated
pub async fn write_key<W>(w: &mut W, key: &str) -> ProtocolResult<usize>
where
	W: AsyncWrite + Unpin,
{
	let mut token = [0u8; ASCII_KEY_LEN];
	let bytes = key.as_bytes();
	let n = bytes.len().min(ASCII_KEY_LEN);
	token[..n].copy_from_slice(&bytes[..n]);
	w.write_all(&token).await?;
	Ok(ASCII_KEY_LEN)
}

/// Read the fixed-width handshake token, keeping the bytes before the first NUL
pub async fn read_key<R>(r: &mut R) -> ProtocolResult<String>
where
	R: AsyncRead + Unpin,
{
	let mut token = [0u8; ASCII_KEY_LEN];
	r.read_exact(&mut token).await?;
	let end = token.iter().position(|b| *b == 0).unwrap_or(ASCII_KEY_LEN);
	String::from_utf8(token[..end].to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Cursor;

	#[tokio::test]
	async fn test_integers_are_big_endian() {
		let mut buf = Vec::new();
		write_command(&mut buf, Command::Read).await.unwrap();
		write_mask(&mut buf, 0x0102_0304).await.unwrap();
		assert_eq!(buf, vec![0x00, 0x05, 0x01, 0x02, 0x03, 0x04]);
	}

	#[tokio::test]
	async fn test_error_code_round_trip() {
		for value in [0i64, -(libc::ENOENT as i64), i64::MIN, 4096] {
			let mut buf = Vec::new();
			assert_eq!(write_error(&mut buf, value).await.unwrap(), 8);
			let mut cur = Cursor::new(buf);
			assert_eq!(read_error(&mut cur).await.unwrap(), value);
		}
	}

	#[tokio::test]
	async fn test_size_and_mask_boundaries() {
		let mut buf = Vec::new();
		write_size(&mut buf, u64::MAX).await.unwrap();
		write_size(&mut buf, 0).await.unwrap();
		write_mask(&mut buf, u32::MAX).await.unwrap();
		let mut cur = Cursor::new(buf);
		assert_eq!(read_size(&mut cur).await.unwrap(), u64::MAX);
		assert_eq!(read_size(&mut cur).await.unwrap(), 0);
		assert_eq!(read_mask(&mut cur).await.unwrap(), u32::MAX);
	}

	#[tokio::test]
	async fn test_string_layout_has_no_terminator() {
		let mut buf = Vec::new();
		let n = write_string(&mut buf, "ab").await.unwrap();
		assert_eq!(n, 10);
		assert_eq!(buf, vec![0, 0, 0, 0, 0, 0, 0, 2, b'a', b'b']);
	}

	#[tokio::test]
	async fn test_empty_and_max_length_strings() {
		let long = "x".repeat(DEFAULT_MAX_PATH_LEN as usize);
		let mut buf = Vec::new();
		write_string(&mut buf, "").await.unwrap();
		write_string(&mut buf, &long).await.unwrap();
		let mut cur = Cursor::new(buf);
		assert_eq!(read_string(&mut cur, DEFAULT_MAX_PATH_LEN).await.unwrap(), "");
		assert_eq!(read_string(&mut cur, DEFAULT_MAX_PATH_LEN).await.unwrap(), long);
	}

	#[tokio::test]
	async fn test_oversized_string_fails_before_allocating() {
		let mut buf = Vec::new();
		write_size(&mut buf, u64::MAX).await.unwrap();
		let mut cur = Cursor::new(buf);
		match read_string(&mut cur, 4096).await {
			Err(ProtocolError::LengthExceeded { kind, len, max }) => {
				assert_eq!(kind, LengthKind::Name);
				assert_eq!(len, u64::MAX);
				assert_eq!(max, 4096);
			}
			other => panic!("unexpected: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_truncated_string_reports_closed() {
		let mut buf = Vec::new();
		write_size(&mut buf, 10).await.unwrap();
		buf.extend_from_slice(b"abc");
		let mut cur = Cursor::new(buf);
		assert!(matches!(read_string(&mut cur, 4096).await, Err(ProtocolError::Closed)));
	}

	#[tokio::test]
	async fn test_stat_round_trip() {
		let stat = FileStat {
			dev: 0xdead_beef,
			mode: libc::S_IFREG as u32 | 0o640,
			size: 1 << 40,
			atime: -1,
			mtime: 1_700_000_000,
			ctime: 0,
		};
		let mut buf = Vec::new();
		assert_eq!(write_stat(&mut buf, &stat).await.unwrap(), FileStat::WIRE_LEN);
		assert_eq!(buf.len(), FileStat::WIRE_LEN);
		let mut cur = Cursor::new(buf);
		assert_eq!(read_stat(&mut cur).await.unwrap(), stat);
	}

	#[tokio::test]
	async fn test_command_round_trip_and_unknown() {
		let mut buf = Vec::new();
		write_command(&mut buf, Command::MountNotFound).await.unwrap();
		buf.extend_from_slice(&[0xff, 0xff]);
		write_command(&mut buf, Command::Stop).await.unwrap();
		let mut cur = Cursor::new(buf);
		assert_eq!(read_command(&mut cur).await.unwrap(), Command::MountNotFound);
		assert!(matches!(read_command(&mut cur).await, Err(ProtocolError::UnknownCommand(0xffff))));
		assert_eq!(read_command(&mut cur).await.unwrap(), Command::Stop);
	}

	#[tokio::test]
	async fn test_key_token_padding_and_truncation() {
		let mut buf = Vec::new();
		write_key(&mut buf, "secret").await.unwrap();
		assert_eq!(buf.len(), ASCII_KEY_LEN);
		let mut cur = Cursor::new(buf);
		assert_eq!(read_key(&mut cur).await.unwrap(), "secret");

		let long = "k".repeat(ASCII_KEY_LEN + 20);
		let mut buf = Vec::new();
		write_key(&mut buf, &long).await.unwrap();
		assert_eq!(buf.len(), ASCII_KEY_LEN);
		let mut cur = Cursor::new(buf);
		assert_eq!(read_key(&mut cur).await.unwrap().len(), ASCII_KEY_LEN);
	}
}

// vim: ts=4
