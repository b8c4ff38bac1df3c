//! Minimal FastCGI client side of the responder role.
//!
//! Only what a single status request needs: one request per connection
//! (request id 1, no keep-alive), params plus an empty stdin, and a response
//! read until `FCGI_END_REQUEST`. Framing violations are reported as
//! `io::ErrorKind::InvalidData`.

use std::io::{self, BufReader, Read, Write};

pub const FCGI_VERSION_1: u8 = 1;
pub const FCGI_HEADER_LEN: usize = 8;
pub const FCGI_MAX_CONTENT_LEN: usize = 0xffff;

const FCGI_BEGIN_REQUEST: u8 = 1;
const FCGI_END_REQUEST: u8 = 3;
const FCGI_PARAMS: u8 = 4;
const FCGI_STDIN: u8 = 5;
const FCGI_STDOUT: u8 = 6;
const FCGI_STDERR: u8 = 7;

const FCGI_RESPONDER: u16 = 1;
const FCGI_NULL_REQUEST_ID: u16 = 0;
pub const REQUEST_ID: u16 = 1;

/// `protocolStatus` values of `FCGI_EndRequestBody`.
const FCGI_REQUEST_COMPLETE: u8 = 0;
const FCGI_CANT_MPX_CONN: u8 = 1;
const FCGI_OVERLOADED: u8 = 2;
const FCGI_UNKNOWN_ROLE: u8 = 3;

/// Response of one request.
#[derive(Debug, Clone, Default)]
pub struct FcgiResponse {
    /// CGI headers emitted by the script (`Content-type`, `Status`, ...).
    pub headers: Vec<(String, String)>,
    /// Value of the `Status` header, if any.
    pub status: Option<u16>,
    pub body: Vec<u8>,
    pub stderr: Vec<u8>,
    pub app_status: u32,
}

impl FcgiResponse {
    /// First CGI header named `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Sends a request with `params` and reads the response from the same stream.
pub fn round_trip<S: Read + Write>(
    stream: &mut S,
    params: &[(&str, &str)],
) -> io::Result<FcgiResponse> {
    write_request(stream, params)?;
    read_response(stream)
}

/// Writes `FCGI_BEGIN_REQUEST`, the params stream and an empty stdin stream.
pub fn write_request<W: Write>(writer: &mut W, params: &[(&str, &str)]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(256);

    let role = FCGI_RESPONDER.to_be_bytes();
    // flags = 0: the server closes the connection when done
    let begin = [role[0], role[1], 0, 0, 0, 0, 0, 0];
    push_record(&mut buf, FCGI_BEGIN_REQUEST, &begin);

    let mut encoded = Vec::new();
    for (name, value) in params {
        encode_pair(&mut encoded, name.as_bytes(), value.as_bytes())?;
    }
    for chunk in encoded.chunks(FCGI_MAX_CONTENT_LEN) {
        push_record(&mut buf, FCGI_PARAMS, chunk);
    }
    push_record(&mut buf, FCGI_PARAMS, &[]);
    push_record(&mut buf, FCGI_STDIN, &[]);

    writer.write_all(&buf)?;
    writer.flush()
}

/// Reads records until `FCGI_END_REQUEST` and splits the CGI headers off stdout.
pub fn read_response<R: Read>(reader: R) -> io::Result<FcgiResponse> {
    let mut reader = BufReader::new(reader);
    let mut stdout = Vec::new();
    let mut response = FcgiResponse::default();

    loop {
        let header = read_header(&mut reader)?;
        let mut content = vec![0u8; header.content_len];
        reader.read_exact(&mut content).map_err(truncated)?;
        skip_padding(&mut reader, header.padding_len)?;

        if header.request_id == FCGI_NULL_REQUEST_ID {
            // management record, not part of our request
            continue;
        }
        if header.request_id != REQUEST_ID {
            return Err(invalid(format!(
                "record for unknown request id {}",
                header.request_id
            )));
        }

        match header.record_type {
            FCGI_STDOUT => stdout.extend_from_slice(&content),
            FCGI_STDERR => response.stderr.extend_from_slice(&content),
            FCGI_END_REQUEST => {
                if content.len() < 8 {
                    return Err(invalid("short FCGI_END_REQUEST body".into()));
                }
                response.app_status =
                    u32::from_be_bytes([content[0], content[1], content[2], content[3]]);
                check_protocol_status(content[4])?;
                break;
            }
            _ => {}
        }
    }

    let (headers, body) = split_cgi_headers(&stdout);
    response.headers = headers;
    response.status = response
        .header("Status")
        .and_then(|value| value.split_whitespace().next())
        .and_then(|code| code.parse().ok());
    response.body = body.to_vec();

    Ok(response)
}

struct RecordHeader {
    record_type: u8,
    request_id: u16,
    content_len: usize,
    padding_len: usize,
}

fn read_header<R: Read>(reader: &mut R) -> io::Result<RecordHeader> {
    let mut raw = [0u8; FCGI_HEADER_LEN];
    reader.read_exact(&mut raw).map_err(truncated)?;

    if raw[0] != FCGI_VERSION_1 {
        return Err(invalid(format!("unsupported FastCGI version {}", raw[0])));
    }

    Ok(RecordHeader {
        record_type: raw[1],
        request_id: u16::from_be_bytes([raw[2], raw[3]]),
        content_len: u16::from_be_bytes([raw[4], raw[5]]) as usize,
        padding_len: raw[6] as usize,
    })
}

fn skip_padding<R: Read>(reader: &mut R, len: usize) -> io::Result<()> {
    let mut padding = [0u8; 255];
    reader.read_exact(&mut padding[..len]).map_err(truncated)
}

fn check_protocol_status(status: u8) -> io::Result<()> {
    let reason = match status {
        FCGI_REQUEST_COMPLETE => return Ok(()),
        FCGI_CANT_MPX_CONN => "server cannot multiplex connections",
        FCGI_OVERLOADED => "server overloaded",
        FCGI_UNKNOWN_ROLE => "server does not support the responder role",
        _ => "unknown protocol status",
    };
    Err(invalid(format!("request rejected: {reason} ({status})")))
}

/// Appends one record, padded to a multiple of 8 bytes.
fn push_record(buf: &mut Vec<u8>, record_type: u8, content: &[u8]) {
    debug_assert!(content.len() <= FCGI_MAX_CONTENT_LEN);
    let len = (content.len() as u16).to_be_bytes();
    let id = REQUEST_ID.to_be_bytes();
    let padding = (8 - content.len() % 8) % 8;

    buf.extend_from_slice(&[
        FCGI_VERSION_1,
        record_type,
        id[0],
        id[1],
        len[0],
        len[1],
        padding as u8,
        0,
    ]);
    buf.extend_from_slice(content);
    buf.resize(buf.len() + padding, 0);
}

/// Name-value pair encoding: lengths below 128 take one byte, others four
/// bytes with the high bit set.
fn encode_pair(buf: &mut Vec<u8>, name: &[u8], value: &[u8]) -> io::Result<()> {
    encode_len(buf, name.len())?;
    encode_len(buf, value.len())?;
    buf.extend_from_slice(name);
    buf.extend_from_slice(value);
    Ok(())
}

fn encode_len(buf: &mut Vec<u8>, len: usize) -> io::Result<()> {
    if len < 0x80 {
        buf.push(len as u8);
        return Ok(());
    }
    let len = u32::try_from(len)
        .ok()
        .filter(|l| *l <= 0x7fff_ffff)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "FastCGI param too long"))?;
    buf.extend_from_slice(&(len | 0x8000_0000).to_be_bytes());
    Ok(())
}

fn split_cgi_headers(stdout: &[u8]) -> (Vec<(String, String)>, &[u8]) {
    let split = find(stdout, b"\r\n\r\n")
        .map(|pos| (pos, pos + 4))
        .or_else(|| find(stdout, b"\n\n").map(|pos| (pos, pos + 2)));

    let Some((head_end, body_start)) = split else {
        return (Vec::new(), stdout);
    };

    let head = String::from_utf8_lossy(&stdout[..head_end]);
    let mut headers = Vec::new();
    for line in head.lines() {
        match line.split_once(':') {
            Some((name, value)) => {
                headers.push((name.trim().to_string(), value.trim().to_string()))
            }
            // not a header block after all
            None => return (Vec::new(), stdout),
        }
    }

    (headers, &stdout[body_start..])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn truncated(err: io::Error) -> io::Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        invalid("connection closed before FCGI_END_REQUEST".into())
    } else {
        err
    }
}

fn invalid(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds the server side of a response: stdout split over several
    /// records, optional stderr, then `FCGI_END_REQUEST`.
    pub(crate) fn encode_response(stdout: &[u8], stderr: &[u8], protocol_status: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        for chunk in stdout.chunks(7) {
            push_record(&mut buf, FCGI_STDOUT, chunk);
        }
        push_record(&mut buf, FCGI_STDOUT, &[]);
        if !stderr.is_empty() {
            push_record(&mut buf, FCGI_STDERR, stderr);
        }
        push_record(&mut buf, FCGI_END_REQUEST, &[0, 0, 0, 0, protocol_status, 0, 0, 0]);
        buf
    }

    /// Parses the params of a request written by `write_request`.
    pub(crate) fn decode_request_params(mut raw: &[u8]) -> Vec<(String, String)> {
        let mut params = Vec::new();
        let mut stream = Vec::new();
        while raw.len() >= FCGI_HEADER_LEN {
            let record_type = raw[1];
            let len = u16::from_be_bytes([raw[4], raw[5]]) as usize;
            let padding = raw[6] as usize;
            let content = &raw[FCGI_HEADER_LEN..FCGI_HEADER_LEN + len];
            if record_type == FCGI_PARAMS {
                stream.extend_from_slice(content);
            }
            raw = &raw[FCGI_HEADER_LEN + len + padding..];
        }

        let mut rest = stream.as_slice();
        while !rest.is_empty() {
            let (name_len, r) = decode_len(rest);
            let (value_len, r) = decode_len(r);
            let name = String::from_utf8(r[..name_len].to_vec()).unwrap();
            let value = String::from_utf8(r[name_len..name_len + value_len].to_vec()).unwrap();
            params.push((name, value));
            rest = &r[name_len + value_len..];
        }
        params
    }

    fn decode_len(raw: &[u8]) -> (usize, &[u8]) {
        if raw[0] & 0x80 == 0 {
            (raw[0] as usize, &raw[1..])
        } else {
            let len = u32::from_be_bytes([raw[0] & 0x7f, raw[1], raw[2], raw[3]]);
            (len as usize, &raw[4..])
        }
    }

    #[test]
    fn test_request_layout() {
        let mut out = Vec::new();
        write_request(&mut out, &[("SCRIPT_FILENAME", "/tmp/opcache.php")]).unwrap();

        // BEGIN_REQUEST: responder role, no keep-alive
        assert_eq!(&out[..8], &[1, FCGI_BEGIN_REQUEST, 0, 1, 0, 8, 0, 0]);
        assert_eq!(&out[8..16], &[0, 1, 0, 0, 0, 0, 0, 0]);

        // ends with empty PARAMS then empty STDIN
        let tail = &out[out.len() - 16..];
        assert_eq!(&tail[..8], &[1, FCGI_PARAMS, 0, 1, 0, 0, 0, 0]);
        assert_eq!(&tail[8..], &[1, FCGI_STDIN, 0, 1, 0, 0, 0, 0]);

        // every record is 8-byte aligned
        assert_eq!(out.len() % 8, 0);

        assert_eq!(
            decode_request_params(&out),
            vec![("SCRIPT_FILENAME".to_string(), "/tmp/opcache.php".to_string())]
        );
    }

    #[test]
    fn test_long_param_uses_four_byte_length() {
        let long_value = "x".repeat(300);
        let mut buf = Vec::new();
        encode_pair(&mut buf, b"SCRIPT_FILENAME", long_value.as_bytes()).unwrap();

        assert_eq!(buf[0], 15);
        assert_eq!(&buf[1..5], &(300u32 | 0x8000_0000).to_be_bytes());
        assert_eq!(buf.len(), 1 + 4 + 15 + 300);
    }

    #[test]
    fn test_params_larger_than_one_record_are_split() {
        let huge = "y".repeat(FCGI_MAX_CONTENT_LEN + 10);
        let mut out = Vec::new();
        write_request(&mut out, &[("SCRIPT_FILENAME", &huge)]).unwrap();

        let params = decode_request_params(&out);
        assert_eq!(params[0].1.len(), huge.len());
    }

    #[test]
    fn test_read_response_splits_headers() {
        let raw = encode_response(
            b"X-Powered-By: PHP/8.3\r\nContent-type: text/html; charset=UTF-8\r\n\r\n{\"a\":1}",
            b"",
            FCGI_REQUEST_COMPLETE,
        );
        let response = read_response(Cursor::new(raw)).unwrap();

        assert_eq!(response.body, b"{\"a\":1}");
        assert_eq!(response.headers.len(), 2);
        assert_eq!(
            response.header("content-type"),
            Some("text/html; charset=UTF-8")
        );
        assert_eq!(response.header("Location"), None);
        assert_eq!(response.status, None);
        assert_eq!(response.app_status, 0);
    }

    #[test]
    fn test_read_response_status_and_stderr() {
        let raw = encode_response(
            b"Status: 404 Not Found\r\nContent-type: text/html\r\n\r\nFile not found.\n",
            b"Primary script unknown",
            FCGI_REQUEST_COMPLETE,
        );
        let response = read_response(Cursor::new(raw)).unwrap();

        assert_eq!(response.status, Some(404));
        assert_eq!(response.body, b"File not found.\n");
        assert_eq!(response.stderr, b"Primary script unknown");
    }

    #[test]
    fn test_read_response_without_headers() {
        let raw = encode_response(b"{\"opcache_enabled\":true}", b"", FCGI_REQUEST_COMPLETE);
        let response = read_response(Cursor::new(raw)).unwrap();
        assert_eq!(response.body, b"{\"opcache_enabled\":true}");
        assert!(response.headers.is_empty());
    }

    #[test]
    fn test_rejected_request() {
        let raw = encode_response(b"", b"", FCGI_OVERLOADED);
        let err = read_response(Cursor::new(raw)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_truncated_stream() {
        let mut raw = encode_response(b"Content-type: text/html\r\n\r\n{}", b"", 0);
        raw.truncate(raw.len() - FCGI_HEADER_LEN - 8);
        let err = read_response(Cursor::new(raw)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("FCGI_END_REQUEST"));
    }

    #[test]
    fn test_bad_version() {
        let mut raw = encode_response(b"{}", b"", 0);
        raw[0] = 2;
        assert!(read_response(Cursor::new(raw)).is_err());
    }

    #[test]
    fn test_management_records_are_skipped() {
        let mut raw = vec![FCGI_VERSION_1, 10, 0, 0, 0, 0, 0, 0];
        raw.extend(encode_response(b"{}", b"", 0));
        let response = read_response(Cursor::new(raw)).unwrap();
        assert_eq!(response.body, b"{}");
    }
}
