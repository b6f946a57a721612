//! Control wire format.
//!
//! ```text
//! Request:  <target_ip> <target_port> <connections> <duration_s> <timeout_s> <message_size>\n
//! Response: <round_trips> <bucket_0> ... <bucket_29>
//! ```
//!
//! A request ends at the first `\n` or NUL byte, or at EOF. Malformed
//! requests get no response; the connection is just closed.

use crate::error::{Error, Result};
use crate::loadgen::TestParameters;
use std::io::{self, Read};

/// Default receive buffer for one request.
pub const REQUEST_CAPACITY: usize = 1024;

const FIELDS: usize = 6;

fn is_terminator(b: u8) -> bool {
    b == b'\n' || b == 0
}

/// Read one request of at most `capacity` bytes (terminator excluded).
pub fn read_request<R: Read>(conn: &mut R, capacity: usize) -> Result<String> {
    // One spare byte: a request that fills it is too large.
    let mut buf = vec![0u8; capacity + 1];
    let mut filled = 0;

    let end = loop {
        if filled == buf.len() {
            return Err(Error::MessageTooLarge { capacity });
        }
        let n = match conn.read(&mut buf[filled..]) {
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break filled;
        }
        if let Some(pos) = buf[filled..filled + n].iter().position(|&b| is_terminator(b)) {
            break filled + pos;
        }
        filled += n;
    };

    String::from_utf8(buf[..end].to_vec())
        .map_err(|_| Error::Parse("request is not valid UTF-8".into()))
}

/// Parse and validate the six request fields.
pub fn parse_request(text: &str) -> Result<TestParameters> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() != FIELDS {
        return Err(Error::Parse(format!(
            "expected {FIELDS} fields, got {} in '{}'",
            fields.len(),
            text.trim()
        )));
    }

    fn num<T: std::str::FromStr>(name: &str, field: &str) -> Result<T> {
        field
            .parse()
            .map_err(|_| Error::Parse(format!("invalid {name} '{field}'")))
    }

    let params = TestParameters {
        target_ip: fields[0].to_string(),
        target_port: num("target port", fields[1])?,
        connections: num("connection count", fields[2])?,
        duration_secs: num("run duration", fields[3])?,
        timeout_secs: num("timeout", fields[4])?,
        message_size: num("message size", fields[5])?,
    };
    params.validate()?;
    Ok(params)
}

/// Render a request line, newline-terminated.
pub fn format_request(params: &TestParameters) -> String {
    format!(
        "{} {} {} {} {} {}\n",
        params.target_ip,
        params.target_port,
        params.connections,
        params.duration_secs,
        params.timeout_secs,
        params.message_size
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_request() {
        let params = parse_request("127.0.0.1 9000 4 1 5 64").unwrap();
        assert_eq!(params.target_ip, "127.0.0.1");
        assert_eq!(params.target_port, 9000);
        assert_eq!(params.connections, 4);
        assert_eq!(params.duration_secs, 1);
        assert_eq!(params.timeout_secs, 5);
        assert_eq!(params.message_size, 64);

        assert_eq!(parse_request(&format_request(&params)).unwrap(), params);
    }

    #[test]
    fn test_field_count_mismatch() {
        assert!(matches!(
            parse_request("127.0.0.1 9000 4 1 5"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            parse_request("127.0.0.1 9000 4 1 5 64 7"),
            Err(Error::Parse(_))
        ));
        assert!(matches!(parse_request(""), Err(Error::Parse(_))));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(parse_request("127.0.0.1 port 4 1 5 64").is_err());
        assert!(parse_request("127.0.0.1 70000 4 1 5 64").is_err());
        assert!(parse_request("127.0.0.1 9000 -4 1 5 64").is_err());
        assert!(parse_request("127.0.0.1 9000 0 1 5 64").is_err());
    }

    #[test]
    fn test_read_request_terminators() {
        let mut input = Cursor::new(b"10.0.0.1 80 1 1 1 8\nrest".to_vec());
        assert_eq!(
            read_request(&mut input, REQUEST_CAPACITY).unwrap(),
            "10.0.0.1 80 1 1 1 8"
        );

        let mut input = Cursor::new(b"10.0.0.1 80 1 1 1 8\0".to_vec());
        assert_eq!(
            read_request(&mut input, REQUEST_CAPACITY).unwrap(),
            "10.0.0.1 80 1 1 1 8"
        );

        let mut input = Cursor::new(b"10.0.0.1 80 1 1 1 8".to_vec());
        assert_eq!(
            read_request(&mut input, REQUEST_CAPACITY).unwrap(),
            "10.0.0.1 80 1 1 1 8"
        );
    }

    #[test]
    fn test_read_request_too_large() {
        let mut input = Cursor::new(vec![b'1'; 17]);
        assert!(matches!(
            read_request(&mut input, 16),
            Err(Error::MessageTooLarge { capacity: 16 })
        ));

        // Exactly at capacity is fine.
        let mut input = Cursor::new(vec![b'1'; 16]);
        assert_eq!(read_request(&mut input, 16).unwrap().len(), 16);
    }
}
