//! The fixed reply sent to every client.

use std::io::{self, Write};

/// Status line and the empty line ending the header section
pub const STATUS_LINE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\n";

/// Reply body
pub const BODY: &[u8] = b"Hello!\r\n";

/// Write the reply to `writer`.
///
/// The body is only attempted once the status line went out.
pub fn write_reply<W: Write>(writer: &mut W) -> io::Result<()> {
    writer.write_all(STATUS_LINE)?;
    writer.write_all(BODY)?;
    writer.flush()
}
