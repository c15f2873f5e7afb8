use std::borrow::Cow;
use std::io::{Read, Seek};

use encoding_rs::WINDOWS_1252;

use crate::consts;
use crate::error::Result;
use crate::reader::ByteReader;

/// Reads a file name, returning it with a flag that is false if the name
/// claimed to be UTF-8 but was not.
pub(crate) fn read_null_terminated_string<R: Read + Seek>(
    reader: &mut ByteReader<R>,
    is_utf8: bool,
) -> Result<(String, bool)> {
    let bytes = reader.read_cstr(consts::MAX_STRING_SIZE)?;
    Ok(decode_name(bytes, is_utf8))
}

/// Names flagged as UTF are decoded as UTF-8; all others as Windows-1252,
/// independent of the host locale.  Invalid UTF-8 is decoded lossily (as
/// U+FFFD) and reported through the returned flag.
pub(crate) fn decode_name(bytes: Vec<u8>, is_utf8: bool) -> (String, bool) {
    if is_utf8 || bytes.is_ascii() {
        // ASCII is identical in both encodings.
        return match String::from_utf8(bytes) {
            Ok(text) => (text, true),
            Err(err) => (String::from_utf8_lossy(err.as_bytes()).into_owned(), false),
        };
    }
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(&bytes);
    match text {
        Cow::Borrowed(text) => (text.to_string(), true),
        Cow::Owned(text) => (text, true),
    }
}
