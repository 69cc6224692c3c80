use std::io;

/// Types that can be written as the body of a single frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// The prefix already present in `buf` must have a length multiple of four, the
    /// frame body alignment depends on it.
    ///
    /// # Arguments
    /// * `buf` - The buffer where the header and any copied section are written.
    ///
    /// # Returns
    /// An optional trailing slice that should be sent as is, without copying, or an
    /// `io::Error` if the message couldn't be encoded.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
