use std::io;

/// Types that can be decoded from the body of a single frame.
pub trait Deserialize<'a>: Sized {
    /// Decodes an instance borrowing from `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame body, starting at a 4 byte aligned address.
    ///
    /// # Returns
    /// The decoded value or an `io::Error` of kind `InvalidData`.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
