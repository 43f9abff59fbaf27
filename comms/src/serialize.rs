/// Writes a value into an outgoing frame.
pub trait Serialize<'a> {
    /// Appends the owned part of the frame to `buf`.
    ///
    /// # Returns
    /// Optionally a borrowed slice that is written right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
