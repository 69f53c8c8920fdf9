/// Writes a value into an outgoing frame.
pub trait Serialize<'a> {
    /// Appends the owned part of the frame into `buf`.
    ///
    /// # Returns
    /// A borrowed tail that should be written right after `buf` without copying, if any.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
