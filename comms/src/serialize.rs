/// Types that can be written into a frame.
///
/// Implementors write their header (and any owned encoding) into `buf` and may return a
/// borrowed slice that is written right after it, avoiding a copy of large payloads.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
