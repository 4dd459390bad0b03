//! Clipboard data model
//!
//! The boundary between the screen and whatever holds clipboard content.
//! A [`Clipboard`] is opened at a timestamp, optionally emptied (which takes
//! ownership), filled one format at a time and closed again.

use std::collections::BTreeMap;

use x11rb::protocol::xproto::Timestamp;

/// Formats carried across the clipboard boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ClipboardFormat {
    /// UTF-8 text
    Text,
    /// UTF-8 HTML fragment
    Html,
}

impl ClipboardFormat {
    /// Every format, in conversion order
    pub const ALL: [ClipboardFormat; 2] = [ClipboardFormat::Text, ClipboardFormat::Html];
}

/// A clipboard that can be read and written in open/close transactions
pub trait Clipboard {
    /// Open for reading or writing as of `time`. Fails if already open.
    fn open(&mut self, time: Timestamp) -> bool;

    /// End the transaction
    fn close(&mut self);

    /// Take ownership and drop all content. Requires `open`.
    fn empty(&mut self) -> bool;

    /// Store `data` for `format`. Requires a successful `empty` first.
    fn add(&mut self, format: ClipboardFormat, data: Vec<u8>);

    /// Whether content exists for `format`
    fn has(&self, format: ClipboardFormat) -> bool;

    /// Content for `format`
    fn get(&self, format: ClipboardFormat) -> Option<Vec<u8>>;

    /// Time the content was last replaced
    fn time(&self) -> Timestamp;
}

/// Copy every format of `src` into `dst`, replacing its content
///
/// Opens `src`, then `dst`, empties `dst` and adds each format `src` has.
/// Returns false if either side cannot be opened.
pub fn copy<D, S>(dst: &mut D, src: &mut S, time: Timestamp) -> bool
where
    D: Clipboard + ?Sized,
    S: Clipboard + ?Sized,
{
    if !src.open(time) {
        return false;
    }

    let mut success = false;
    if dst.open(time) {
        if dst.empty() {
            for format in ClipboardFormat::ALL {
                if let Some(data) = src.get(format) {
                    dst.add(format, data);
                }
            }
            success = true;
        }
        dst.close();
    }
    src.close();

    success
}

/// Plain in-process clipboard
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    open: bool,
    owned: bool,
    time: Timestamp,
    data: BTreeMap<ClipboardFormat, Vec<u8>>,
}

impl MemoryClipboard {
    /// Empty, closed clipboard
    pub fn new() -> Self {
        Self::default()
    }

    /// Clipboard already holding `text`
    pub fn with_text(text: &str) -> Self {
        let mut data = BTreeMap::new();
        data.insert(ClipboardFormat::Text, text.as_bytes().to_vec());
        Self {
            data,
            ..Self::default()
        }
    }

    /// Text content as a string, if present and valid UTF-8
    pub fn text(&self) -> Option<String> {
        self.data
            .get(&ClipboardFormat::Text)
            .and_then(|bytes| String::from_utf8(bytes.clone()).ok())
    }

    /// True when no format holds data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Formats currently held
    pub fn formats(&self) -> Vec<ClipboardFormat> {
        self.data.keys().copied().collect()
    }
}

impl Clipboard for MemoryClipboard {
    fn open(&mut self, time: Timestamp) -> bool {
        if self.open {
            return false;
        }
        self.open = true;
        self.owned = false;
        self.time = time;
        true
    }

    fn close(&mut self) {
        self.open = false;
        self.owned = false;
    }

    fn empty(&mut self) -> bool {
        if !self.open {
            return false;
        }
        self.data.clear();
        self.owned = true;
        true
    }

    fn add(&mut self, format: ClipboardFormat, data: Vec<u8>) {
        if self.open && self.owned {
            self.data.insert(format, data);
        }
    }

    fn has(&self, format: ClipboardFormat) -> bool {
        self.data.contains_key(&format)
    }

    fn get(&self, format: ClipboardFormat) -> Option<Vec<u8>> {
        self.data.get(&format).cloned()
    }

    fn time(&self) -> Timestamp {
        self.time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clipboard_transaction() {
        let mut clipboard = MemoryClipboard::new();
        assert!(!clipboard.empty(), "empty requires open");

        assert!(clipboard.open(5));
        assert!(!clipboard.open(6), "double open fails");
        assert!(clipboard.empty());
        clipboard.add(ClipboardFormat::Text, b"hello".to_vec());
        clipboard.close();

        assert_eq!(clipboard.text().as_deref(), Some("hello"));
        assert_eq!(clipboard.time(), 5);
    }

    #[test]
    fn test_add_without_empty_is_ignored() {
        let mut clipboard = MemoryClipboard::new();
        clipboard.open(1);
        clipboard.add(ClipboardFormat::Html, b"<b>x</b>".to_vec());
        clipboard.close();
        assert!(!clipboard.has(ClipboardFormat::Html));
    }

    #[test]
    fn test_copy_replaces_destination() {
        let mut src = MemoryClipboard::with_text("from source");
        let mut dst = MemoryClipboard::new();
        dst.open(1);
        dst.empty();
        dst.add(ClipboardFormat::Html, b"<i>stale</i>".to_vec());
        dst.close();

        assert!(copy(&mut dst, &mut src, 42));
        assert_eq!(dst.text().as_deref(), Some("from source"));
        assert!(!dst.has(ClipboardFormat::Html));
        assert_eq!(dst.formats(), vec![ClipboardFormat::Text]);
    }

    #[test]
    fn test_copy_fails_when_source_busy() {
        let mut src = MemoryClipboard::with_text("x");
        src.open(1);
        let mut dst = MemoryClipboard::new();
        assert!(!copy(&mut dst, &mut src, 2));
        assert!(dst.is_empty());
    }

    #[test]
    fn test_copy_through_trait_objects() {
        let mut src = MemoryClipboard::with_text("dyn");
        let mut dst = MemoryClipboard::new();
        let src_dyn: &mut dyn Clipboard = &mut src;
        let dst_dyn: &mut dyn Clipboard = &mut dst;
        assert!(copy(dst_dyn, src_dyn, 3));
        assert_eq!(dst.text().as_deref(), Some("dyn"));
    }
}
