//! # Console Sink
//!
//! The user-visible output channel and the keyboard.

/// Console abstraction
pub trait Console: Send + Sync {
    /// Write raw bytes, in one piece
    fn write_bytes(&self, bytes: &[u8]);

    /// Write a string
    fn write_str(&self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Next keyboard byte, blocking until one is available
    fn read_byte(&self) -> u8;
}
