//! Collaborators the kernel core talks to but does not implement: program
//! storage and the display/keyboard pair.

use crate::image;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use stdlib::Program;

/// Where program images come from.
pub trait ProgramStore: Send {
    /// Copy the image called `name` into `buf` and return its length.
    ///
    /// `None` if there is no such image or it does not fit into `buf`.
    fn load(&mut self, name: &str, buf: &mut [u8]) -> Option<usize>;

    /// Opaque token of the current directory.
    fn current_dir(&self) -> u32;

    fn set_current_dir(&mut self, dir: u32);
}

/// Text output and keyboard input.
pub trait Console: Send {
    fn write(&mut self, bytes: &[u8]);

    /// Switch the display back to text mode after a program may have
    /// changed it.
    fn restore_text_mode(&mut self);

    /// Next buffered key, if any.
    fn poll_input(&mut self) -> Option<u8>;
}

/// A flat directory of images held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    files: BTreeMap<String, Vec<u8>>,
    cwd: u32,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw file contents under `name`.
    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(name.into(), bytes);
    }

    /// Store the image of `program` under its own name.
    ///
    /// # Errors
    /// The program's name or data cannot be expressed as an image.
    pub fn install(&mut self, program: &Program) -> Result<(), image::ImageError> {
        let bytes = image::encode(program.name, program.data)?;
        self.insert(program.name, bytes);
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }
}

impl ProgramStore for MemoryStore {
    fn load(&mut self, name: &str, buf: &mut [u8]) -> Option<usize> {
        let file = self.files.get(name)?;
        let target = buf.get_mut(..file.len())?;
        target.copy_from_slice(file);
        Some(file.len())
    }

    fn current_dir(&self) -> u32 {
        self.cwd
    }

    fn set_current_dir(&mut self, dir: u32) {
        self.cwd = dir;
    }
}

#[derive(Debug, Default)]
struct Captured {
    output: Vec<u8>,
    input: VecDeque<u8>,
    text_mode_restores: usize,
}

/// A console that records everything written to it and replays scripted
/// input. Clones share the same buffers.
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    inner: Arc<Mutex<Captured>>,
}

impl BufferConsole {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Captured> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.inner().output).into_owned()
    }

    #[must_use]
    pub fn output(&self) -> Vec<u8> {
        self.inner().output.clone()
    }

    /// Queue keystrokes for `poll_input`.
    pub fn push_input(&self, bytes: &[u8]) {
        self.inner().input.extend(bytes);
    }

    #[must_use]
    pub fn text_mode_restores(&self) -> usize {
        self.inner().text_mode_restores
    }
}

impl Console for BufferConsole {
    fn write(&mut self, bytes: &[u8]) {
        self.inner().output.extend_from_slice(bytes);
    }

    fn restore_text_mode(&mut self) {
        self.inner().text_mode_restores += 1;
    }

    fn poll_input(&mut self) -> Option<u8> {
        self.inner().input.pop_front()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn images_that_do_not_fit_are_not_loaded() {
        let mut store = MemoryStore::new();
        store.insert("big", vec![7; 100]);

        let mut small = [0u8; 64];
        assert_eq!(store.load("big", &mut small), None);
        assert_eq!(store.load("missing", &mut small), None);

        let mut large = [0u8; 128];
        assert_eq!(store.load("big", &mut large), Some(100));
        assert_eq!(large[99], 7);
        assert_eq!(large[100], 0);
    }

    #[test]
    fn console_clones_share_buffers() {
        let console = BufferConsole::new();
        let mut handle: Box<dyn Console> = Box::new(console.clone());
        console.push_input(b"ab");

        handle.write(b"hi\n");
        handle.restore_text_mode();
        assert_eq!(handle.poll_input(), Some(b'a'));
        assert_eq!(handle.poll_input(), Some(b'b'));
        assert_eq!(handle.poll_input(), None);

        assert_eq!(console.output_string(), "hi\n");
        assert_eq!(console.text_mode_restores(), 1);
    }
}
