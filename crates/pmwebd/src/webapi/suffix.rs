//! LIFO record of open JSON containers.
//!
//! Depth always equals the number of containers opened, and not yet closed,
//! in bytes already handed to the client.

/// Kind of an open container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// `{`.
    Object,
    /// `[`.
    Array,
}

impl Container {
    const fn closer(self) -> char {
        match self {
            Self::Object => '}',
            Self::Array => ']',
        }
    }
}

/// Stack of open containers.
#[derive(Debug, Default)]
pub struct SuffixStack {
    open: Vec<Container>,
    ever_opened: bool,
}

impl SuffixStack {
    /// Records a container just opened in the output.
    pub fn push(&mut self, container: Container) {
        self.open.push(container);
        self.ever_opened = true;
    }

    /// Number of open containers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Whether any container was opened during the request.
    #[must_use]
    pub const fn ever_opened(&self) -> bool {
        self.ever_opened
    }

    /// Appends closers to `out` until only `depth` containers remain open.
    pub fn close_to(&mut self, depth: usize, out: &mut String) {
        while self.open.len() > depth {
            if let Some(container) = self.open.pop() {
                out.push(container.closer());
            }
        }
    }

    /// Closes every open container, returning the closers in LIFO order.
    pub fn drain(&mut self) -> String {
        let mut out = String::with_capacity(self.open.len());
        self.close_to(0, &mut out);
        out
    }
}
