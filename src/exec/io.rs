// src/exec/io.rs

//! Where each container's output goes.

use crate::types::OutputStyle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Write straight to this process's stdout/stderr.
    Inherit,
    /// Write line by line, each line prefixed with the container name.
    Prefixed(String),
    Discard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIoStreaming {
    pub output: OutputTarget,
    pub attach_stdin: bool,
}

impl ContainerIoStreaming {
    pub fn discard() -> Self {
        Self {
            output: OutputTarget::Discard,
            attach_stdin: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStreamingOptions {
    style: OutputStyle,
}

impl IoStreamingOptions {
    pub fn new(style: OutputStyle) -> Self {
        Self { style }
    }

    pub fn for_container(&self, container: &str, is_main: bool) -> ContainerIoStreaming {
        match (self.style, is_main) {
            (OutputStyle::All, _) => ContainerIoStreaming {
                output: OutputTarget::Prefixed(container.to_string()),
                attach_stdin: false,
            },
            (_, true) => ContainerIoStreaming {
                output: OutputTarget::Inherit,
                attach_stdin: true,
            },
            (_, false) => ContainerIoStreaming::discard(),
        }
    }
}
