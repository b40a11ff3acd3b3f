//! Layout, section and stack state for one render
//!
//! Output goes to the innermost open sink. Opening a section or push region
//! makes a fresh sink current; closing it takes the captured text and hands
//! it to the section table or the stack, making the enclosing sink current
//! again.

use std::collections::HashMap;

use tracing::trace;

use super::error::RenderError;
use crate::value::Context;

/// Parent layout declared by `@extends`
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRequest {
    pub id: String,
    pub data: Context,
}

#[derive(Debug, Clone, PartialEq)]
enum SinkKind {
    Document,
    Section(String),
    Push(String),
}

#[derive(Debug)]
struct Sink {
    kind: SinkKind,
    buffer: String,
}

#[derive(Debug, Default)]
pub struct RenderState {
    sections: HashMap<String, String>,
    stacks: HashMap<String, Vec<String>>,
    sinks: Vec<Sink>,
    layout: Option<LayoutRequest>,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start capturing the output of one template
    pub fn begin_document(&mut self) {
        self.sinks.push(Sink {
            kind: SinkKind::Document,
            buffer: String::new(),
        });
    }

    /// Finish the current document and return its output
    ///
    /// Fails when a section or push region is still open.
    pub fn finish_document(&mut self) -> Result<String, RenderError> {
        match self.sinks.pop() {
            Some(Sink {
                kind: SinkKind::Document,
                buffer,
            }) => Ok(buffer),
            Some(Sink {
                kind: SinkKind::Section(name),
                ..
            }) => Err(RenderError::section(format!(
                "section `{}` is still open at the end of the template",
                name
            ))),
            Some(Sink {
                kind: SinkKind::Push(name),
                ..
            }) => Err(RenderError::section(format!(
                "push to `{}` is still open at the end of the template",
                name
            ))),
            None => Err(RenderError::section("no document is being rendered")),
        }
    }

    /// Append text to the current sink
    pub fn write(&mut self, text: &str) {
        if let Some(sink) = self.sinks.last_mut() {
            sink.buffer.push_str(text);
        }
    }

    pub fn open_section_name(&self) -> Option<&str> {
        self.sinks.iter().rev().find_map(|sink| match &sink.kind {
            SinkKind::Section(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn open_section(&mut self, name: &str) -> Result<(), RenderError> {
        if let Some(open) = self.open_section_name() {
            return Err(RenderError::section(format!(
                "cannot open section `{}` while `{}` is open",
                name, open
            )));
        }
        trace!(section = name, "open section");
        self.sinks.push(Sink {
            kind: SinkKind::Section(name.to_string()),
            buffer: String::new(),
        });
        Ok(())
    }

    pub fn close_section(&mut self) -> Result<(), RenderError> {
        match self.sinks.last() {
            Some(Sink {
                kind: SinkKind::Section(_),
                ..
            }) => {}
            _ => return Err(RenderError::section("no section is open")),
        }
        if let Some(Sink {
            kind: SinkKind::Section(name),
            buffer,
        }) = self.sinks.pop()
        {
            trace!(section = %name, bytes = buffer.len(), "close section");
            self.sections.insert(name, buffer);
        }
        Ok(())
    }

    /// Inline `@section('name', content)`; fails while another section is open
    pub fn define_section(&mut self, name: &str, content: String) -> Result<(), RenderError> {
        if let Some(open) = self.open_section_name() {
            return Err(RenderError::section(format!(
                "cannot define section `{}` while `{}` is open",
                name, open
            )));
        }
        self.sections.insert(name.to_string(), content);
        Ok(())
    }

    pub fn open_push(&mut self, name: &str) {
        trace!(stack = name, "open push");
        self.sinks.push(Sink {
            kind: SinkKind::Push(name.to_string()),
            buffer: String::new(),
        });
    }

    /// Close the most recently opened push region
    pub fn close_push(&mut self) -> Result<(), RenderError> {
        match self.sinks.last() {
            Some(Sink {
                kind: SinkKind::Push(_),
                ..
            }) => {}
            _ => return Err(RenderError::section("no push region is open")),
        }
        if let Some(Sink {
            kind: SinkKind::Push(name),
            buffer,
        }) = self.sinks.pop()
        {
            self.push_content(&name, buffer);
        }
        Ok(())
    }

    pub fn push_content(&mut self, name: &str, content: String) {
        trace!(stack = name, bytes = content.len(), "push");
        self.stacks.entry(name.to_string()).or_default().push(content);
    }

    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections.get(name).map(String::as_str)
    }

    /// All fragments pushed to `name`, in push order
    pub fn stack(&self, name: &str) -> Option<String> {
        self.stacks.get(name).map(|fragments| fragments.concat())
    }

    pub fn set_layout(&mut self, id: impl Into<String>, data: Context) {
        self.layout = Some(LayoutRequest {
            id: id.into(),
            data,
        });
    }

    pub fn take_layout(&mut self) -> Option<LayoutRequest> {
        self.layout.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_section_capture_swaps_sink() {
        let mut state = RenderState::new();
        state.begin_document();
        state.write("a");
        state.open_section("title").unwrap();
        state.write("captured");
        state.close_section().unwrap();
        state.write("b");

        assert_eq!(state.finish_document().unwrap(), "ab");
        assert_eq!(state.section("title"), Some("captured"));
    }

    #[test]
    fn test_sections_are_last_write_wins() {
        let mut state = RenderState::new();
        state.define_section("t", "one".to_string()).unwrap();
        state.define_section("t", "two".to_string()).unwrap();
        assert_eq!(state.section("t"), Some("two"));
    }

    #[test]
    fn test_one_open_section_at_a_time() {
        let mut state = RenderState::new();
        state.begin_document();
        state.open_section("a").unwrap();
        assert!(matches!(
            state.open_section("b"),
            Err(RenderError::SectionState { .. })
        ));
        assert!(state.define_section("c", String::new()).is_err());
    }

    #[test]
    fn test_close_without_open() {
        let mut state = RenderState::new();
        state.begin_document();
        assert!(state.close_section().is_err());
        assert!(state.close_push().is_err());
    }

    #[test]
    fn test_nested_pushes_close_innermost_first() {
        let mut state = RenderState::new();
        state.begin_document();
        state.open_push("outer");
        state.write("A");
        state.open_push("inner");
        state.write("B");
        state.close_push().unwrap();
        state.write("C");
        state.close_push().unwrap();
        state.push_content("outer", "D".to_string());

        assert_eq!(state.stack("inner").as_deref(), Some("B"));
        assert_eq!(state.stack("outer").as_deref(), Some("ACD"));
        assert_eq!(state.stack("missing"), None);
    }

    #[test]
    fn test_open_region_fails_document() {
        let mut state = RenderState::new();
        state.begin_document();
        state.open_push("js");
        assert!(matches!(
            state.finish_document(),
            Err(RenderError::SectionState { .. })
        ));
    }

    #[test]
    fn test_layout_is_taken_once() {
        let mut state = RenderState::new();
        state.set_layout("base", Context::new());
        assert_eq!(state.take_layout().map(|l| l.id), Some("base".to_string()));
        assert_eq!(state.take_layout(), None);
    }
}
