use crate::value::{Context, Value};

/// Variable frames of one template execution, innermost last
#[derive(Debug, Clone, Default)]
pub struct Scope {
    frames: Vec<Context>,
}

impl Scope {
    pub fn new(root: Context) -> Self {
        Self { frames: vec![root] }
    }

    pub fn push(&mut self) {
        self.frames.push(Context::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Bind in the innermost frame
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// `@set`: update the visible binding, or create one for the rest of the template
    pub fn set(&mut self, name: &str, value: Value) {
        match self
            .frames
            .iter_mut()
            .rev()
            .find_map(|frame| frame.get_mut(name))
        {
            Some(slot) => *slot = value,
            None => self.bind_root(name, value),
        }
    }

    fn bind_root(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.first_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    /// Every visible variable, inner bindings shadowing outer ones
    pub fn visible(&self) -> Context {
        let mut all = Context::new();
        for frame in &self.frames {
            for (name, value) in frame {
                all.insert(name.clone(), value.clone());
            }
        }
        all
    }
}
