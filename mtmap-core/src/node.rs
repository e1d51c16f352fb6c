use crate::coordinates::Pos;
use serde::{Deserialize, Serialize};

pub const AIR: &str = "air";
pub const IGNORE: &str = "ignore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub itemstring: String,
    pub param1: u8,
    pub param2: u8,
    pub pos: Pos,
}

impl Node {
    pub fn new(itemstring: impl Into<String>) -> Self {
        Self::with_params(itemstring, 0, 0)
    }

    pub fn with_params(itemstring: impl Into<String>, param1: u8, param2: u8) -> Self {
        Self {
            itemstring: itemstring.into(),
            param1,
            param2,
            pos: Pos::ORIGIN,
        }
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    pub fn air() -> Self {
        Self::new(AIR)
    }

    pub fn ignore() -> Self {
        Self::new(IGNORE)
    }

    pub fn name(&self) -> &str {
        &self.itemstring
    }

    pub fn is_ignore(&self) -> bool {
        self.itemstring == IGNORE
    }

    /// Same content and params, regardless of position.
    pub fn same_content(&self, other: &Node) -> bool {
        self.itemstring == other.itemstring
            && self.param1 == other.param1
            && self.param2 == other.param2
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::ignore()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeTimerRef {
    pub pos: Pos,
    /// Seconds.
    pub timeout: f64,
    /// Seconds.
    pub elapsed: f64,
    pub active: bool,
}

impl NodeTimerRef {
    pub fn new(pos: Pos, timeout: f64, elapsed: f64) -> Self {
        Self {
            pos,
            timeout,
            elapsed,
            active: false,
        }
    }

    pub fn set(&mut self, timeout: f64, elapsed: f64) {
        self.timeout = timeout;
        self.elapsed = elapsed;
    }

    pub fn start(&mut self, timeout: f64) {
        self.set(timeout, 0.0);
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn is_started(&self) -> bool {
        self.active
    }
}
