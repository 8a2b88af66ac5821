//! Debug information for mapping emitted code back to source positions.

use crate::ssa::Pos;

/// A line table entry: the first op index a position applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct LineEntry {
    pub pc: u32,
    pub pos: Pos,
}

/// Positions of the ops in one code block.
///
/// Only changes are recorded; an op inherits the nearest preceding entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineTable {
    pub entries: Vec<LineEntry>,
}

impl LineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the position of the op at `pc`, skipping repeats.
    pub fn add(&mut self, pc: usize, pos: Pos) {
        if self.entries.last().is_some_and(|e| e.pos == pos) {
            return;
        }
        self.entries.push(LineEntry { pc: pc as u32, pos });
    }

    /// Find the source position for an op index.
    pub fn find_location(&self, pc: usize) -> Option<Pos> {
        let pc = pc as u32;
        // Entries are in ascending pc order.
        let idx = self.entries.partition_point(|e| e.pc <= pc);
        idx.checked_sub(1).map(|i| self.entries[i].pos)
    }

    /// Position of the block entry, if known.
    pub fn first(&self) -> Option<Pos> {
        self.entries.first().map(|e| e.pos)
    }
}

/// One line of a goroutine dump.
#[derive(Debug, Clone)]
pub struct FrameInfo {
    pub function: String,
    pub next: i32,
    pub position: Option<String>,
    pub deferred: bool,
}

/// Render a goroutine's frames, innermost first.
pub fn format_goroutine(id: u32, state: &str, frames: &[FrameInfo]) -> String {
    let mut out = format!("goroutine {} [{}]:\n", id, state);
    for frame in frames.iter().rev() {
        out.push_str(&format!("{}(...)", frame.function));
        if frame.deferred {
            out.push_str(" [deferred]");
        }
        out.push('\n');
        match &frame.position {
            Some(pos) => out.push_str(&format!("\t{} (block {})\n", pos, frame.next)),
            None => out.push_str(&format!("\t<unknown> (block {})\n", frame.next)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, column: u32) -> Pos {
        Pos {
            file: 0,
            line,
            column,
        }
    }

    #[test]
    fn test_line_table() {
        let mut table = LineTable::new();
        table.add(0, pos(1, 1));
        table.add(2, pos(1, 1));
        table.add(5, pos(2, 5));
        table.add(10, pos(3, 1));

        assert_eq!(table.entries.len(), 3);
        assert_eq!(table.find_location(0), Some(pos(1, 1)));
        assert_eq!(table.find_location(3), Some(pos(1, 1)));
        assert_eq!(table.find_location(7), Some(pos(2, 5)));
        assert_eq!(table.find_location(100), Some(pos(3, 1)));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(LineTable::new().find_location(0), None);
    }

    #[test]
    fn test_format_goroutine_innermost_first() {
        let frames = vec![
            FrameInfo {
                function: "main".to_string(),
                next: 2,
                position: Some("main.go:10:2".to_string()),
                deferred: false,
            },
            FrameInfo {
                function: "helper".to_string(),
                next: -1,
                position: None,
                deferred: true,
            },
        ];
        let text = format_goroutine(1, "running", &frames);
        let helper = text.find("helper").unwrap();
        let main = text.find("main(").unwrap();
        assert!(helper < main);
        assert!(text.starts_with("goroutine 1 [running]:"));
        assert!(text.contains("\tmain.go:10:2 (block 2)"));
    }
}
