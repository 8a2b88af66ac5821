//! Splits lowered blocks at suspension points and checks the result.
//!
//! Each function gets one resumption space: the real blocks `0..n` of the
//! SSA function followed by synthetic blocks `-1, -2, ...` in the order
//! they were opened. A synthetic block is either the continuation after a
//! call or panic (it starts by consuming the callee's result) or a retry
//! block that starts with an op that may have to wait.

use super::error::CompileError;
use crate::ssa::Pos;
use crate::vm::{CodeBlock, Edge, FrameKind, Function, LineTable, Op};

#[derive(Debug)]
pub struct Splitter {
    real: Vec<Option<CodeBlock>>,
    synthetic: Vec<Option<CodeBlock>>,
    current: Option<CodeBlock>,
}

fn open(id: i32) -> CodeBlock {
    CodeBlock {
        id,
        code: Vec::new(),
        lines: LineTable::new(),
    }
}

impl Splitter {
    pub fn new(num_real: usize) -> Self {
        Self {
            real: vec![None; num_real],
            synthetic: Vec::new(),
            current: None,
        }
    }

    fn close(&mut self) {
        let Some(block) = self.current.take() else {
            return;
        };
        if block.id >= 0 {
            if let Some(slot) = self.real.get_mut(block.id as usize) {
                *slot = Some(block);
            }
        } else {
            let k = (-(block.id as i64) - 1) as usize;
            if let Some(slot) = self.synthetic.get_mut(k) {
                *slot = Some(block);
            }
        }
    }

    /// Start lowering real block `index`.
    pub fn begin(&mut self, index: usize) {
        self.close();
        self.current = Some(open(index as i32));
    }

    pub fn current_id(&self) -> i32 {
        self.current.as_ref().map_or(0, |b| b.id)
    }

    pub fn push(&mut self, op: Op, pos: Option<Pos>) {
        if let Some(block) = self.current.as_mut() {
            if let Some(pos) = pos {
                block.lines.add(block.code.len(), pos);
            }
            block.code.push(op);
        }
    }

    /// Whether nothing has been emitted into the current block yet.
    pub fn at_start(&self) -> bool {
        self.current.as_ref().map_or(true, |b| b.code.is_empty())
    }

    /// Reserve the next synthetic block id.
    pub fn fresh(&mut self) -> i32 {
        self.synthetic.push(None);
        -(self.synthetic.len() as i32)
    }

    /// Close the current block and continue emitting into synthetic block `id`.
    pub fn resume_at(&mut self, id: i32) {
        self.close();
        self.current = Some(open(id));
    }

    /// Make sure the next op starts a block, so a blocked step can repeat it
    /// without repeating earlier side effects.
    pub fn retry_point(&mut self, pos: Option<Pos>) {
        if self.at_start() {
            return;
        }
        let k = self.fresh();
        self.push(Op::Jump(Edge::to(k)), pos);
        self.resume_at(k);
    }

    pub fn num_synthetic(&self) -> usize {
        self.synthetic.len()
    }

    /// Real blocks in order, then synthetic blocks. A block that was never
    /// emitted comes back empty and fails validation.
    pub fn finish(mut self) -> (Vec<CodeBlock>, usize) {
        self.close();
        let num_real = self.real.len();
        let real = self
            .real
            .into_iter()
            .enumerate()
            .map(|(i, b)| b.unwrap_or_else(|| open(i as i32)));
        let synthetic = self
            .synthetic
            .into_iter()
            .enumerate()
            .map(|(k, b)| b.unwrap_or_else(|| open(-(k as i32) - 1)));
        (real.chain(synthetic).collect(), num_real)
    }
}

fn bad(func: &Function, detail: String) -> CompileError {
    CompileError::BadContinuation {
        func: func.name.clone(),
        detail,
    }
}

/// Check that every block of `func` is well formed: one terminator, at the
/// end; retry ops only first; every target inside the resumption space.
pub fn validate(func: &Function) -> Result<(), CompileError> {
    for (index, block) in func.blocks.iter().enumerate() {
        if func.block_index(block.id) != Some(index) {
            return Err(bad(func, format!("block {} is out of order", block.id)));
        }
        let Some(last) = block.code.last() else {
            return Err(bad(func, format!("block {} is empty", block.id)));
        };
        if !last.is_terminator() {
            return Err(bad(func, format!("block {} has no terminator", block.id)));
        }
        for (pc, op) in block.code.iter().enumerate() {
            if pc + 1 < block.code.len() && op.is_terminator() {
                return Err(bad(
                    func,
                    format!("block {} has a terminator before its end", block.id),
                ));
            }
            if op.is_retry() && pc != 0 {
                return Err(bad(
                    func,
                    format!("waiting op at {} of block {} does not start it", pc, block.id),
                ));
            }
            if func.kind == FrameKind::Plain
                && (op.is_retry() || matches!(op, Op::Call { .. } | Op::Panic { resume: Some(_), .. }))
            {
                return Err(bad(
                    func,
                    format!("suspension in block {} of a plain function", block.id),
                ));
            }
            for target in op.targets() {
                if func.block(target).is_none() {
                    return Err(bad(
                        func,
                        format!("block {} refers to missing block {}", block.id, target),
                    ));
                }
            }
        }
    }
    if let Some(point) = func.recover_point {
        if func.block(point).is_none() {
            return Err(bad(func, format!("recover point {} is missing", point)));
        }
    }
    Ok(())
}
