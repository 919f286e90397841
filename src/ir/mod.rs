//! In-memory IR for ToyC: a small LLVM-flavored subset.
//!
//! A `Module` owns `Function`s, a function owns its `BasicBlock`s, and a
//! block owns its `Instruction`s. Cross-block edges (`preds`, `succs`,
//! `rpo_order`) are plain block indices into `Function::blocks`, so the CFG
//! can be rebuilt at any time without touching ownership.

pub mod builder;
pub mod parser;

use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Alloca,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    ICmp,
    Br,
    CondBr,
    Ret,
    RetVoid,
    Call,
}

impl Opcode {
    /// LLVM textual mnemonic. Both branch forms serialize as `br` and both
    /// return forms as `ret`.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Alloca => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::SDiv => "sdiv",
            Opcode::SRem => "srem",
            Opcode::ICmp => "icmp",
            Opcode::Br | Opcode::CondBr => "br",
            Opcode::Ret | Opcode::RetVoid => "ret",
            Opcode::Call => "call",
        }
    }

    pub fn arith_from_str(s: &str) -> Option<Opcode> {
        match s {
            "add" => Some(Opcode::Add),
            "sub" => Some(Opcode::Sub),
            "mul" => Some(Opcode::Mul),
            "sdiv" => Some(Opcode::SDiv),
            "srem" => Some(Opcode::SRem),
            _ => None,
        }
    }
}

/// Comparison predicate of an `icmp` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sgt,
    Sle,
    Sge,
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Slt => "slt",
            CmpPred::Sgt => "sgt",
            CmpPred::Sle => "sle",
            CmpPred::Sge => "sge",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for CmpPred {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "eq" => Ok(CmpPred::Eq),
            "ne" => Ok(CmpPred::Ne),
            "slt" => Ok(CmpPred::Slt),
            "sgt" => Ok(CmpPred::Sgt),
            "sle" => Ok(CmpPred::Sle),
            "sge" => Ok(CmpPred::Sge),
            _ => Err(()),
        }
    }
}

/// An instruction operand: a virtual register, an immediate, a branch target
/// label or an `i1` literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    None,
    VReg(u32),
    Imm(i32),
    Label(String),
    BoolLit(bool),
}

impl Operand {
    pub fn vreg(&self) -> Option<u32> {
        match self {
            Operand::VReg(id) => Some(*id),
            _ => None,
        }
    }

    pub fn imm(&self) -> Option<i32> {
        match self {
            Operand::Imm(v) => Some(*v),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Operand::Label(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_vreg(&self) -> bool {
        matches!(self, Operand::VReg(_))
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, Operand::Imm(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::VReg(id) => write!(f, "%{}", id),
            Operand::Imm(v) => write!(f, "{}", v),
            Operand::Label(name) => write!(f, "%{}", name),
            Operand::BoolLit(b) => write!(f, "{}", if *b { "true" } else { "false" }),
        }
    }
}

/// One IR instruction.
///
/// `index` is the dense linear position assigned by the register allocator;
/// it stays -1 until allocation runs (unreachable blocks keep -1 forever).
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub ty: String,
    pub def: Operand,
    pub ops: Vec<Operand>,
    pub cmp_pred: CmpPred,
    pub callee: String,
    pub nsw: bool,
    pub align: u32,
    pub index: i32,
    pub block_id: i32,
}

impl Instruction {
    fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            ty: String::new(),
            def: Operand::None,
            ops: Vec::new(),
            cmp_pred: CmpPred::Eq,
            callee: String::new(),
            nsw: false,
            align: 4,
            index: -1,
            block_id: -1,
        }
    }

    pub fn alloca(def: Operand, ty: &str, align: u32) -> Self {
        let mut i = Self::new(Opcode::Alloca);
        i.def = def;
        i.ty = ty.to_string();
        i.align = align;
        i
    }

    pub fn load(def: Operand, ty: &str, ptr: Operand, align: u32) -> Self {
        let mut i = Self::new(Opcode::Load);
        i.def = def;
        i.ty = ty.to_string();
        i.ops = vec![ptr];
        i.align = align;
        i
    }

    pub fn store(ty: &str, value: Operand, ptr: Operand, align: u32) -> Self {
        let mut i = Self::new(Opcode::Store);
        i.ty = ty.to_string();
        i.ops = vec![value, ptr];
        i.align = align;
        i
    }

    pub fn bin_op(opcode: Opcode, def: Operand, ty: &str, lhs: Operand, rhs: Operand) -> Self {
        let mut i = Self::new(opcode);
        i.def = def;
        i.ty = ty.to_string();
        i.ops = vec![lhs, rhs];
        i.nsw = true;
        i
    }

    pub fn icmp(pred: CmpPred, def: Operand, ty: &str, lhs: Operand, rhs: Operand) -> Self {
        let mut i = Self::new(Opcode::ICmp);
        i.def = def;
        i.ty = ty.to_string();
        i.ops = vec![lhs, rhs];
        i.cmp_pred = pred;
        i
    }

    pub fn br(target: Operand) -> Self {
        let mut i = Self::new(Opcode::Br);
        i.ops = vec![target];
        i
    }

    pub fn cond_br(cond: Operand, true_target: Operand, false_target: Operand) -> Self {
        let mut i = Self::new(Opcode::CondBr);
        i.ops = vec![cond, true_target, false_target];
        i
    }

    pub fn ret(ty: &str, value: Operand) -> Self {
        let mut i = Self::new(Opcode::Ret);
        i.ty = ty.to_string();
        i.ops = vec![value];
        i
    }

    pub fn ret_void() -> Self {
        let mut i = Self::new(Opcode::RetVoid);
        i.ty = "void".to_string();
        i
    }

    pub fn call(def: Operand, ret_ty: &str, callee: &str, args: Vec<Operand>) -> Self {
        let mut i = Self::new(Opcode::Call);
        i.def = def;
        i.ty = ret_ty.to_string();
        i.callee = callee.to_string();
        i.ops = args;
        i
    }

    /// The virtual register written by this instruction, if any.
    pub fn def_reg(&self) -> Option<u32> {
        self.def.vreg()
    }

    /// Virtual registers read by this instruction, in operand order.
    pub fn use_regs(&self) -> Vec<u32> {
        match self.opcode {
            Opcode::Alloca | Opcode::Br | Opcode::RetVoid => Vec::new(),
            Opcode::Load => self.ops.first().and_then(Operand::vreg).into_iter().collect(),
            Opcode::CondBr => self.ops.first().and_then(Operand::vreg).into_iter().collect(),
            Opcode::Ret => self.ops.first().and_then(Operand::vreg).into_iter().collect(),
            Opcode::Store
            | Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::SDiv
            | Opcode::SRem
            | Opcode::ICmp
            | Opcode::Call => self.ops.iter().filter_map(Operand::vreg).collect(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self.opcode,
            Opcode::Br | Opcode::CondBr | Opcode::Ret | Opcode::RetVoid
        )
    }

    pub fn is_call(&self) -> bool {
        self.opcode == Opcode::Call
    }

    /// Labels this terminator may transfer control to (0, 1 or 2).
    pub fn branch_targets(&self) -> Vec<&str> {
        match self.opcode {
            Opcode::Br => self.ops.iter().filter_map(Operand::label).collect(),
            Opcode::CondBr => self.ops.iter().skip(1).filter_map(Operand::label).collect(),
            _ => Vec::new(),
        }
    }

    /// Condition register of a conditional branch.
    pub fn branch_cond_reg(&self) -> Option<u32> {
        if self.opcode == Opcode::CondBr {
            self.ops.first().and_then(Operand::vreg)
        } else {
            None
        }
    }

    /// Every instruction occupies two points on the linear time axis: an even
    /// definition point and an odd use point.
    pub fn pos_def(&self) -> i32 {
        self.index * 2
    }

    pub fn pos_use(&self) -> i32 {
        self.index * 2 + 1
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.opcode {
            Opcode::Alloca => write!(f, "{} = alloca {}, align {}", self.def, self.ty, self.align),
            Opcode::Load => write!(
                f,
                "{} = load {}, ptr {}, align {}",
                self.def, self.ty, self.ops[0], self.align
            ),
            Opcode::Store => write!(
                f,
                "store {} {}, ptr {}, align {}",
                self.ty, self.ops[0], self.ops[1], self.align
            ),
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::SDiv | Opcode::SRem => write!(
                f,
                "{} = {}{} {} {}, {}",
                self.def,
                self.opcode.mnemonic(),
                if self.nsw { " nsw" } else { "" },
                self.ty,
                self.ops[0],
                self.ops[1]
            ),
            Opcode::ICmp => write!(
                f,
                "{} = icmp {} {} {}, {}",
                self.def, self.cmp_pred, self.ty, self.ops[0], self.ops[1]
            ),
            Opcode::Br => write!(f, "br label {}", self.ops[0]),
            Opcode::CondBr => write!(
                f,
                "br i1 {}, label {}, label {}",
                self.ops[0], self.ops[1], self.ops[2]
            ),
            Opcode::Ret => write!(f, "ret {} {}", self.ty, self.ops[0]),
            Opcode::RetVoid => write!(f, "ret void"),
            Opcode::Call => {
                write!(f, "{} = call {} @{}(", self.def, self.ty, self.callee)?;
                for (j, op) in self.ops.iter().enumerate() {
                    if j > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "i32 noundef {}", op)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A basic block: a straight-line instruction sequence ending in one
/// terminator, plus the liveness sets computed by the register allocator.
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub id: usize,
    pub name: String,
    pub insts: Vec<Instruction>,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
    pub def_set: FxHashSet<u32>,
    pub use_set: FxHashSet<u32>,
    pub live_in: FxHashSet<u32>,
    pub live_out: FxHashSet<u32>,
}

impl BasicBlock {
    /// Definition position of the first instruction, -1 for an empty block.
    pub fn first_pos(&self) -> i32 {
        self.insts.first().map_or(-1, Instruction::pos_def)
    }

    /// Use position of the last instruction, -1 for an empty block.
    pub fn last_pos(&self) -> i32 {
        self.insts.last().map_or(-1, Instruction::pos_use)
    }

    pub fn is_terminated(&self) -> bool {
        self.insts.last().map_or(false, Instruction::is_terminator)
    }
}

#[derive(Debug, Clone)]
pub struct FuncParam {
    pub name: String,
    pub ty: String,
}

#[derive(Debug, Default)]
pub struct Function {
    pub name: String,
    /// "i32" or "void".
    pub return_type: String,
    pub params: Vec<FuncParam>,
    pub blocks: Vec<BasicBlock>,
    pub block_map: FxHashMap<String, usize>,
    /// Reverse post-order over reachable blocks, filled by liveness analysis.
    pub rpo_order: Vec<usize>,
    pub param_vregs: Vec<u32>,
    /// Highest virtual register id in use, `None` before any is allocated.
    pub max_vreg_id: Option<u32>,
}

impl Function {
    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    /// Rebuild `succs`/`preds` from the terminators.
    ///
    /// A block whose last instruction is not a terminator falls through to
    /// the next block in layout order. Labels that do not resolve are
    /// skipped; the IR parser rejects them before they can get here.
    pub fn build_cfg(&mut self) {
        for block in &mut self.blocks {
            block.succs.clear();
            block.preds.clear();
        }
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            let Some(last) = block.insts.last() else {
                continue;
            };
            if last.is_terminator() {
                for target in last.branch_targets() {
                    if let Some(&succ) = self.block_map.get(target) {
                        edges.push((i, succ));
                    }
                }
            } else if i + 1 < self.blocks.len() {
                edges.push((i, i + 1));
            }
        }
        for (from, to) in edges {
            self.blocks[from].succs.push(to);
            self.blocks[to].preds.push(from);
        }
    }

    fn record_vreg(&mut self, id: u32) {
        self.max_vreg_id = Some(self.max_vreg_id.map_or(id, |m| m.max(id)));
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "define dso_local {} @{}(", self.return_type, self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} noundef %{}", p.ty, p.name)?;
        }
        writeln!(f, ") #0 {{")?;
        for (bi, bb) in self.blocks.iter().enumerate() {
            if bi > 0 {
                writeln!(f, "\n{}:", bb.name)?;
            }
            for inst in &bb.insts {
                writeln!(f, "  {}", inst)?;
            }
        }
        writeln!(f, "}}")
    }
}

/// A translation unit: the list of functions plus the identifying strings
/// used only by the textual serialization.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub source_file: String,
    pub target_triple: String,
    pub functions: Vec<Function>,
}

impl Default for Module {
    fn default() -> Self {
        Self {
            name: "toyc".to_string(),
            source_file: "toyc".to_string(),
            target_triple: "riscv32-unknown-elf".to_string(),
            functions: Vec::new(),
        }
    }
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.source_file)?;
        writeln!(f, "target triple = \"{}\"", self.target_triple)?;
        writeln!(f)?;
        writeln!(f)?;
        for func in &self.functions {
            writeln!(f, "{}", func)?;
        }
        Ok(())
    }
}
