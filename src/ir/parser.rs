//! Parser for the textual IR form, used for `.ll` inputs and round-trip
//! tests. Instructions are matched line by line with anchored regular
//! expressions; anything unrecognized inside a function body is a
//! `MalformedIr` diagnostic, as is a branch to a label with no block.

use super::{BasicBlock, CmpPred, FuncParam, Function, Instruction, Module, Opcode, Operand};
use crate::error::CompileError;
use regex::Regex;

pub struct IrParser {
    func_name_re: Regex,
    param_re: Regex,
    ret_re: Regex,
    br_re: Regex,
    cond_br_re: Regex,
    store_re: Regex,
    def_re: Regex,
    alloca_re: Regex,
    load_re: Regex,
    call_re: Regex,
    call_arg_re: Regex,
    icmp_re: Regex,
    arith_re: Regex,
}

impl Default for IrParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IrParser {
    pub fn new() -> Self {
        Self {
            func_name_re: Regex::new(r"@(\w+)").unwrap(),
            param_re: Regex::new(r"%(\d+)").unwrap(),
            ret_re: Regex::new(r"^ret\s+(\w+)\s+(.+)$").unwrap(),
            br_re: Regex::new(r"^br\s+label\s+%(\S+)$").unwrap(),
            cond_br_re: Regex::new(
                r"^br\s+i1\s+(%\d+|true|false),\s*label\s+%(\S+),\s*label\s+%(\S+)$",
            )
            .unwrap(),
            store_re: Regex::new(
                r"^store\s+(\w+)\s+(%\d+|-?\d+|true|false),\s*ptr\s+(%\d+)(?:,\s*align\s+(\d+))?$",
            )
            .unwrap(),
            def_re: Regex::new(r"^(%\d+)\s*=\s*(.*)$").unwrap(),
            alloca_re: Regex::new(r"^alloca\s+(\w+)(?:,\s*align\s+(\d+))?$").unwrap(),
            load_re: Regex::new(r"^load\s+(\w+),\s*ptr\s+(%\d+)(?:,\s*align\s+(\d+))?$").unwrap(),
            call_re: Regex::new(r"^call\s+(\w+)\s+@(\w+)\((.*)\)$").unwrap(),
            call_arg_re: Regex::new(r"i32\s+(?:noundef\s+)?(%\d+|-?\d+)").unwrap(),
            icmp_re: Regex::new(r"^icmp\s+(\w+)\s+(\w+)\s+(%\d+|-?\d+),\s*(%\d+|-?\d+)$").unwrap(),
            arith_re: Regex::new(
                r"^(add|sub|mul|sdiv|srem)\s+(?:nsw\s+)?(\w+)\s+(%\d+|-?\d+),\s*(%\d+|-?\d+)$",
            )
            .unwrap(),
        }
    }

    /// Parse complete IR text into a module, collecting every `define` block.
    pub fn parse_module(&self, text: &str) -> Result<Module, CompileError> {
        let mut module = Module::new();

        // (line number of the define, define line, body lines)
        let mut func_texts: Vec<(String, Vec<(usize, String)>)> = Vec::new();
        let mut in_func = false;
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.starts_with("define ") {
                in_func = true;
                func_texts.push((line.to_string(), Vec::new()));
                continue;
            }
            if in_func {
                if line == "}" {
                    in_func = false;
                } else if let Some((_, body)) = func_texts.last_mut() {
                    body.push((idx + 1, line.to_string()));
                }
            }
        }

        for (def_line, body) in &func_texts {
            let func = self.parse_function(def_line, body)?;
            module.functions.push(func);
        }
        Ok(module)
    }

    fn parse_function(
        &self,
        def_line: &str,
        body: &[(usize, String)],
    ) -> Result<Function, CompileError> {
        let mut func = Function::default();

        if let Some(caps) = self.func_name_re.captures(def_line) {
            func.name = caps[1].to_string();
        }

        // The return type precedes the function name.
        let void_pos = def_line.find("void");
        let at_pos = def_line.find('@').unwrap_or(def_line.len());
        func.return_type = match void_pos {
            Some(p) if p < at_pos => "void".to_string(),
            _ => "i32".to_string(),
        };

        let param_vregs = self.parse_parameters(def_line);
        for &vreg in &param_vregs {
            func.params.push(FuncParam {
                name: vreg.to_string(),
                ty: "i32".to_string(),
            });
            func.record_vreg(vreg);
        }
        func.param_vregs = param_vregs;

        let entry = BasicBlock {
            id: 0,
            name: "entry".to_string(),
            ..BasicBlock::default()
        };
        func.block_map.insert("entry".to_string(), 0);
        func.blocks.push(entry);
        let mut current = 0usize;

        for (line_no, line) in body {
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            // A label opens a new basic block.
            if let Some(label) = line.strip_suffix(':') {
                let label = label.trim();
                let id = func.blocks.len();
                func.blocks.push(BasicBlock {
                    id,
                    name: label.to_string(),
                    ..BasicBlock::default()
                });
                func.block_map.insert(label.to_string(), id);
                current = id;
                continue;
            }

            let mut inst = self.parse_instruction(line, *line_no)?;
            if let Some(d) = inst.def_reg() {
                func.record_vreg(d);
            }
            for u in inst.use_regs() {
                func.record_vreg(u);
            }
            inst.block_id = current as i32;
            func.blocks[current].insts.push(inst);
        }

        self.validate_branch_targets(&func, body)?;
        Ok(func)
    }

    /// Every label a terminator mentions must name a block of this function.
    fn validate_branch_targets(
        &self,
        func: &Function,
        body: &[(usize, String)],
    ) -> Result<(), CompileError> {
        let first_line = body.first().map_or(0, |(n, _)| *n);
        for block in &func.blocks {
            for inst in &block.insts {
                for target in inst.branch_targets() {
                    if !func.block_map.contains_key(target) {
                        return Err(CompileError::MalformedIr {
                            line: first_line,
                            message: format!(
                                "branch to unknown label '%{}' in function '{}'",
                                target, func.name
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn parse_parameters(&self, def_line: &str) -> Vec<u32> {
        let lp = def_line.find('(');
        let rp = def_line.find(')');
        let (Some(lp), Some(rp)) = (lp, rp) else {
            return Vec::new();
        };
        let param_str = &def_line[lp + 1..rp];
        self.param_re
            .captures_iter(param_str)
            .filter_map(|c| c[1].parse().ok())
            .collect()
    }

    fn parse_instruction(&self, line: &str, line_no: usize) -> Result<Instruction, CompileError> {
        if line == "ret void" {
            return Ok(Instruction::ret_void());
        }
        if let Some(m) = self.ret_re.captures(line) {
            return Ok(Instruction::ret(&m[1], self.parse_operand(m[2].trim())));
        }
        if let Some(m) = self.br_re.captures(line) {
            return Ok(Instruction::br(Operand::Label(m[1].to_string())));
        }
        if let Some(m) = self.cond_br_re.captures(line) {
            return Ok(Instruction::cond_br(
                self.parse_operand(&m[1]),
                Operand::Label(m[2].to_string()),
                Operand::Label(m[3].to_string()),
            ));
        }
        if let Some(m) = self.store_re.captures(line) {
            let align = m.get(4).map_or(4, |a| a.as_str().parse().unwrap_or(4));
            return Ok(Instruction::store(
                &m[1],
                self.parse_operand(&m[2]),
                self.parse_operand(&m[3]),
                align,
            ));
        }
        if let Some(m) = self.def_re.captures(line) {
            let def = self.parse_operand(&m[1]);
            let rhs = m[2].trim().to_string();

            if let Some(m) = self.alloca_re.captures(&rhs) {
                let align = m.get(2).map_or(4, |a| a.as_str().parse().unwrap_or(4));
                return Ok(Instruction::alloca(def, &m[1], align));
            }
            if let Some(m) = self.load_re.captures(&rhs) {
                let align = m.get(3).map_or(4, |a| a.as_str().parse().unwrap_or(4));
                return Ok(Instruction::load(def, &m[1], self.parse_operand(&m[2]), align));
            }
            if let Some(m) = self.call_re.captures(&rhs) {
                let args = self
                    .call_arg_re
                    .captures_iter(&m[3])
                    .map(|c| self.parse_operand(&c[1]))
                    .collect();
                return Ok(Instruction::call(def, &m[1], &m[2], args));
            }
            if let Some(m) = self.icmp_re.captures(&rhs) {
                let pred: CmpPred = m[1].parse().unwrap_or(CmpPred::Eq);
                return Ok(Instruction::icmp(
                    pred,
                    def,
                    &m[2],
                    self.parse_operand(&m[3]),
                    self.parse_operand(&m[4]),
                ));
            }
            if let Some(m) = self.arith_re.captures(&rhs) {
                let opcode = Opcode::arith_from_str(&m[1]).unwrap_or(Opcode::Add);
                return Ok(Instruction::bin_op(
                    opcode,
                    def,
                    &m[2],
                    self.parse_operand(&m[3]),
                    self.parse_operand(&m[4]),
                ));
            }
        }
        Err(CompileError::MalformedIr {
            line: line_no,
            message: format!("unparseable instruction '{}'", line),
        })
    }

    fn parse_operand(&self, text: &str) -> Operand {
        let s = text.trim();
        if s.is_empty() {
            return Operand::None;
        }
        if s == "true" {
            return Operand::BoolLit(true);
        }
        if s == "false" {
            return Operand::BoolLit(false);
        }
        if let Some(rest) = s.strip_prefix('%') {
            if let Ok(id) = rest.parse::<u32>() {
                return Operand::VReg(id);
            }
            return Operand::Label(rest.to_string());
        }
        match s.parse::<i32>() {
            Ok(v) => Operand::Imm(v),
            Err(_) => Operand::None,
        }
    }
}
