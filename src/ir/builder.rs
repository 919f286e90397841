//! AST → IR lowering.
//!
//! Every named source variable lives in a stack slot introduced by an
//! `alloca`; reads go through `load` and writes through `store`, so no vreg
//! is ever assigned twice and the allocator never needs phi nodes. A small
//! per-block cache remembers the last loaded value of each name to avoid
//! redundant loads inside straight-line code; it is invalidated on every
//! store and at block boundaries.

use super::{BasicBlock, CmpPred, FuncParam, Function, Instruction, Module, Opcode, Operand};
use crate::ast::{
    AddExp, AddOp, Block, CompUnit, Exp, FuncCall, FuncDef, FuncType, LAndExp, LOrExp, MulExp,
    MulOp, PrimaryExp, RelExp, RelOp, Stmt, UnaryExp, UnaryOp,
};
use rustc_hash::FxHashMap;

pub struct IrBuilder {
    vreg_counter: u32,
    label_counter: u32,
    scope_stack: Vec<FxHashMap<String, Operand>>,
    loaded_values: FxHashMap<String, Operand>,
    break_labels: Vec<String>,
    continue_labels: Vec<String>,
    has_return: bool,
    current_block: usize,
    func: Function,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        Self {
            vreg_counter: 0,
            label_counter: 0,
            scope_stack: vec![FxHashMap::default()],
            loaded_values: FxHashMap::default(),
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            has_return: false,
            current_block: 0,
            func: Function::default(),
        }
    }

    pub fn build_module(&mut self, unit: &CompUnit) -> Module {
        let mut module = Module::new();
        for func_def in &unit.func_defs {
            module.functions.push(self.build_function(func_def));
        }
        module
    }

    // -------- helpers --------

    fn new_vreg(&mut self) -> Operand {
        let id = self.vreg_counter;
        self.vreg_counter += 1;
        Operand::VReg(id)
    }

    fn new_label(&self, base: &str) -> String {
        format!("{}_{}", base, self.label_counter)
    }

    fn create_block(&mut self, name: &str) -> usize {
        let id = self.func.blocks.len();
        self.func.blocks.push(BasicBlock {
            id,
            name: name.to_string(),
            ..BasicBlock::default()
        });
        self.func.block_map.insert(name.to_string(), id);
        id
    }

    fn set_insert_block(&mut self, block: usize) {
        self.current_block = block;
    }

    fn emit(&mut self, mut inst: Instruction) {
        inst.block_id = self.current_block as i32;
        self.func.blocks[self.current_block].insts.push(inst);
    }

    fn current_terminated(&self) -> bool {
        self.func.blocks[self.current_block].is_terminated()
    }

    // -------- scopes --------

    fn enter_scope(&mut self) {
        self.scope_stack.push(FxHashMap::default());
    }

    fn exit_scope(&mut self) {
        self.scope_stack.pop();
    }

    fn add_variable(&mut self, name: &str, alloca_reg: Operand) {
        if let Some(scope) = self.scope_stack.last_mut() {
            scope.insert(name.to_string(), alloca_reg);
        }
    }

    /// Innermost-scope-first lookup, implementing variable shadowing.
    fn find_variable(&self, name: &str) -> Option<Operand> {
        self.scope_stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    }

    // -------- functions --------

    fn build_function(&mut self, func_def: &FuncDef) -> Function {
        self.label_counter = 0;
        self.vreg_counter = func_def.params.len() as u32;
        self.scope_stack.clear();
        self.enter_scope();
        self.loaded_values.clear();
        self.break_labels.clear();
        self.continue_labels.clear();
        self.has_return = false;

        self.func = Function {
            name: func_def.ident.clone(),
            return_type: match func_def.func_type {
                FuncType::Int => "i32".to_string(),
                FuncType::Void => "void".to_string(),
            },
            ..Function::default()
        };
        for (i, _) in func_def.params.iter().enumerate() {
            self.func.params.push(FuncParam {
                name: i.to_string(),
                ty: "i32".to_string(),
            });
            self.func.param_vregs.push(i as u32);
        }

        let entry = self.create_block("entry");
        self.set_insert_block(entry);

        // Dedicated return slot for main, initialized to zero.
        if func_def.ident == "main" {
            let ret_var = self.new_vreg();
            self.add_variable("main_ret", ret_var.clone());
            self.emit(Instruction::alloca(ret_var.clone(), "i32", 4));
            self.emit(Instruction::store("i32", Operand::Imm(0), ret_var, 4));
        }

        // Each parameter gets a stack slot; the slot is visible both under
        // its canonical index name and its source name.
        for (i, param) in func_def.params.iter().enumerate() {
            let slot = self.new_vreg();
            self.emit(Instruction::alloca(slot.clone(), "i32", 4));
            self.emit(Instruction::store(
                "i32",
                Operand::VReg(i as u32),
                slot.clone(),
                4,
            ));
            self.add_variable(&i.to_string(), slot.clone());
            self.add_variable(&param.ident, slot);
        }

        self.build_block(&func_def.block);

        if !self.has_return {
            if self.func.return_type == "i32" {
                self.emit(Instruction::ret("i32", Operand::Imm(0)));
            } else {
                self.emit(Instruction::ret_void());
            }
        }

        self.func.max_vreg_id = self.vreg_counter.checked_sub(1);
        std::mem::take(&mut self.func)
    }

    // -------- statements --------

    fn build_block(&mut self, block: &Block) {
        self.enter_scope();
        for stmt in &block.stmts {
            if self.current_terminated() {
                break;
            }
            self.build_stmt(stmt);
        }
        self.exit_scope();
    }

    fn build_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Decl { ident, init } => self.build_decl(ident, init),
            Stmt::Assign { ident, exp } => self.build_assign(ident, exp),
            Stmt::Exp(exp) => {
                if let Some(exp) = exp {
                    self.build_exp(exp);
                }
            }
            Stmt::Block(block) => self.build_block(block),
            Stmt::If(if_stmt) => self.build_if(if_stmt),
            Stmt::While(wh) => self.build_while(wh),
            Stmt::Break => self.build_break(),
            Stmt::Continue => self.build_continue(),
            Stmt::Return(exp) => self.build_return(exp.as_ref()),
        }
    }

    fn build_decl(&mut self, ident: &str, init: &Exp) {
        let value = self.build_exp(init);
        let slot = self.new_vreg();
        self.emit(Instruction::alloca(slot.clone(), "i32", 4));
        self.add_variable(ident, slot.clone());
        self.emit(Instruction::store("i32", value, slot, 4));
        self.loaded_values.remove(ident);
    }

    fn build_assign(&mut self, ident: &str, exp: &Exp) {
        let value = self.build_exp(exp);
        match self.find_variable(ident) {
            Some(var) => {
                self.emit(Instruction::store("i32", value, var, 4));
                self.loaded_values.remove(ident);
            }
            None => eprintln!("Error: undefined variable '{}'", ident),
        }
    }

    fn build_if(&mut self, if_stmt: &crate::ast::If) {
        self.loaded_values.clear();
        let cond = self.build_exp(&if_stmt.cond);

        let then_name = self.new_label("then");
        let else_name = self.new_label("else");
        let end_name = self.new_label("endif");
        self.label_counter += 1;

        self.emit(Instruction::cond_br(
            cond,
            Operand::Label(then_name.clone()),
            Operand::Label(else_name.clone()),
        ));

        let then_bb = self.create_block(&then_name);
        self.set_insert_block(then_bb);
        self.loaded_values.clear();
        self.build_stmt(&if_stmt.then_stmt);
        if !self.current_terminated() {
            self.emit(Instruction::br(Operand::Label(end_name.clone())));
        }

        let else_bb = self.create_block(&else_name);
        self.set_insert_block(else_bb);
        self.loaded_values.clear();
        if let Some(else_stmt) = &if_stmt.else_stmt {
            self.build_stmt(else_stmt);
        }
        if !self.current_terminated() {
            self.emit(Instruction::br(Operand::Label(end_name.clone())));
        }

        // Values loaded on either arm are stale in the merge block.
        let end_bb = self.create_block(&end_name);
        self.set_insert_block(end_bb);
        self.loaded_values.clear();
    }

    fn build_while(&mut self, wh: &crate::ast::While) {
        let cond_name = self.new_label("while_cond");
        let body_name = self.new_label("while_body");
        let end_name = self.new_label("while_end");
        self.label_counter += 1;

        self.break_labels.push(end_name.clone());
        self.continue_labels.push(cond_name.clone());

        self.emit(Instruction::br(Operand::Label(cond_name.clone())));

        let cond_bb = self.create_block(&cond_name);
        self.set_insert_block(cond_bb);
        self.loaded_values.clear();
        let cond = self.build_exp(&wh.cond);
        self.emit(Instruction::cond_br(
            cond,
            Operand::Label(body_name.clone()),
            Operand::Label(end_name.clone()),
        ));

        let body_bb = self.create_block(&body_name);
        self.set_insert_block(body_bb);
        self.loaded_values.clear();
        self.build_stmt(&wh.body);
        if !self.current_terminated() {
            self.emit(Instruction::br(Operand::Label(cond_name.clone())));
        }

        // Loads cached in the condition or body do not dominate the exit.
        let end_bb = self.create_block(&end_name);
        self.set_insert_block(end_bb);
        self.loaded_values.clear();

        self.break_labels.pop();
        self.continue_labels.pop();
    }

    fn build_return(&mut self, exp: Option<&Exp>) {
        match exp {
            Some(exp) => {
                let value = self.build_exp(exp);
                self.emit(Instruction::ret("i32", value));
            }
            None => self.emit(Instruction::ret_void()),
        }
        self.has_return = true;
    }

    fn build_break(&mut self) {
        if let Some(label) = self.break_labels.last().cloned() {
            self.emit(Instruction::br(Operand::Label(label)));
        }
    }

    fn build_continue(&mut self) {
        if let Some(label) = self.continue_labels.last().cloned() {
            self.emit(Instruction::br(Operand::Label(label)));
        }
    }

    // -------- expressions --------

    fn build_exp(&mut self, exp: &Exp) -> Operand {
        self.build_lor(&exp.lor)
    }

    fn build_lor(&mut self, exp: &LOrExp) -> Operand {
        match exp {
            LOrExp::LAnd(land) => self.build_land(land),
            LOrExp::LOr { lhs, rhs } => self.build_logical_or(lhs, rhs),
        }
    }

    fn build_land(&mut self, exp: &LAndExp) -> Operand {
        match exp {
            LAndExp::Rel(rel) => self.build_rel(rel),
            LAndExp::LAnd { lhs, rhs } => self.build_logical_and(lhs, rhs),
        }
    }

    /// Short-circuit `&&` through an i1 stack slot: the false arm writes the
    /// constant, the rhs arm evaluates and stores the right operand, and the
    /// merge block loads the result.
    fn build_logical_and(&mut self, lhs: &LAndExp, rhs: &RelExp) -> Operand {
        let result_var = self.new_vreg();
        self.emit(Instruction::alloca(result_var.clone(), "i1", 1));

        let lhs_op = self.build_land(lhs);

        let rhs_name = self.new_label("land_rhs");
        let false_name = self.new_label("land_false");
        let end_name = self.new_label("land_end");
        self.label_counter += 1;

        self.emit(Instruction::cond_br(
            lhs_op,
            Operand::Label(rhs_name.clone()),
            Operand::Label(false_name.clone()),
        ));

        let false_bb = self.create_block(&false_name);
        self.set_insert_block(false_bb);
        self.emit(Instruction::store(
            "i1",
            Operand::BoolLit(false),
            result_var.clone(),
            1,
        ));
        self.emit(Instruction::br(Operand::Label(end_name.clone())));

        let rhs_bb = self.create_block(&rhs_name);
        self.set_insert_block(rhs_bb);
        let rhs_op = self.build_rel(rhs);
        self.emit(Instruction::store("i1", rhs_op, result_var.clone(), 1));
        self.emit(Instruction::br(Operand::Label(end_name.clone())));

        // Loads cached in either arm do not dominate the merge block.
        let end_bb = self.create_block(&end_name);
        self.set_insert_block(end_bb);
        self.loaded_values.clear();

        let result = self.new_vreg();
        self.emit(Instruction::load(result.clone(), "i1", result_var, 1));
        result
    }

    fn build_logical_or(&mut self, lhs: &LOrExp, rhs: &LAndExp) -> Operand {
        let result_var = self.new_vreg();
        self.emit(Instruction::alloca(result_var.clone(), "i1", 1));

        let lhs_op = self.build_lor(lhs);

        let true_name = self.new_label("lor_true");
        let rhs_name = self.new_label("lor_rhs");
        let end_name = self.new_label("lor_end");
        self.label_counter += 1;

        self.emit(Instruction::cond_br(
            lhs_op,
            Operand::Label(true_name.clone()),
            Operand::Label(rhs_name.clone()),
        ));

        let true_bb = self.create_block(&true_name);
        self.set_insert_block(true_bb);
        self.emit(Instruction::store(
            "i1",
            Operand::BoolLit(true),
            result_var.clone(),
            1,
        ));
        self.emit(Instruction::br(Operand::Label(end_name.clone())));

        let rhs_bb = self.create_block(&rhs_name);
        self.set_insert_block(rhs_bb);
        let rhs_op = self.build_land(rhs);
        self.emit(Instruction::store("i1", rhs_op, result_var.clone(), 1));
        self.emit(Instruction::br(Operand::Label(end_name.clone())));

        // Loads cached in either arm do not dominate the merge block.
        let end_bb = self.create_block(&end_name);
        self.set_insert_block(end_bb);
        self.loaded_values.clear();

        let result = self.new_vreg();
        self.emit(Instruction::load(result.clone(), "i1", result_var, 1));
        result
    }

    fn build_rel(&mut self, exp: &RelExp) -> Operand {
        match exp {
            RelExp::Add(add) => self.build_add(add),
            RelExp::Rel { lhs, op, rhs } => {
                let lhs_op = self.build_rel(lhs);
                let rhs_op = self.build_add(rhs);
                let result = self.new_vreg();
                let pred = match op {
                    RelOp::Eq => CmpPred::Eq,
                    RelOp::Ne => CmpPred::Ne,
                    RelOp::Lt => CmpPred::Slt,
                    RelOp::Gt => CmpPred::Sgt,
                    RelOp::Le => CmpPred::Sle,
                    RelOp::Ge => CmpPred::Sge,
                };
                self.emit(Instruction::icmp(
                    pred,
                    result.clone(),
                    "i32",
                    lhs_op,
                    rhs_op,
                ));
                result
            }
        }
    }

    fn build_add(&mut self, exp: &AddExp) -> Operand {
        match exp {
            AddExp::Mul(mul) => self.build_mul(mul),
            AddExp::Add { lhs, op, rhs } => {
                let lhs_op = self.build_add(lhs);
                let rhs_op = self.build_mul(rhs);
                let result = self.new_vreg();
                let opcode = match op {
                    AddOp::Plus => Opcode::Add,
                    AddOp::Minus => Opcode::Sub,
                };
                self.emit(Instruction::bin_op(
                    opcode,
                    result.clone(),
                    "i32",
                    lhs_op,
                    rhs_op,
                ));
                result
            }
        }
    }

    fn build_mul(&mut self, exp: &MulExp) -> Operand {
        match exp {
            MulExp::Unary(unary) => self.build_unary(unary),
            MulExp::Mul { lhs, op, rhs } => {
                let lhs_op = self.build_mul(lhs);
                let rhs_op = self.build_unary(rhs);
                let result = self.new_vreg();
                let opcode = match op {
                    MulOp::Mul => Opcode::Mul,
                    MulOp::Div => Opcode::SDiv,
                    MulOp::Mod => Opcode::SRem,
                };
                self.emit(Instruction::bin_op(
                    opcode,
                    result.clone(),
                    "i32",
                    lhs_op,
                    rhs_op,
                ));
                result
            }
        }
    }

    fn build_unary(&mut self, exp: &UnaryExp) -> Operand {
        match exp {
            UnaryExp::Primary(primary) => self.build_primary(primary),
            UnaryExp::Call(call) => self.build_call(call),
            UnaryExp::Unary { op, exp } => match op {
                UnaryOp::Plus => self.build_unary(exp),
                UnaryOp::Minus => {
                    // Fold negation of a literal instead of emitting 0 - n.
                    if let UnaryExp::Primary(PrimaryExp::Number(n)) = exp.as_ref() {
                        return Operand::Imm(n.wrapping_neg());
                    }
                    let inner = self.build_unary(exp);
                    let result = self.new_vreg();
                    self.emit(Instruction::bin_op(
                        Opcode::Sub,
                        result.clone(),
                        "i32",
                        Operand::Imm(0),
                        inner,
                    ));
                    result
                }
                UnaryOp::Not => {
                    let inner = self.build_unary(exp);
                    let result = self.new_vreg();
                    self.emit(Instruction::icmp(
                        CmpPred::Eq,
                        result.clone(),
                        "i32",
                        inner,
                        Operand::Imm(0),
                    ));
                    result
                }
            },
        }
    }

    fn build_primary(&mut self, exp: &PrimaryExp) -> Operand {
        match exp {
            PrimaryExp::Exp(exp) => self.build_exp(exp),
            PrimaryExp::Number(n) => Operand::Imm(*n),
            PrimaryExp::Ident(name) => self.build_identifier(name),
        }
    }

    fn build_identifier(&mut self, name: &str) -> Operand {
        if let Some(var) = self.find_variable(name) {
            if let Some(cached) = self.loaded_values.get(name) {
                return cached.clone();
            }
            let temp = self.new_vreg();
            self.emit(Instruction::load(temp.clone(), "i32", var, 4));
            self.loaded_values.insert(name.to_string(), temp.clone());
            return temp;
        }
        // A pure decimal name is the canonical form of a parameter and maps
        // straight onto its virtual register.
        if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = name.parse::<u32>() {
                return Operand::VReg(id);
            }
        }
        eprintln!("Error: undefined variable '{}'", name);
        Operand::Imm(0)
    }

    fn build_call(&mut self, call: &FuncCall) -> Operand {
        let mut args = Vec::new();
        for arg in &call.args {
            args.push(self.build_exp(arg));
        }
        let result = self.new_vreg();
        self.emit(Instruction::call(
            result.clone(),
            "i32",
            &call.ident,
            args,
        ));
        result
    }
}
