//! Instruction execution: fetch, decode, and dispatch of exactly one
//! instruction per step.
//!
//! Handlers follow a peek-compute-commit discipline where restoration
//! matters: operands stay on the stack until the result exists, so a failed
//! operation leaves the stack and (via the step wrapper) the program counter
//! untouched.

mod binary;
mod call;
mod collections;

#[cfg(feature = "trace")]
use std::io::Write;

use num_enum::TryFromPrimitive;

use crate::{
    engine::{Engine, Frame, FrameKind},
    error::{RunError, RunResult, StepResult},
    heap::{EntryData, EntryId, ParameterKind},
    instructions::{Opcode, parameter_kind, range_mask},
    iter, sequence, tree, value,
};

impl<C> Engine<C> {
    pub(crate) fn execute_instruction(&mut self) -> RunResult<StepResult> {
        #[cfg(feature = "trace")]
        let instruction_pc = self.pc;
        let opcode =
            Opcode::try_from_primitive(self.fetch_u8()?).map_err(|_| RunError::InvalidInstruction)?;

        #[cfg(feature = "trace")]
        if let Some(sink) = &mut self.trace_sink {
            let _ = writeln!(sink, "{instruction_pc:08X} {opcode}");
        }

        match opcode {
            Opcode::PushNone => {
                let entry = self.heap.new_none();
                self.push(entry);
            }
            Opcode::PushEllipsis => {
                let entry = self.heap.new_ellipsis();
                self.push(entry);
            }
            Opcode::PushTrue => {
                let entry = self.heap.new_boolean(true);
                self.push(entry);
            }
            Opcode::PushFalse => {
                let entry = self.heap.new_boolean(false);
                self.push(entry);
            }
            Opcode::PushInteger => {
                let value = self.fetch_i32()?;
                let entry = self.heap.alloc(EntryData::Integer(value))?;
                self.push(entry);
            }
            Opcode::PushFloat => {
                let value = self.fetch_f64()?;
                let entry = self.heap.alloc(EntryData::Float(value))?;
                self.push(entry);
            }
            Opcode::PushSymbol => {
                let symbol = self.fetch_i32()?;
                let entry = self.heap.alloc(EntryData::Symbol(symbol))?;
                self.push(entry);
            }
            Opcode::PushString => {
                let length = self.fetch_u32()? as usize;
                let bytes = self.fetch_bytes(length)?;
                let entry = value::new_string(&mut self.heap, &bytes)?;
                self.push(entry);
            }
            Opcode::BuildRange => self.build_range()?,
            Opcode::NewTuple => {
                let entry = value::new_tuple(&mut self.heap)?;
                self.push(entry);
            }
            Opcode::NewList => {
                let entry = value::new_list(&mut self.heap)?;
                self.push(entry);
            }
            Opcode::NewSet => {
                let entry = value::new_set(&mut self.heap)?;
                self.push(entry);
            }
            Opcode::NewDictionary => {
                let entry = value::new_dictionary(&mut self.heap)?;
                self.push(entry);
            }
            Opcode::AppendElement => self.append_element()?,
            Opcode::InsertKeyValue => self.insert_key_value()?,
            Opcode::Dup => {
                let top = self.peek(0)?;
                self.heap.ref_(top);
                self.push(top);
            }
            Opcode::Swap => {
                if self.stack.len() < 2 {
                    return Err(RunError::StackUnderflow);
                }
                let len = self.stack.len();
                self.stack.swap(len - 1, len - 2);
            }
            Opcode::Pop => self.pop_unref()?,
            Opcode::Negate => self.negate()?,
            Opcode::LogicalNot => {
                let operand = self.peek(0)?;
                let truth = value::is_true(&self.heap, operand)?;
                let result = self.heap.new_boolean(!truth);
                self.pop_unref()?;
                self.push(result);
            }
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::FloorDivide
            | Opcode::Modulo
            | Opcode::Power
            | Opcode::Equal
            | Opcode::NotEqual
            | Opcode::Less
            | Opcode::LessOrEqual
            | Opcode::Greater
            | Opcode::GreaterOrEqual => self.binary_op(opcode)?,
            Opcode::In | Opcode::NotIn => self.membership(opcode == Opcode::NotIn)?,
            Opcode::LoadIndex => self.load_index()?,
            Opcode::StoreIndex => self.store_index()?,
            Opcode::EraseIndex => self.erase_index()?,
            Opcode::LoadMember => self.load_member()?,
            Opcode::StoreMember => self.store_member()?,
            Opcode::UnpackSequence => self.unpack_sequence()?,
            Opcode::Jump => {
                let target = self.fetch_u32()?;
                self.pc = target;
            }
            Opcode::JumpIfTrue | Opcode::JumpIfFalse => {
                let target = self.fetch_u32()?;
                let condition = self.peek(0)?;
                let truth = value::is_true(&self.heap, condition)?;
                self.pop_unref()?;
                if truth == (opcode == Opcode::JumpIfTrue) {
                    self.pc = target;
                }
            }
            Opcode::MakeIterator => {
                let reversed = self.fetch_u8()? != 0;
                let iterable = self.peek(0)?;
                let iterator = iter::new(&mut self.heap, iterable, reversed)?;
                self.pop_unref()?;
                self.push(iterator);
            }
            Opcode::IteratorTest => {
                let target = self.fetch_u32()?;
                let iterator = self.peek(0)?;
                if iter::at_end(&self.heap, iterator)? {
                    self.pc = target;
                }
            }
            Opcode::IteratorDereference => {
                let iterator = self.peek(0)?;
                match iter::dereference(&mut self.heap, iterator)? {
                    Some(value) => self.push(value),
                    None => return Err(RunError::IteratorAtEnd),
                }
            }
            Opcode::IteratorAdvance => {
                let iterator = self.peek(0)?;
                iter::advance(&mut self.heap, iterator)?;
            }
            Opcode::PushPositionalArgument
            | Opcode::PushNamedArgument
            | Opcode::PushIterableGroupArgument
            | Opcode::PushDictionaryGroupArgument => self.push_argument(opcode)?,
            Opcode::Call => {
                let function = self.pop()?;
                return self.call_function(function, false);
            }
            Opcode::Return => self.return_from_call()?,
            Opcode::PushParameter => self.push_parameter()?,
            Opcode::MakeFunction => self.make_function()?,
            Opcode::LoadVariable => {
                let symbol = self.fetch_i32()?;
                let found = self.lookup_variable(symbol)?;
                self.heap.ref_(found);
                self.push(found);
            }
            Opcode::StoreVariable => {
                let symbol = self.fetch_i32()?;
                let value = self.pop()?;
                let namespace = self.local_namespace;
                self.store_in_namespace(namespace, symbol, value)?;
            }
            Opcode::EraseVariable => {
                let symbol = self.fetch_i32()?;
                let namespace = self.local_namespace;
                match tree::find_symbol(&self.heap, namespace, symbol)? {
                    Some(node) => tree::erase_node(&mut self.heap, namespace, node, false, true)?,
                    None => return Err(RunError::NameNotFound),
                }
            }
            Opcode::AddModule => {
                let symbol = self.fetch_i32()?;
                let address = self.fetch_u32()?;
                let namespace = value::new_namespace(&mut self.heap)?;
                let module = self.heap.alloc(EntryData::Module { address, namespace })?;
                let registry = self.module_namespace;
                self.store_in_namespace(registry, symbol, module)?;
            }
            Opcode::EnterModule => self.enter_module()?,
            Opcode::ExitModule => self.exit_module()?,
            Opcode::LoadModule => {
                let symbol = self.fetch_i32()?;
                let module = self.find_module(symbol)?;
                self.heap.ref_(module);
                self.push(module);
            }
            Opcode::End => {
                if !self.frames.is_empty() {
                    return Err(RunError::InvalidEnd);
                }
                return Ok(StepResult::Complete);
            }
        }
        Ok(StepResult::Running)
    }

    fn build_range(&mut self) -> RunResult<()> {
        let mask = self.fetch_u8()?;
        let step = if mask & range_mask::STEP != 0 {
            Some(self.pop_integer_entry()?)
        } else {
            None
        };
        let end = if mask & range_mask::END != 0 {
            Some(self.pop_integer_entry()?)
        } else {
            None
        };
        let start = if mask & range_mask::START != 0 {
            Some(self.pop_integer_entry()?)
        } else {
            None
        };
        if let Some(step) = step
            && matches!(self.heap.get(step), EntryData::Integer(0))
        {
            let _ = self.heap.unref(step);
            for component in [end, start].into_iter().flatten() {
                let _ = self.heap.unref(component);
            }
            return Err(RunError::ValueOutOfRange);
        }
        let entry = self.heap.alloc(EntryData::Range { start, end, step })?;
        self.push(entry);
        Ok(())
    }

    /// Pops a value that must be an integer entry, keeping its reference.
    fn pop_integer_entry(&mut self) -> RunResult<EntryId> {
        let entry = self.pop()?;
        if !matches!(self.heap.get(entry), EntryData::Integer(_)) {
            let _ = self.heap.unref(entry);
            return Err(RunError::UnexpectedType);
        }
        Ok(entry)
    }

    fn negate(&mut self) -> RunResult<()> {
        let operand = self.peek(0)?;
        let result = match self.heap.get(operand) {
            EntryData::Boolean(value) => EntryData::Integer(-i32::from(*value)),
            EntryData::Integer(value) => EntryData::Integer(crate::arith::negate(*value)?),
            EntryData::Float(value) => EntryData::Float(-*value),
            _ => return Err(RunError::UnexpectedType),
        };
        let entry = self.heap.alloc(result)?;
        self.pop_unref()?;
        self.push(entry);
        Ok(())
    }

    fn push_parameter(&mut self) -> RunResult<()> {
        let symbol = self.fetch_i32()?;
        let kind = match self.fetch_u8()? {
            parameter_kind::PLAIN => ParameterKind::Plain,
            parameter_kind::DEFAULTED => ParameterKind::Defaulted,
            parameter_kind::TUPLE_GROUP => ParameterKind::TupleGroup,
            parameter_kind::DICTIONARY_GROUP => ParameterKind::DictionaryGroup,
            _ => return Err(RunError::InvalidInstruction),
        };
        let default = if kind == ParameterKind::Defaulted {
            Some(self.pop()?)
        } else {
            None
        };
        let parameter = match self.heap.alloc(EntryData::Parameter { symbol, kind, default }) {
            Ok(parameter) => parameter,
            Err(error) => {
                if let Some(default) = default {
                    let _ = self.heap.unref(default);
                }
                return Err(error);
            }
        };
        let list = self.ensure_parameter_list()?;
        sequence::append(&mut self.heap, list, parameter)?;
        Ok(())
    }

    fn ensure_parameter_list(&mut self) -> RunResult<EntryId> {
        if let Some(list) = self.parameter_list {
            return Ok(list);
        }
        let list = crate::args::new_parameter_list(&mut self.heap)?;
        self.parameter_list = Some(list);
        Ok(list)
    }

    fn make_function(&mut self) -> RunResult<()> {
        let address = self.fetch_u32()?;
        let parameters = match self.parameter_list.take() {
            Some(list) => list,
            None => crate::args::new_parameter_list(&mut self.heap)?,
        };
        let module = self.current_module;
        self.heap.ref_(module);
        let function = self.heap.alloc(EntryData::ScriptFunction {
            address,
            parameters,
            module: Some(module),
        })?;
        self.push(function);
        Ok(())
    }

    pub(crate) fn find_module(&self, symbol: i32) -> RunResult<EntryId> {
        match tree::find_symbol(&self.heap, self.module_namespace, symbol)? {
            Some(node) => tree::node(&self.heap, node).value.ok_or(RunError::NameNotFound),
            None => Err(RunError::NameNotFound),
        }
    }

    fn enter_module(&mut self) -> RunResult<()> {
        let symbol = self.fetch_i32()?;
        let module = self.find_module(symbol)?;
        let address = match self.heap.get(module) {
            EntryData::Module { address, .. } => *address,
            _ => return Err(RunError::UnexpectedType),
        };
        let namespace = self.module_namespace_of(module)?;
        self.heap.ref_(module);
        self.heap.ref_(namespace);
        self.frames.push(Frame {
            kind: FrameKind::Module,
            return_pc: self.pc,
            namespace: self.local_namespace,
            module: self.current_module,
        });
        self.local_namespace = namespace;
        self.current_module = module;
        self.pc = address;
        Ok(())
    }

    fn exit_module(&mut self) -> RunResult<()> {
        match self.frames.last() {
            Some(frame) if frame.kind == FrameKind::Module => {}
            _ => return Err(RunError::InvalidContext),
        }
        let frame = self.frames.pop().expect("frame checked above");
        self.heap.unref(self.local_namespace)?;
        self.heap.unref(self.current_module)?;
        self.local_namespace = frame.namespace;
        self.current_module = frame.module;
        self.pc = frame.return_pc;
        Ok(())
    }
}
