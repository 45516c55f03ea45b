//! Emission of executable images.
//!
//! `CodeBuilder` is the contract the offline compiler targets and the way
//! tests and hosts assemble programs: append instructions, patch forward
//! jumps, and finish with the application specification's check value.

use crate::{
    code::code_header,
    heap::ParameterKind,
    instructions::{Opcode, parameter_kind},
};

/// An unresolved forward jump returned by the jump emitters.
#[derive(Debug, Clone, Copy)]
#[must_use = "unpatched jumps target address zero"]
pub struct JumpLabel(usize);

/// Incremental builder for executable code.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    code: Vec<u8>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The address the next emitted instruction will occupy.
    #[must_use]
    pub fn address(&self) -> u32 {
        self.code.len() as u32
    }

    fn op(&mut self, opcode: Opcode) -> &mut Self {
        self.code.push(opcode as u8);
        self
    }

    fn u8_operand(&mut self, value: u8) -> &mut Self {
        self.code.push(value);
        self
    }

    fn i32_operand(&mut self, value: i32) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u32_operand(&mut self, value: u32) -> &mut Self {
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_none(&mut self) -> &mut Self {
        self.op(Opcode::PushNone)
    }

    pub fn push_ellipsis(&mut self) -> &mut Self {
        self.op(Opcode::PushEllipsis)
    }

    pub fn push_boolean(&mut self, value: bool) -> &mut Self {
        self.op(if value { Opcode::PushTrue } else { Opcode::PushFalse })
    }

    pub fn push_integer(&mut self, value: i32) -> &mut Self {
        self.op(Opcode::PushInteger).i32_operand(value)
    }

    pub fn push_float(&mut self, value: f64) -> &mut Self {
        self.op(Opcode::PushFloat);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_symbol(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::PushSymbol).i32_operand(symbol)
    }

    pub fn push_string(&mut self, bytes: &[u8]) -> &mut Self {
        self.op(Opcode::PushString).u32_operand(bytes.len() as u32);
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn build_range(&mut self, mask: u8) -> &mut Self {
        self.op(Opcode::BuildRange).u8_operand(mask)
    }

    pub fn new_tuple(&mut self) -> &mut Self {
        self.op(Opcode::NewTuple)
    }

    pub fn new_list(&mut self) -> &mut Self {
        self.op(Opcode::NewList)
    }

    pub fn new_set(&mut self) -> &mut Self {
        self.op(Opcode::NewSet)
    }

    pub fn new_dictionary(&mut self) -> &mut Self {
        self.op(Opcode::NewDictionary)
    }

    pub fn append_element(&mut self) -> &mut Self {
        self.op(Opcode::AppendElement)
    }

    pub fn insert_key_value(&mut self) -> &mut Self {
        self.op(Opcode::InsertKeyValue)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.op(Opcode::Dup)
    }

    pub fn swap(&mut self) -> &mut Self {
        self.op(Opcode::Swap)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.op(Opcode::Pop)
    }

    pub fn unary(&mut self, opcode: Opcode) -> &mut Self {
        self.op(opcode)
    }

    pub fn binary(&mut self, opcode: Opcode) -> &mut Self {
        self.op(opcode)
    }

    pub fn load_index(&mut self) -> &mut Self {
        self.op(Opcode::LoadIndex)
    }

    pub fn store_index(&mut self) -> &mut Self {
        self.op(Opcode::StoreIndex)
    }

    pub fn erase_index(&mut self) -> &mut Self {
        self.op(Opcode::EraseIndex)
    }

    pub fn load_member(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::LoadMember).i32_operand(symbol)
    }

    pub fn store_member(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::StoreMember).i32_operand(symbol)
    }

    pub fn unpack_sequence(&mut self, count: u8) -> &mut Self {
        self.op(Opcode::UnpackSequence).u8_operand(count)
    }

    /// Emits an unconditional jump to a known address.
    pub fn jump_to(&mut self, target: u32) -> &mut Self {
        self.op(Opcode::Jump).u32_operand(target)
    }

    /// Emits a forward jump to be patched later.
    pub fn jump(&mut self) -> JumpLabel {
        self.op(Opcode::Jump);
        self.placeholder()
    }

    pub fn jump_if_true(&mut self) -> JumpLabel {
        self.op(Opcode::JumpIfTrue);
        self.placeholder()
    }

    pub fn jump_if_false(&mut self) -> JumpLabel {
        self.op(Opcode::JumpIfFalse);
        self.placeholder()
    }

    pub fn make_iterator(&mut self, reversed: bool) -> &mut Self {
        self.op(Opcode::MakeIterator).u8_operand(u8::from(reversed))
    }

    pub fn iterator_test(&mut self) -> JumpLabel {
        self.op(Opcode::IteratorTest);
        self.placeholder()
    }

    pub fn iterator_dereference(&mut self) -> &mut Self {
        self.op(Opcode::IteratorDereference)
    }

    pub fn iterator_advance(&mut self) -> &mut Self {
        self.op(Opcode::IteratorAdvance)
    }

    pub fn push_positional_argument(&mut self) -> &mut Self {
        self.op(Opcode::PushPositionalArgument)
    }

    pub fn push_named_argument(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::PushNamedArgument).i32_operand(symbol)
    }

    pub fn push_iterable_group_argument(&mut self) -> &mut Self {
        self.op(Opcode::PushIterableGroupArgument)
    }

    pub fn push_dictionary_group_argument(&mut self) -> &mut Self {
        self.op(Opcode::PushDictionaryGroupArgument)
    }

    pub fn call(&mut self) -> &mut Self {
        self.op(Opcode::Call)
    }

    pub fn return_(&mut self) -> &mut Self {
        self.op(Opcode::Return)
    }

    pub fn push_parameter(&mut self, symbol: i32, kind: ParameterKind) -> &mut Self {
        let kind = match kind {
            ParameterKind::Plain => parameter_kind::PLAIN,
            ParameterKind::Defaulted => parameter_kind::DEFAULTED,
            ParameterKind::TupleGroup => parameter_kind::TUPLE_GROUP,
            ParameterKind::DictionaryGroup => parameter_kind::DICTIONARY_GROUP,
        };
        self.op(Opcode::PushParameter).i32_operand(symbol).u8_operand(kind)
    }

    pub fn make_function(&mut self, address: u32) -> &mut Self {
        self.op(Opcode::MakeFunction).u32_operand(address)
    }

    pub fn load_variable(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::LoadVariable).i32_operand(symbol)
    }

    pub fn store_variable(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::StoreVariable).i32_operand(symbol)
    }

    pub fn erase_variable(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::EraseVariable).i32_operand(symbol)
    }

    pub fn add_module(&mut self, symbol: i32, address: u32) -> &mut Self {
        self.op(Opcode::AddModule).i32_operand(symbol).u32_operand(address)
    }

    pub fn enter_module(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::EnterModule).i32_operand(symbol)
    }

    pub fn exit_module(&mut self) -> &mut Self {
        self.op(Opcode::ExitModule)
    }

    pub fn load_module(&mut self, symbol: i32) -> &mut Self {
        self.op(Opcode::LoadModule).i32_operand(symbol)
    }

    pub fn end(&mut self) -> &mut Self {
        self.op(Opcode::End)
    }

    fn placeholder(&mut self) -> JumpLabel {
        let label = JumpLabel(self.code.len());
        self.code.extend_from_slice(&0u32.to_le_bytes());
        label
    }

    /// Points a previously emitted jump at the current address.
    pub fn patch(&mut self, label: JumpLabel) {
        let target = self.address();
        self.patch_to(label, target);
    }

    /// Points a previously emitted jump at an explicit address.
    pub fn patch_to(&mut self, label: JumpLabel, target: u32) {
        self.code[label.0..label.0 + 4].copy_from_slice(&target.to_le_bytes());
    }

    /// Produces the complete executable image: header plus body.
    #[must_use]
    pub fn finish(self, check_value: u32) -> Vec<u8> {
        let mut image = Vec::with_capacity(self.code.len() + 12);
        image.extend_from_slice(&code_header(check_value));
        image.extend_from_slice(&self.code);
        image
    }
}
