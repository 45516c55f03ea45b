//! The instruction set.
//!
//! One-byte opcodes followed by little-endian operands. Program counter
//! addresses in jump operands are absolute (relative to the first
//! instruction of the executable body).

use num_enum::TryFromPrimitive;

/// Operation codes.
///
/// Stack effects are noted as `pops -> pushes`. `Call` additionally consumes
/// the engine's pending argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, strum::Display, strum::IntoStaticStr)]
#[repr(u8)]
pub enum Opcode {
    /// `-> none`
    PushNone = 0x01,
    /// `-> ellipsis`
    PushEllipsis = 0x02,
    /// `-> true`
    PushTrue = 0x03,
    /// `-> false`
    PushFalse = 0x04,
    /// i32 operand. `-> integer`
    PushInteger = 0x05,
    /// f64 operand. `-> float`
    PushFloat = 0x06,
    /// i32 operand. `-> symbol`
    PushSymbol = 0x07,
    /// u32 length + raw bytes. `-> string`
    PushString = 0x08,
    /// u8 mask operand (bit 0 start, bit 1 end, bit 2 step); pops the
    /// components the mask declares, pushed in start, end, step order.
    /// `components... -> range`
    BuildRange = 0x09,
    /// `-> tuple`
    NewTuple = 0x0A,
    /// `-> list`
    NewList = 0x0B,
    /// `-> set`
    NewSet = 0x0C,
    /// `-> dictionary`
    NewDictionary = 0x0D,
    /// `container value -> container`
    AppendElement = 0x0E,
    /// `container key value -> container`
    InsertKeyValue = 0x0F,
    /// `a -> a a`
    Dup = 0x10,
    /// `a b -> b a`
    Swap = 0x11,
    /// `a ->`
    Pop = 0x12,
    /// `a -> -a`
    Negate = 0x13,
    /// `a -> not a`
    LogicalNot = 0x14,
    Add = 0x15,
    Subtract = 0x16,
    Multiply = 0x17,
    /// True division; always produces a float.
    Divide = 0x18,
    FloorDivide = 0x19,
    Modulo = 0x1A,
    Power = 0x1B,
    Equal = 0x20,
    NotEqual = 0x21,
    Less = 0x22,
    LessOrEqual = 0x23,
    Greater = 0x24,
    GreaterOrEqual = 0x25,
    /// Membership test. `value container -> boolean`
    In = 0x26,
    NotIn = 0x27,
    /// `container index -> value`
    LoadIndex = 0x28,
    /// `container index value ->`
    StoreIndex = 0x29,
    /// `container index ->`
    EraseIndex = 0x2A,
    /// i32 symbol operand. `module -> value`
    LoadMember = 0x2B,
    /// i32 symbol operand. `module value ->`
    StoreMember = 0x2C,
    /// u8 count operand; destructuring assignment. Pops a tuple or list of
    /// exactly `count` elements and pushes them with the first element on
    /// top, ready for consecutive stores. A length mismatch reports
    /// `SequenceMismatch`. `sequence -> e(n-1) ... e0`
    UnpackSequence = 0x2D,
    /// u32 target operand.
    Jump = 0x30,
    /// u32 target operand. `condition ->`
    JumpIfTrue = 0x31,
    /// u32 target operand. `condition ->`
    JumpIfFalse = 0x32,
    /// u8 reversed operand. `iterable -> iterator`
    MakeIterator = 0x33,
    /// u32 target operand; jumps when the iterator is at its end.
    /// `iterator -> iterator`
    IteratorTest = 0x34,
    /// `iterator -> iterator value`
    IteratorDereference = 0x35,
    /// `iterator -> iterator`
    IteratorAdvance = 0x36,
    /// `value ->` (appends to the pending argument list)
    PushPositionalArgument = 0x38,
    /// i32 symbol operand. `value ->`
    PushNamedArgument = 0x39,
    /// `iterable ->` (expands into positional arguments)
    PushIterableGroupArgument = 0x3A,
    /// `dictionary ->` (expands into named arguments)
    PushDictionaryGroupArgument = 0x3B,
    /// `function -> result` (result arrives on return)
    Call = 0x3C,
    /// `value ->` (pops the frame, delivers the value to the caller)
    Return = 0x3D,
    /// i32 symbol + u8 kind operands; a defaulted kind pops the default.
    /// Appends to the pending parameter list.
    PushParameter = 0x3E,
    /// u32 address operand; consumes the pending parameter list.
    /// `-> function`
    MakeFunction = 0x3F,
    /// i32 symbol operand. `-> value`
    LoadVariable = 0x40,
    /// i32 symbol operand. `value ->`
    StoreVariable = 0x41,
    /// i32 symbol operand.
    EraseVariable = 0x42,
    /// i32 symbol + u32 address operands; defines a module.
    AddModule = 0x43,
    /// i32 symbol operand; runs the module body in its namespace.
    EnterModule = 0x44,
    /// Returns from a module body.
    ExitModule = 0x45,
    /// i32 symbol operand. `-> module`
    LoadModule = 0x46,
    /// Marks successful completion.
    End = 0x50,
}

/// Parameter kind operand values for [`Opcode::PushParameter`].
pub mod parameter_kind {
    pub const PLAIN: u8 = 0;
    pub const DEFAULTED: u8 = 1;
    pub const TUPLE_GROUP: u8 = 2;
    pub const DICTIONARY_GROUP: u8 = 3;
}

/// Range component mask bits for [`Opcode::BuildRange`].
pub mod range_mask {
    pub const START: u8 = 0x01;
    pub const END: u8 = 0x02;
    pub const STEP: u8 = 0x04;
}
