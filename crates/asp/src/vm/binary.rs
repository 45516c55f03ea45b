//! Binary arithmetic and comparison instructions.
//!
//! Operands are peeked, the result is computed, and only then are the
//! operands popped: a failed operation (overflow, divide by zero, type
//! error) leaves the stack exactly as it was.

use std::cmp::Ordering;

use crate::{
    arith, compare,
    engine::Engine,
    error::{RunError, RunResult},
    heap::{DataType, EntryData, EntryId, Heap},
    instructions::Opcode,
    sequence, value,
};

enum Numeric {
    Integer(i32),
    Float(f64),
}

fn numeric(heap: &Heap, id: EntryId) -> Option<Numeric> {
    match heap.get(id) {
        EntryData::Boolean(value) => Some(Numeric::Integer(i32::from(*value))),
        EntryData::Integer(value) => Some(Numeric::Integer(*value)),
        EntryData::Float(value) => Some(Numeric::Float(*value)),
        _ => None,
    }
}

impl<C> Engine<C> {
    pub(crate) fn binary_op(&mut self, opcode: Opcode) -> RunResult<()> {
        let right = self.peek(0)?;
        let left = self.peek(1)?;

        let result = match opcode {
            Opcode::Equal | Opcode::NotEqual => {
                let equal = compare::equal(&self.heap, left, right)?;
                self.heap.new_boolean(equal == (opcode == Opcode::Equal))
            }
            Opcode::Less | Opcode::LessOrEqual | Opcode::Greater | Opcode::GreaterOrEqual => {
                let order = compare::relational_order(&self.heap, left, right)?;
                let truth = match opcode {
                    Opcode::Less => order == Ordering::Less,
                    Opcode::LessOrEqual => order != Ordering::Greater,
                    Opcode::Greater => order == Ordering::Greater,
                    _ => order != Ordering::Less,
                };
                self.heap.new_boolean(truth)
            }
            _ => self.arithmetic(opcode, left, right)?,
        };

        self.pop_unref()?;
        self.pop_unref()?;
        self.push(result);
        Ok(())
    }

    fn arithmetic(&mut self, opcode: Opcode, left: EntryId, right: EntryId) -> RunResult<EntryId> {
        if let (Some(a), Some(b)) = (numeric(&self.heap, left), numeric(&self.heap, right)) {
            let data = numeric_arithmetic(opcode, a, b)?;
            return self.heap.alloc(data);
        }

        // Sequence concatenation, repetition, and string formatting.
        match opcode {
            Opcode::Add => self.concatenate(left, right),
            Opcode::Modulo if self.heap.data_type(left) == DataType::String => self.format_string(left, right),
            Opcode::Multiply => {
                if let Some(Numeric::Integer(count)) = numeric(&self.heap, right) {
                    self.repeat(left, count)
                } else if let Some(Numeric::Integer(count)) = numeric(&self.heap, left) {
                    self.repeat(right, count)
                } else {
                    Err(RunError::UnexpectedType)
                }
            }
            _ => Err(RunError::UnexpectedType),
        }
    }

    /// `template % arguments`: printf-style formatting. The arguments are a
    /// tuple consumed left to right, or a single value. Directives: `%d`/`%i`
    /// integer, `%f` fixed-point float, `%x` hexadecimal, `%s` display form,
    /// `%r` canonical representation, `%%` a literal percent.
    fn format_string(&mut self, template_id: EntryId, arguments_id: EntryId) -> RunResult<EntryId> {
        let template = sequence::string_bytes(&self.heap, template_id)?;
        let arguments: Vec<EntryId> = if self.heap.data_type(arguments_id) == DataType::Tuple {
            let limit = self.heap.cycle_detection_limit();
            let mut iterations: u32 = 0;
            let mut collected = Vec::new();
            let mut current = sequence::header(&self.heap, arguments_id)?.head;
            while let Some(element) = current {
                iterations += 1;
                if iterations > limit {
                    return Err(RunError::CycleDetected);
                }
                collected.push(sequence::element_value(&self.heap, element));
                current = sequence::next_in_chain(&self.heap, element);
            }
            collected
        } else {
            vec![arguments_id]
        };

        let mut out = Vec::with_capacity(template.len());
        let mut next = 0usize;
        let mut position = 0usize;
        while position < template.len() {
            let byte = template[position];
            position += 1;
            if byte != b'%' {
                out.push(byte);
                continue;
            }
            let Some(&directive) = template.get(position) else {
                return Err(RunError::InvalidFormatString);
            };
            position += 1;
            if directive == b'%' {
                out.push(b'%');
                continue;
            }
            let argument = *arguments.get(next).ok_or(RunError::StringFormattingError)?;
            next += 1;
            match directive {
                b'd' | b'i' => {
                    let number = value::to_integer(&self.heap, argument, false)
                        .map_err(|_| RunError::StringFormattingError)?;
                    out.extend_from_slice(number.to_string().as_bytes());
                }
                b'x' => {
                    let number = value::to_integer(&self.heap, argument, false)
                        .map_err(|_| RunError::StringFormattingError)?;
                    out.extend_from_slice(format!("{number:x}").as_bytes());
                }
                b'f' => {
                    let number =
                        value::to_float(&self.heap, argument).map_err(|_| RunError::StringFormattingError)?;
                    out.extend_from_slice(format!("{number:.6}").as_bytes());
                }
                b's' => out.extend_from_slice(&value::to_display_bytes(&self.heap, argument)?),
                b'r' => out.extend_from_slice(&value::to_repr_bytes(&self.heap, argument)?),
                _ => return Err(RunError::InvalidFormatString),
            }
        }
        if next != arguments.len() {
            return Err(RunError::StringFormattingError);
        }
        value::new_string(&mut self.heap, &out)
    }

    fn concatenate(&mut self, left: EntryId, right: EntryId) -> RunResult<EntryId> {
        let types = (self.heap.data_type(left), self.heap.data_type(right));
        match types {
            (DataType::String, DataType::String) => {
                let mut bytes = sequence::string_bytes(&self.heap, left)?;
                bytes.extend(sequence::string_bytes(&self.heap, right)?);
                value::new_string(&mut self.heap, &bytes)
            }
            (DataType::Tuple, DataType::Tuple) => {
                let result = value::new_tuple(&mut self.heap)?;
                self.extend_both(result, left, right)
            }
            (DataType::List, DataType::List) => {
                let result = value::new_list(&mut self.heap)?;
                self.extend_both(result, left, right)
            }
            _ => Err(RunError::UnexpectedType),
        }
    }

    fn extend_both(&mut self, result: EntryId, left: EntryId, right: EntryId) -> RunResult<EntryId> {
        if let Err(error) = self
            .extend_sequence(result, left)
            .and_then(|()| self.extend_sequence(result, right))
        {
            let _ = self.heap.unref(result);
            return Err(error);
        }
        Ok(result)
    }

    fn extend_sequence(&mut self, target: EntryId, source: EntryId) -> RunResult<()> {
        let limit = self.heap.cycle_detection_limit();
        let mut iterations: u32 = 0;
        let mut current = sequence::header(&self.heap, source)?.head;
        while let Some(element) = current {
            iterations += 1;
            if iterations > limit {
                return Err(RunError::CycleDetected);
            }
            let value = sequence::element_value(&self.heap, element);
            self.heap.ref_(value);
            sequence::append(&mut self.heap, target, value)?;
            current = sequence::next_in_chain(&self.heap, element);
        }
        Ok(())
    }

    fn repeat(&mut self, source: EntryId, count: i32) -> RunResult<EntryId> {
        let count = count.max(0);
        match self.heap.data_type(source) {
            DataType::String => {
                let bytes = sequence::string_bytes(&self.heap, source)?;
                let mut repeated = Vec::with_capacity(bytes.len() * count as usize);
                for _ in 0..count {
                    repeated.extend_from_slice(&bytes);
                }
                value::new_string(&mut self.heap, &repeated)
            }
            DataType::Tuple => {
                let result = value::new_tuple(&mut self.heap)?;
                self.repeat_into(result, source, count)
            }
            DataType::List => {
                let result = value::new_list(&mut self.heap)?;
                self.repeat_into(result, source, count)
            }
            _ => Err(RunError::UnexpectedType),
        }
    }

    fn repeat_into(&mut self, result: EntryId, source: EntryId, count: i32) -> RunResult<EntryId> {
        for _ in 0..count {
            if let Err(error) = self.extend_sequence(result, source) {
                let _ = self.heap.unref(result);
                return Err(error);
            }
        }
        Ok(result)
    }
}

fn numeric_arithmetic(opcode: Opcode, a: Numeric, b: Numeric) -> RunResult<EntryData> {
    // True division always promotes to float.
    if opcode == Opcode::Divide {
        return match (&a, &b) {
            (Numeric::Integer(_), Numeric::Integer(0)) => Err(RunError::DivideByZero),
            _ => Ok(EntryData::Float(as_float(&a) / as_float(&b))),
        };
    }

    match (a, b) {
        (Numeric::Integer(a), Numeric::Integer(b)) => integer_arithmetic(opcode, a, b),
        (a, b) => Ok(EntryData::Float(float_arithmetic(opcode, as_float(&a), as_float(&b)))),
    }
}

fn as_float(value: &Numeric) -> f64 {
    match value {
        Numeric::Integer(value) => f64::from(*value),
        Numeric::Float(value) => *value,
    }
}

fn integer_arithmetic(opcode: Opcode, a: i32, b: i32) -> RunResult<EntryData> {
    Ok(match opcode {
        Opcode::Add => EntryData::Integer(arith::add(a, b)?),
        Opcode::Subtract => EntryData::Integer(arith::subtract(a, b)?),
        Opcode::Multiply => EntryData::Integer(arith::multiply(a, b)?),
        Opcode::FloorDivide => EntryData::Integer(arith::floor_divide(a, b)?),
        Opcode::Modulo => EntryData::Integer(arith::modulo(a, b)?),
        Opcode::Power => {
            if b < 0 {
                EntryData::Float(f64::from(a).powi(b))
            } else {
                EntryData::Integer(arith::power(a, b)?)
            }
        }
        _ => return Err(RunError::InvalidInstruction),
    })
}

fn float_arithmetic(opcode: Opcode, a: f64, b: f64) -> f64 {
    match opcode {
        Opcode::Add => a + b,
        Opcode::Subtract => a - b,
        Opcode::Multiply => a * b,
        Opcode::FloorDivide => arith::float_floor_divide(a, b),
        Opcode::Modulo => arith::float_modulo(a, b),
        Opcode::Power => a.powf(b),
        _ => f64::NAN,
    }
}
