//! The call path: argument accumulation, script and app function calls,
//! and return handling.

use crate::{
    args::{self, ParameterSource},
    engine::{AppCall, Engine, Frame, FrameKind, State},
    error::{RunError, RunResult, StepResult},
    heap::{EntryData, EntryId},
    instructions::Opcode,
};

impl<C> Engine<C> {
    pub(crate) fn ensure_argument_list(&mut self) -> RunResult<EntryId> {
        if let Some(list) = self.argument_list {
            return Ok(list);
        }
        let list = args::new_argument_list(&mut self.heap)?;
        self.argument_list = Some(list);
        Ok(list)
    }

    /// Handles the four argument-pushing instructions; each pops the value
    /// it appends or expands.
    pub(crate) fn push_argument(&mut self, opcode: Opcode) -> RunResult<()> {
        let symbol = if opcode == Opcode::PushNamedArgument {
            Some(self.fetch_i32()?)
        } else {
            None
        };
        let value = self.pop()?;
        let list = match self.ensure_argument_list() {
            Ok(list) => list,
            Err(error) => {
                let _ = self.heap.unref(value);
                return Err(error);
            }
        };
        match opcode {
            // Ownership of the popped value transfers to the list in every
            // outcome.
            Opcode::PushPositionalArgument => args::add_positional(&mut self.heap, list, value),
            Opcode::PushNamedArgument => {
                args::add_named(&mut self.heap, list, symbol.expect("symbol fetched above"), value)
            }
            Opcode::PushIterableGroupArgument => {
                let result = args::add_iterable_group(&mut self.heap, list, value);
                let _ = self.heap.unref(value);
                result
            }
            Opcode::PushDictionaryGroupArgument => {
                let result = args::add_dictionary_group(&mut self.heap, list, value);
                let _ = self.heap.unref(value);
                result
            }
            _ => Err(RunError::InvalidInstruction),
        }
    }

    /// Calls `function`, consuming the pending argument list and one
    /// reference to the function. Script calls push a frame and jump; app
    /// calls bind and dispatch (host-initiated app calls defer dispatch to
    /// the next step).
    pub(crate) fn call_function(&mut self, function: EntryId, from_host: bool) -> RunResult<StepResult> {
        let argument_list = match self.argument_list.take() {
            Some(list) => list,
            None => match args::new_argument_list(&mut self.heap) {
                Ok(list) => list,
                Err(error) => {
                    let _ = self.heap.unref(function);
                    return Err(error);
                }
            },
        };

        let target = match self.heap.get(function) {
            EntryData::ScriptFunction {
                address,
                parameters,
                module,
            } => Ok((Some((*address, *parameters, *module)), None)),
            EntryData::AppFunction { symbol } => Ok((None, Some(*symbol))),
            _ => Err(RunError::UnexpectedType),
        };
        let (script, app_symbol) = match target {
            Ok(target) => target,
            Err(error) => {
                let _ = self.heap.unref(argument_list);
                let _ = self.heap.unref(function);
                return Err(error);
            }
        };

        if let Some((address, parameters, module)) = script {
            let namespace = match args::bind(&mut self.heap, &ParameterSource::List(parameters), argument_list) {
                Ok(namespace) => namespace,
                Err(error) => {
                    let _ = self.heap.unref(function);
                    return Err(error);
                }
            };
            let callee_module = module.unwrap_or(self.main_module);
            self.heap.ref_(callee_module);
            self.frames.push(Frame {
                kind: if from_host { FrameKind::HostCall } else { FrameKind::ScriptCall },
                return_pc: self.pc,
                namespace: self.local_namespace,
                module: self.current_module,
            });
            self.local_namespace = namespace;
            self.current_module = callee_module;
            self.pc = address;
            self.heap.unref(function)?;
            return Ok(StepResult::Running);
        }

        let symbol = app_symbol.expect("either script or app target");
        let spec = &self.app_spec;
        let heap = &mut self.heap;
        let bind_result = match spec.function_parameters(symbol) {
            Ok(parameters) => args::bind(heap, &ParameterSource::Spec(parameters), argument_list),
            Err(error) => {
                let _ = heap.unref(argument_list);
                Err(error)
            }
        };
        let namespace = match bind_result {
            Ok(namespace) => namespace,
            Err(error) => {
                let _ = self.heap.unref(function);
                return Err(error);
            }
        };
        self.heap.unref(function)?;
        self.app_call = Some(AppCall {
            symbol,
            namespace,
            from_host,
        });
        self.state = State::AppCallPending;
        if from_host {
            // The host observes the pending call on its next step.
            return Ok(StepResult::Running);
        }
        self.run_app_call()
    }

    /// `value ->`: pops the frame and delivers the value to the caller.
    pub(crate) fn return_from_call(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let frame = match self.frames.last() {
            Some(frame) if frame.kind != FrameKind::Module => *frame,
            _ => {
                let _ = self.heap.unref(value);
                return Err(RunError::InvalidContext);
            }
        };
        self.frames.pop();
        self.heap.unref(self.local_namespace)?;
        self.heap.unref(self.current_module)?;
        self.local_namespace = frame.namespace;
        self.current_module = frame.module;
        self.pc = frame.return_pc;
        self.push(value);
        if frame.kind == FrameKind::HostCall {
            self.call_returning = true;
        }
        Ok(())
    }
}
