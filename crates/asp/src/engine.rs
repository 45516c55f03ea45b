//! The engine: state machine, initialization, code loading, and the step
//! entry point.
//!
//! One engine owns one data heap and executes one program. Lifecycle:
//! construction leaves the engine `Loading`; code arrives through
//! [`Engine::add_code`]/[`Engine::seal`] (or the adopt/paged variants) and
//! sealing moves to `Ready`; [`Engine::step`] executes one instruction at a
//! time until `Complete` or an error latches; [`Engine::reset`] frees the
//! run's entries and returns to `Ready`. Errors latch: once latched, `step`
//! keeps returning the same error until reset.

use crate::{
    appspec::{AppReturn, AppSpec, SpecEntry},
    code::{CodeArea, CodeReader},
    error::{AddCodeError, ErrorReport, RunError, RunResult, StepResult},
    heap::{DEFAULT_CYCLE_DETECTION_LIMIT, EntryData, EntryId, Heap, STRING_FRAGMENT_CAPACITY},
    tree::{self, NodeKey},
    value,
};

/// Symbol reserved for the script arguments tuple.
pub const SYSTEM_ARGUMENTS_SYMBOL: i32 = -1;

/// First symbol handed out by [`Engine::next_symbol`]; later calls count
/// downward.
const NEXT_SYMBOL_START: i32 = -2;

/// Construction parameters for an engine.
#[derive(Debug, Clone, Copy)]
pub struct EngineParams {
    /// Number of data heap entries, fixed for the engine's lifetime.
    pub data_entry_count: usize,
    /// Bound on the streamed code buffer; `None` grows with the stream.
    pub code_capacity: Option<usize>,
    /// Effective string fragment capacity, at most
    /// [`STRING_FRAGMENT_CAPACITY`].
    pub fragment_capacity: usize,
    /// Iteration bound for container traversals.
    pub cycle_detection_limit: u32,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            data_entry_count: 2048,
            code_capacity: None,
            fragment_capacity: STRING_FRAGMENT_CAPACITY,
            cycle_detection_limit: DEFAULT_CYCLE_DETECTION_LIMIT,
        }
    }
}

/// Public view of the engine's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize)]
pub enum EngineState {
    Loading,
    Ready,
    Running,
    AppCallPending,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum State {
    Loading,
    Ready,
    Running,
    AppCallPending,
    Complete,
    Error(RunError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// A script-to-script call.
    ScriptCall,
    /// A call initiated by the host through [`Engine::call`].
    HostCall,
    /// A module body entered through its module instruction.
    Module,
}

/// One call stack frame: what to restore when the callee returns.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub kind: FrameKind,
    pub return_pc: u32,
    /// The caller's local namespace; ownership moves into the frame.
    pub namespace: EntryId,
    /// The caller's module; ownership moves into the frame.
    pub module: EntryId,
}

/// A pending app function invocation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppCall {
    pub symbol: i32,
    /// The bound parameter namespace; owned by the pending call.
    pub namespace: EntryId,
    pub from_host: bool,
}

/// An Asp execution engine.
///
/// `C` is the host context made available to app functions through
/// [`Engine::context`]/[`Engine::context_mut`] and to the paged code reader.
pub struct Engine<C> {
    context: C,
    pub(crate) app_spec: AppSpec<C>,
    pub(crate) heap: Heap,
    pub(crate) code: CodeArea<C>,
    params: EngineParams,
    pub(crate) state: State,
    pub(crate) pc: u32,
    pub(crate) stack: Vec<EntryId>,
    pub(crate) frames: Vec<Frame>,
    /// Namespace holding spec-declared variables and functions, plus the
    /// script arguments tuple.
    pub(crate) system_namespace: EntryId,
    /// Namespace mapping module symbols to module entries.
    pub(crate) module_namespace: EntryId,
    pub(crate) main_module: EntryId,
    /// Current local namespace; the engine owns one reference.
    pub(crate) local_namespace: EntryId,
    /// Current module; the engine owns one reference.
    pub(crate) current_module: EntryId,
    /// Pending argument list being built for the next call.
    pub(crate) argument_list: Option<EntryId>,
    /// Pending parameter list being built for the next function definition.
    pub(crate) parameter_list: Option<EntryId>,
    pub(crate) app_call: Option<AppCall>,
    /// Namespace of the app function currently being dispatched.
    pub(crate) app_function_namespace: Option<EntryId>,
    pub(crate) call_returning: bool,
    pub(crate) again: bool,
    in_step: bool,
    next_symbol: i32,
    #[cfg(feature = "trace")]
    pub(crate) trace_sink: Option<Box<dyn std::io::Write>>,
}

/// Root entries established at heap initialization.
struct Roots {
    system_namespace: EntryId,
    module_namespace: EntryId,
    main_module: EntryId,
    main_namespace: EntryId,
}

/// Builds a fresh heap and populates the system namespace from the
/// application specification. Shared by construction and reset.
fn initialize_heap<C>(params: &EngineParams, app_spec: &AppSpec<C>) -> Result<(Heap, Roots), RunError> {
    let mut heap = Heap::new(
        params.data_entry_count,
        params.fragment_capacity,
        params.cycle_detection_limit,
    )?;

    let system_namespace = value::new_namespace(&mut heap)?;
    let module_namespace = value::new_namespace(&mut heap)?;
    let main_namespace = value::new_namespace(&mut heap)?;
    let main_module = heap.alloc(EntryData::Module {
        address: 0,
        namespace: main_namespace,
    })?;

    // Expose every spec definition to the script through the system
    // namespace. Bare symbol declarations stay unbound.
    for (symbol, entry) in app_spec.entries() {
        let bound = match entry {
            SpecEntry::Symbol => continue,
            SpecEntry::Variable(literal) => literal.instantiate(&mut heap)?,
            SpecEntry::Function(_) => heap.alloc(EntryData::AppFunction { symbol })?,
        };
        let outcome = tree::try_insert(&mut heap, system_namespace, NodeKey::Symbol(symbol), Some(bound))?;
        if !outcome.inserted {
            return Err(RunError::InitializationError);
        }
    }

    // The engine's current-namespace and current-module references.
    heap.ref_(main_namespace);
    heap.ref_(main_module);

    Ok((
        heap,
        Roots {
            system_namespace,
            module_namespace,
            main_module,
            main_namespace,
        },
    ))
}

impl<C> Engine<C> {
    /// Builds an engine over a parsed application specification, leaving it
    /// in the `Loading` state.
    pub fn new(app_spec: AppSpec<C>, context: C, params: EngineParams) -> Result<Self, RunError> {
        let (heap, roots) = initialize_heap(&params, &app_spec)?;
        Ok(Self {
            context,
            app_spec,
            heap,
            code: CodeArea::new(params.code_capacity),
            params,
            state: State::Loading,
            pc: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            system_namespace: roots.system_namespace,
            module_namespace: roots.module_namespace,
            main_module: roots.main_module,
            local_namespace: roots.main_namespace,
            current_module: roots.main_module,
            argument_list: None,
            parameter_list: None,
            app_call: None,
            app_function_namespace: None,
            call_returning: false,
            again: false,
            in_step: false,
            next_symbol: NEXT_SYMBOL_START,
            #[cfg(feature = "trace")]
            trace_sink: None,
        })
    }

    /// The host context.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// The host context, mutably.
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// The application specification the engine was built with.
    pub fn app_spec(&self) -> &AppSpec<C> {
        &self.app_spec
    }

    /// Public lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        match self.state {
            State::Loading => EngineState::Loading,
            State::Ready => EngineState::Ready,
            State::Running => EngineState::Running,
            State::AppCallPending => EngineState::AppCallPending,
            State::Complete => EngineState::Complete,
            State::Error(_) => EngineState::Error,
        }
    }

    /// The latched error, if any.
    #[must_use]
    pub fn error(&self) -> Option<RunError> {
        match self.state {
            State::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Error plus program counter for diagnostics.
    #[must_use]
    pub fn error_report(&self) -> Option<ErrorReport> {
        self.error().map(|error| ErrorReport { error, pc: self.pc })
    }

    /// True when the engine accepts `step` calls that make progress.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, State::Ready | State::Running | State::AppCallPending)
    }

    /// True after sealing, before the first step.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, State::Ready)
    }

    /// True while the program is executing.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running | State::AppCallPending)
    }

    /// Current program counter.
    #[must_use]
    pub fn program_counter(&self) -> u32 {
        self.pc
    }

    /// Lowest heap free count observed since initialization.
    #[must_use]
    pub fn low_free_count(&self) -> usize {
        self.heap.low_free_count()
    }

    /// Current heap free count.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.heap.free_count()
    }

    /// Diagnostic heap snapshot.
    #[must_use]
    pub fn heap_stats(&self) -> crate::heap::HeapStats {
        self.heap.stats()
    }

    /// Iteration bound for container traversals.
    #[must_use]
    pub fn cycle_detection_limit(&self) -> u32 {
        self.heap.cycle_detection_limit()
    }

    pub fn set_cycle_detection_limit(&mut self, limit: u32) {
        self.heap.set_cycle_detection_limit(limit);
    }

    /// Version quad of the loaded executable.
    #[must_use]
    pub fn code_version(&self) -> [u8; 4] {
        self.code.version()
    }

    /// Number of code page reads performed, optionally resetting the
    /// counter.
    pub fn code_page_read_count(&mut self, reset: bool) -> u64 {
        self.code.page_read_count(reset)
    }

    // --- Code loading ---------------------------------------------------

    /// Appends streamed code bytes.
    pub fn add_code(&mut self, bytes: &[u8]) -> Result<(), AddCodeError> {
        if !matches!(self.state, State::Loading) {
            return Err(AddCodeError::InvalidState);
        }
        self.code.add(bytes)
    }

    /// Seals streamed code and moves to `Ready`.
    pub fn seal(&mut self) -> Result<(), AddCodeError> {
        if !matches!(self.state, State::Loading) {
            return Err(AddCodeError::InvalidState);
        }
        match self.code.seal(self.app_spec.check_value()) {
            Ok(()) => {
                self.state = State::Ready;
                Ok(())
            }
            Err(error) => {
                self.state = State::Error(RunError::InitializationError);
                Err(error)
            }
        }
    }

    /// Adopts a complete executable image and moves to `Ready`.
    pub fn seal_code(&mut self, image: &[u8]) -> Result<(), AddCodeError> {
        if !matches!(self.state, State::Loading) {
            return Err(AddCodeError::InvalidState);
        }
        match self.code.seal_with(image, self.app_spec.check_value()) {
            Ok(()) => {
                self.state = State::Ready;
                Ok(())
            }
            Err(error) => {
                self.state = State::Error(RunError::InitializationError);
                Err(error)
            }
        }
    }

    /// Configures demand paging. Must precede [`Engine::page_code`].
    pub fn set_code_paging(
        &mut self,
        page_count: usize,
        page_size: usize,
        reader: CodeReader<C>,
    ) -> Result<(), AddCodeError> {
        if !matches!(self.state, State::Loading) {
            return Err(AddCodeError::InvalidState);
        }
        self.code.set_paging(page_count, page_size, reader)
    }

    /// Seals in paged mode: validates the header through the reader and
    /// moves to `Ready`.
    pub fn page_code(&mut self) -> Result<(), AddCodeError> {
        if !matches!(self.state, State::Loading) {
            return Err(AddCodeError::InvalidState);
        }
        let check = self.app_spec.check_value();
        let (code, context) = (&mut self.code, &mut self.context);
        match code.seal_paged(context, check) {
            Ok(()) => {
                self.state = State::Ready;
                Ok(())
            }
            Err(error) => {
                self.state = State::Error(RunError::InitializationError);
                Err(error)
            }
        }
    }

    // --- Arguments and symbols ------------------------------------------

    /// Binds the script arguments tuple (symbol −1 in the system namespace).
    /// Call after sealing and before the first step.
    pub fn set_arguments<S: AsRef<str>>(&mut self, arguments: &[S]) -> RunResult<()> {
        if !matches!(self.state, State::Ready) {
            return Err(RunError::InvalidState);
        }
        let tuple = value::new_tuple(&mut self.heap)?;
        for argument in arguments {
            let entry = match value::new_string(&mut self.heap, argument.as_ref().as_bytes()) {
                Ok(entry) => entry,
                Err(error) => {
                    let _ = self.heap.unref(tuple);
                    return Err(error);
                }
            };
            if let Err(error) = crate::sequence::append(&mut self.heap, tuple, entry) {
                let _ = self.heap.unref(tuple);
                return Err(error);
            }
        }
        self.store_in_namespace(self.system_namespace, SYSTEM_ARGUMENTS_SYMBOL, tuple)
    }

    /// The script arguments tuple, if one was bound.
    #[must_use]
    pub fn arguments(&self) -> Option<EntryId> {
        tree::find_symbol(&self.heap, self.system_namespace, SYSTEM_ARGUMENTS_SYMBOL)
            .ok()
            .flatten()
            .and_then(|node| tree::node(&self.heap, node).value)
    }

    /// Hands out a fresh app-reserved symbol, counting downward.
    pub fn next_symbol(&mut self) -> i32 {
        let symbol = self.next_symbol;
        self.next_symbol -= 1;
        symbol
    }

    // --- Execution ------------------------------------------------------

    /// Executes one instruction (or retries a pending app call). Errors
    /// latch and repeat until [`Engine::reset`].
    pub fn step(&mut self) -> RunResult<StepResult> {
        match self.state {
            State::Loading => return Err(RunError::InvalidState),
            State::Complete => return Ok(StepResult::Complete),
            State::Error(error) => return Err(error),
            State::Ready => self.state = State::Running,
            State::Running | State::AppCallPending => {}
        }

        self.in_step = true;
        let start_pc = self.pc;
        let result = if matches!(self.state, State::AppCallPending) {
            self.run_app_call()
        } else {
            self.execute_instruction()
        };
        self.in_step = false;

        match result {
            Ok(StepResult::Complete) => {
                self.state = State::Complete;
                Ok(StepResult::Complete)
            }
            Ok(StepResult::Running) => Ok(StepResult::Running),
            Err(error) => {
                // The failed instruction is not committed.
                if !matches!(self.state, State::AppCallPending) {
                    self.pc = start_pc;
                }
                self.state = State::Error(error);
                Err(error)
            }
        }
    }

    /// Invokes (or re-invokes) the pending app function.
    pub(crate) fn run_app_call(&mut self) -> RunResult<StepResult> {
        let call = self.app_call.ok_or(RunError::InternalError)?;
        let dispatch = self.app_spec.dispatch();
        self.app_function_namespace = Some(call.namespace);
        self.state = State::Running;
        let outcome = dispatch(self, call.symbol, call.namespace);
        self.app_function_namespace = None;
        match outcome {
            Ok(AppReturn::Value(value)) => {
                self.again = false;
                self.app_call = None;
                self.heap.unref(call.namespace)?;
                self.stack.push(value);
                if call.from_host {
                    self.call_returning = true;
                }
                Ok(StepResult::Running)
            }
            Ok(AppReturn::Again) => {
                self.again = true;
                self.state = State::AppCallPending;
                Ok(StepResult::Running)
            }
            Err(error) => {
                self.again = false;
                self.app_call = None;
                let _ = self.heap.unref(call.namespace);
                Err(error)
            }
        }
    }

    /// True when the pending app function is being re-invoked after
    /// returning `Again`.
    #[must_use]
    pub fn again(&self) -> bool {
        self.again
    }

    /// True once a host-initiated call has produced its return value.
    #[must_use]
    pub fn is_call_returning(&self) -> bool {
        self.call_returning
    }

    pub(crate) fn in_step(&self) -> bool {
        self.in_step
    }

    // --- Reset ----------------------------------------------------------

    /// Discards everything the program built — working stack, call frames,
    /// namespaces, pending lists, even reference cycles scripts created —
    /// and returns to `Ready` with the full post-initialization free count.
    ///
    /// The heap is rebuilt from the application specification, so script
    /// arguments must be bound again before the next run. App object
    /// destructors run for every live app object.
    pub fn reset(&mut self) -> RunResult<()> {
        if !self.code.is_sealed() {
            return Err(RunError::InvalidState);
        }

        self.heap.run_remaining_destructors();
        let (heap, roots) = initialize_heap(&self.params, &self.app_spec)?;
        self.heap = heap;
        self.stack.clear();
        self.frames.clear();
        self.argument_list = None;
        self.parameter_list = None;
        self.app_call = None;
        self.app_function_namespace = None;
        self.system_namespace = roots.system_namespace;
        self.module_namespace = roots.module_namespace;
        self.main_module = roots.main_module;
        self.local_namespace = roots.main_namespace;
        self.current_module = roots.main_module;

        self.pc = 0;
        self.call_returning = false;
        self.again = false;
        self.state = State::Ready;
        Ok(())
    }

    // --- Namespace plumbing ---------------------------------------------

    /// The namespace entry of a module entry.
    pub(crate) fn module_namespace_of(&self, module: EntryId) -> RunResult<EntryId> {
        match self.heap.get(module) {
            EntryData::Module { namespace, .. } => Ok(*namespace),
            _ => Err(RunError::UnexpectedType),
        }
    }

    /// Looks a symbol up through the namespace chain: local, then the
    /// current module's globals, then the system namespace.
    pub(crate) fn lookup_variable(&self, symbol: i32) -> RunResult<EntryId> {
        let global = self.module_namespace_of(self.current_module)?;
        let chain = [Some(self.local_namespace), (global != self.local_namespace).then_some(global), Some(self.system_namespace)];
        for namespace in chain.into_iter().flatten() {
            if let Some(node) = tree::find_symbol(&self.heap, namespace, symbol)? {
                return tree::node(&self.heap, node).value.ok_or(RunError::NameNotFound);
            }
        }
        Err(RunError::NameNotFound)
    }

    /// Inserts or reassigns `value` under `symbol`; ownership of the
    /// caller's reference transfers to the namespace.
    pub(crate) fn store_in_namespace(&mut self, namespace: EntryId, symbol: i32, value: EntryId) -> RunResult<()> {
        let outcome = tree::try_insert(&mut self.heap, namespace, NodeKey::Symbol(symbol), Some(value))?;
        if !outcome.inserted {
            tree::assign_value(&mut self.heap, outcome.node, Some(value))?;
        }
        Ok(())
    }

    // --- Operand fetch --------------------------------------------------

    pub(crate) fn fetch_u8(&mut self) -> RunResult<u8> {
        let mut buffer = [0u8; 1];
        self.code.read(&mut self.context, self.pc, &mut buffer)?;
        self.pc += 1;
        Ok(buffer[0])
    }

    pub(crate) fn fetch_u32(&mut self) -> RunResult<u32> {
        let mut buffer = [0u8; 4];
        self.code.read(&mut self.context, self.pc, &mut buffer)?;
        self.pc += 4;
        Ok(u32::from_le_bytes(buffer))
    }

    pub(crate) fn fetch_i32(&mut self) -> RunResult<i32> {
        self.fetch_u32().map(|value| value as i32)
    }

    pub(crate) fn fetch_f64(&mut self) -> RunResult<f64> {
        let mut buffer = [0u8; 8];
        self.code.read(&mut self.context, self.pc, &mut buffer)?;
        self.pc += 8;
        Ok(f64::from_le_bytes(buffer))
    }

    pub(crate) fn fetch_bytes(&mut self, count: usize) -> RunResult<Vec<u8>> {
        let mut buffer = vec![0u8; count];
        self.code.read(&mut self.context, self.pc, &mut buffer)?;
        self.pc += count as u32;
        Ok(buffer)
    }

    // --- Stack plumbing -------------------------------------------------

    /// Pushes an owned reference.
    pub(crate) fn push(&mut self, entry: EntryId) {
        self.stack.push(entry);
    }

    /// Pops, transferring ownership to the caller.
    pub(crate) fn pop(&mut self) -> RunResult<EntryId> {
        self.stack.pop().ok_or(RunError::StackUnderflow)
    }

    /// Pops and releases the reference.
    pub(crate) fn pop_unref(&mut self) -> RunResult<()> {
        let entry = self.pop()?;
        self.heap.unref(entry)
    }

    /// The entry `depth` positions below the top, borrowed.
    pub(crate) fn peek(&self, depth: usize) -> RunResult<EntryId> {
        if depth >= self.stack.len() {
            return Err(RunError::StackUnderflow);
        }
        Ok(self.stack[self.stack.len() - 1 - depth])
    }
}

