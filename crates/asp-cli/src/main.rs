//
// Standalone Asp script runner.
//

mod functions;

use std::{
    env,
    fs::{self, File},
    io::{Read, Seek, SeekFrom},
    path::PathBuf,
    process::ExitCode,
};

use asp::{AppSpec, Engine, EngineParams, RunError, RunResult, SourceInfo, StepResult};
use asp_appspec::Generator;

use crate::functions::{CliContext, SPEC_SOURCE, dispatch};

const DEFAULT_DATA_ENTRY_COUNT: usize = 2048;

/// Number of code pages cached when paging mode is selected.
const CODE_PAGE_COUNT: usize = 4;

fn usage() {
    eprintln!(
        "Usage:      asps [OPTION]... SCRIPT [ARG]...\n\
         \n\
         Run the Asp script executable SCRIPT (*.aspe). The suffix may be omitted.\n\
         If one or more ARG are given, they are passed as arguments to the script.\n\
         \n\
         Options:\n\
         -c n        Code size, in bytes. The default behaviour is to determine the size\n\
         \x20           from the SCRIPT file. This default behaviour may also be invoked\n\
         \x20           explicitly by specifying 0 for n.\n\
         -d n        Data entry count. Default is {DEFAULT_DATA_ENTRY_COUNT}.\n\
         -h          Print usage information and exit.{debug_n}\n\
         -p n        Code page size, in bytes. The default is 0, which disables paging\n\
         \x20           mode.{debug_trace}\n\
         -v          Verbose. Output version and statistical information.",
        debug_n = if cfg!(feature = "debug") {
            "\n-n n        Number of instructions to execute before exiting. Useful for\n\
             \x20           debugging. Available only in debug builds."
        } else {
            ""
        },
        debug_trace = if cfg!(feature = "debug") {
            "\n-t file     Trace output file.\n\
             -T fd       Trace output file descriptor. Only 1 or 2 may be specified.\n\
             -u file     Data memory dump output file.\n\
             -U fd       Data memory dump output file descriptor. Only 1 or 2 may be\n\
             \x20           specified."
        } else {
            ""
        },
    );
}

struct Options {
    code_size: usize,
    data_entry_count: usize,
    page_size: usize,
    verbose: bool,
    #[cfg(feature = "debug")]
    step_limit: Option<u64>,
    #[cfg(feature = "debug")]
    trace: Option<TraceTarget>,
    #[cfg(feature = "debug")]
    dump: Option<TraceTarget>,
    script: PathBuf,
    script_arguments: Vec<String>,
}

#[cfg(feature = "debug")]
enum TraceTarget {
    File(PathBuf),
    /// Standard output or standard error; only descriptors 1 and 2 are
    /// accepted.
    Descriptor(u8),
}

fn parse_number(option: &str, value: Option<String>) -> Result<usize, String> {
    let value = value.ok_or_else(|| format!("{option} requires a value"))?;
    value.parse().map_err(|_| format!("{option}: invalid number '{value}'"))
}

#[cfg(feature = "debug")]
fn parse_descriptor(option: &str, value: Option<String>) -> Result<u8, String> {
    let value = value.ok_or_else(|| format!("{option} requires a value"))?;
    match value.as_str() {
        "1" => Ok(1),
        "2" => Ok(2),
        _ => Err(format!("{option}: only file descriptors 1 and 2 may be specified")),
    }
}

fn parse_options() -> Result<Option<Options>, String> {
    let mut arguments = env::args().skip(1);
    let mut code_size = 0usize;
    let mut data_entry_count = DEFAULT_DATA_ENTRY_COUNT;
    let mut page_size = 0usize;
    let mut verbose = false;
    #[cfg(feature = "debug")]
    let mut step_limit = None;
    #[cfg(feature = "debug")]
    let mut trace = None;
    #[cfg(feature = "debug")]
    let mut dump = None;
    let mut script: Option<PathBuf> = None;
    let mut script_arguments = Vec::new();

    while let Some(argument) = arguments.next() {
        if script.is_some() {
            script_arguments.push(argument);
            continue;
        }
        match argument.as_str() {
            "-h" => {
                usage();
                return Ok(None);
            }
            "-v" => verbose = true,
            "-c" => code_size = parse_number("-c", arguments.next())?,
            "-d" => data_entry_count = parse_number("-d", arguments.next())?,
            "-p" => page_size = parse_number("-p", arguments.next())?,
            #[cfg(feature = "debug")]
            "-n" => step_limit = Some(parse_number("-n", arguments.next())? as u64),
            #[cfg(feature = "debug")]
            "-t" => {
                trace = Some(TraceTarget::File(PathBuf::from(
                    arguments.next().ok_or("-t requires a file")?,
                )));
            }
            #[cfg(feature = "debug")]
            "-T" => trace = Some(TraceTarget::Descriptor(parse_descriptor("-T", arguments.next())?)),
            #[cfg(feature = "debug")]
            "-u" => {
                dump = Some(TraceTarget::File(PathBuf::from(
                    arguments.next().ok_or("-u requires a file")?,
                )));
            }
            #[cfg(feature = "debug")]
            "-U" => dump = Some(TraceTarget::Descriptor(parse_descriptor("-U", arguments.next())?)),
            "--" => {
                if let Some(path) = arguments.next() {
                    script = Some(PathBuf::from(path));
                }
            }
            _ if argument.starts_with('-') => return Err(format!("unknown option {argument}")),
            _ => script = Some(PathBuf::from(argument)),
        }
    }

    let Some(mut script) = script else {
        usage();
        return Err("no script given".to_string());
    };
    if script.extension().is_none() {
        script.set_extension("aspe");
    }

    Ok(Some(Options {
        code_size,
        data_entry_count,
        page_size,
        verbose,
        #[cfg(feature = "debug")]
        step_limit,
        #[cfg(feature = "debug")]
        trace,
        #[cfg(feature = "debug")]
        dump,
        script,
        script_arguments,
    }))
}

/// Demand-page reader over the script file.
fn read_code_page(context: &mut CliContext, offset: u32, buffer: &mut [u8]) -> RunResult<usize> {
    let Some(file) = context.script.as_mut() else {
        return Err(RunError::InvalidState);
    };
    file.seek(SeekFrom::Start(u64::from(offset)))
        .map_err(|_| RunError::BeyondEndOfCode)?;
    let mut filled = 0;
    while filled < buffer.len() {
        match file.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return Err(RunError::BeyondEndOfCode),
        }
    }
    Ok(filled)
}

fn report_error(engine: &Engine<CliContext>, error: RunError, source_info: Option<&SourceInfo>) {
    let pc = engine.program_counter();
    eprint!("Error 0x{:02X} ({error}) at pc 0x{pc:08X}", error.code());
    if let Some(location) = source_info.and_then(|info| info.lookup(pc)) {
        eprint!(": {}:{}:{}", location.file, location.line, location.column);
    }
    eprintln!();
}

fn main() -> ExitCode {
    let options = match parse_options() {
        Ok(Some(options)) => options,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("asps: {message}");
            return ExitCode::FAILURE;
        }
    };

    // The standalone application specification, regenerated at startup so
    // the check value always matches the shipped dispatch table.
    let mut generator = Generator::new();
    if let Err(error) = generator.add_source(SPEC_SOURCE, "standalone.asps") {
        eprintln!("asps: internal spec error: {error}");
        return ExitCode::from(2);
    }
    let spec_bytes = match generator.engine_spec() {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("asps: internal spec error: {error}");
            return ExitCode::from(2);
        }
    };
    let app_spec = match AppSpec::parse(&spec_bytes, dispatch) {
        Ok(spec) => spec,
        Err(error) => {
            eprintln!("asps: internal spec error: {error}");
            return ExitCode::from(2);
        }
    };

    if options.verbose {
        let [major, minor, patch, tweak] = asp::ENGINE_VERSION;
        eprintln!("Asp engine version {major}.{minor}.{patch}.{tweak}");
    }

    let params = EngineParams {
        data_entry_count: options.data_entry_count,
        code_capacity: (options.code_size > 0).then_some(options.code_size),
        ..EngineParams::default()
    };
    let context = CliContext::default();
    let mut engine = match Engine::new(app_spec, context, params) {
        Ok(engine) => engine,
        Err(error) => {
            eprintln!("asps: initialization failed: {error}");
            return ExitCode::from(2);
        }
    };

    // Load code: whole-file by default, demand-paged when -p is given.
    if options.page_size > 0 {
        let file = match File::open(&options.script) {
            Ok(file) => file,
            Err(error) => {
                eprintln!("asps: cannot open {}: {error}", options.script.display());
                return ExitCode::from(2);
            }
        };
        engine.context_mut().script = Some(file);
        if let Err(error) = engine.set_code_paging(CODE_PAGE_COUNT, options.page_size, read_code_page) {
            eprintln!("asps: paging setup failed: {error}");
            return ExitCode::from(2);
        }
        if let Err(error) = engine.page_code() {
            eprintln!("asps: load failed: {error}");
            return ExitCode::from(2);
        }
    } else {
        let image = match fs::read(&options.script) {
            Ok(image) => image,
            Err(error) => {
                eprintln!("asps: cannot read {}: {error}", options.script.display());
                return ExitCode::from(2);
            }
        };
        if let Err(error) = engine.add_code(&image).and_then(|()| engine.seal()) {
            eprintln!("asps: load failed: {error}");
            return ExitCode::from(2);
        }
    }

    // Optional source info side table for diagnostics.
    let source_info = {
        let mut path = options.script.clone();
        path.set_extension("aspd");
        fs::read(&path).ok().and_then(|bytes| SourceInfo::parse(&bytes).ok())
    };

    if let Err(error) = engine.set_arguments(&options.script_arguments) {
        eprintln!("asps: cannot bind script arguments: {error}");
        return ExitCode::from(2);
    }

    #[cfg(feature = "debug")]
    if let Err(message) = attach_debug_outputs(&mut engine, &options) {
        eprintln!("asps: {message}");
        return ExitCode::FAILURE;
    }

    #[cfg(feature = "debug")]
    let mut steps_remaining = options.step_limit;

    let exit = loop {
        #[cfg(feature = "debug")]
        if let Some(remaining) = steps_remaining.as_mut() {
            if *remaining == 0 {
                eprintln!("Step limit reached at pc 0x{:08X}", engine.program_counter());
                break ExitCode::from(2);
            }
            *remaining -= 1;
        }

        match engine.step() {
            Ok(StepResult::Running) => {}
            Ok(StepResult::Complete) => break ExitCode::SUCCESS,
            Err(error) => {
                report_error(&engine, error, source_info.as_ref());
                break ExitCode::from(2);
            }
        }
    };

    #[cfg(feature = "debug")]
    write_dump(&engine, &options);

    if options.verbose {
        let stats = engine.heap_stats();
        eprintln!(
            "Data entries: {} of {} in use, low water {}",
            stats.live_entries, stats.capacity, stats.low_free_count
        );
        if options.page_size > 0 {
            eprintln!("Code page reads: {}", engine.code_page_read_count(false));
        }
    }

    exit
}

#[cfg(feature = "debug")]
fn attach_debug_outputs(engine: &mut Engine<CliContext>, options: &Options) -> Result<(), String> {
    use std::io::{stderr, stdout};

    if let Some(target) = &options.trace {
        let sink: Box<dyn std::io::Write> = match target {
            TraceTarget::File(path) => {
                Box::new(File::create(path).map_err(|error| format!("cannot create {}: {error}", path.display()))?)
            }
            TraceTarget::Descriptor(1) => Box::new(stdout()),
            TraceTarget::Descriptor(_) => Box::new(stderr()),
        };
        engine.set_trace(sink);
    }
    Ok(())
}

#[cfg(feature = "debug")]
fn write_dump(engine: &Engine<CliContext>, options: &Options) {
    use std::io::{stderr, stdout};

    let Some(target) = &options.dump else { return };
    let result = match target {
        TraceTarget::File(path) => File::create(path).and_then(|mut file| engine.dump(&mut file)),
        TraceTarget::Descriptor(1) => engine.dump(&mut stdout()),
        TraceTarget::Descriptor(_) => engine.dump(&mut stderr()),
    };
    if result.is_err() {
        eprintln!("asps: error writing data memory dump");
    }
}
