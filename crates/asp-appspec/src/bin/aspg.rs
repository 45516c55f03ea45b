//
// Asp application specification generator command line.
//

use std::{env, fs, path::{Path, PathBuf}, process::ExitCode};

use asp_appspec::Generator;

fn usage() {
    eprintln!(
        "Usage:      aspg [OPTION]... SPEC\n\
         \n\
         Generate application specification outputs from SPEC (*.asps).\n\
         The suffix may be omitted.\n\
         \n\
         Options:\n\
         -b name    Base name used in the C header guard and macros. The default is\n\
         \x20           derived from the SPEC file name.\n\
         -o dir     Output directory. The default is the current directory.\n\
         -h         Print usage information and exit."
    );
}

fn main() -> ExitCode {
    let mut arguments = env::args().skip(1);
    let mut base_name: Option<String> = None;
    let mut output_dir = PathBuf::from(".");
    let mut spec_path: Option<PathBuf> = None;

    while let Some(argument) = arguments.next() {
        match argument.as_str() {
            "-h" => {
                usage();
                return ExitCode::SUCCESS;
            }
            "-b" => match arguments.next() {
                Some(name) => base_name = Some(name),
                None => {
                    eprintln!("aspg: -b requires a name");
                    return ExitCode::FAILURE;
                }
            },
            "-o" => match arguments.next() {
                Some(dir) => output_dir = PathBuf::from(dir),
                None => {
                    eprintln!("aspg: -o requires a directory");
                    return ExitCode::FAILURE;
                }
            },
            _ => {
                if spec_path.is_some() {
                    eprintln!("aspg: multiple spec files given");
                    return ExitCode::FAILURE;
                }
                spec_path = Some(PathBuf::from(argument));
            }
        }
    }

    let Some(mut spec_path) = spec_path else {
        usage();
        return ExitCode::FAILURE;
    };
    if spec_path.extension().is_none() {
        spec_path.set_extension("asps");
    }

    let base_name = base_name.unwrap_or_else(|| {
        spec_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().replace('-', "_"))
            .unwrap_or_else(|| "app".to_string())
    });

    let mut generator = Generator::new();
    if let Err(code) = add_file(&mut generator, &spec_path) {
        return code;
    }

    let engine_spec = match generator.engine_spec() {
        Ok(spec) => spec,
        Err(error) => {
            eprintln!("aspg: {error}");
            return ExitCode::FAILURE;
        }
    };
    let compiler_spec = generator.compiler_spec();
    let header = generator.c_header(&base_name);

    let stem = spec_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string());
    let outputs = [
        (output_dir.join(format!("{stem}.aspec")), engine_spec),
        (output_dir.join(format!("{stem}.cspec")), compiler_spec),
        (output_dir.join(format!("{stem}.h")), header.into_bytes()),
    ];
    for (path, contents) in outputs {
        if let Err(error) = fs::write(&path, contents) {
            eprintln!("aspg: cannot write {}: {error}", path.display());
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

/// Reads and parses one spec file, following include directives relative to
/// the including file's directory.
fn add_file(generator: &mut Generator, path: &Path) -> Result<(), ExitCode> {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("aspg: cannot read {}: {error}", path.display());
            return Err(ExitCode::FAILURE);
        }
    };
    let includes = match generator.add_source(&source, &path.to_string_lossy()) {
        Ok(includes) => includes,
        Err(error) => {
            eprintln!("aspg: {error}");
            return Err(ExitCode::FAILURE);
        }
    };
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    for include in includes {
        let mut included = directory.join(&include.name);
        if included.extension().is_none() {
            included.set_extension("asps");
        }
        add_file(generator, &included)?;
    }
    Ok(())
}
