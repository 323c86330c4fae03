#[macro_use]
extern crate log;

use persist::PersistController;
use rtcore::app::Options;
use rtcore::error::Result;
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::process;

#[cfg(all(feature = "dhat-rs", feature = "jemalloc"))]
compile_error!("feature 'dhat-rs' and feature 'jemalloc' cannot be enabled at the same time");

#[cfg(feature = "dhat-rs")]
use dhat::{Dhat, DhatAlloc};

#[cfg(feature = "dhat-rs")]
#[global_allocator]
static ALLOCATOR: DhatAlloc = DhatAlloc;

#[cfg(feature = "jemalloc")]
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(feature = "jemalloc")]
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOCATOR: Jemalloc = Jemalloc;

fn main() {
    let args: Vec<String> = env::args().collect();
    let code = {
        #[cfg(feature = "dhat-rs")]
        let _dhat = Dhat::start_heap_profiling();

        match Options::from_args(&args) {
            Ok(options) => run(&args, options),
            Err(e) => {
                init_logging(&args, None);
                error!("{e}");
                e.exit_code()
            }
        }
    };
    process::exit(code);
}

fn run(args: &[String], options: Options) -> i32 {
    if options.print_defaults {
        print!("{}", options.print_defaults());
        return 0;
    }

    init_logging(args, Some(&options));

    match PersistController::new(options).and_then(PersistController::run) {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

/// Initializes `env_logger`. Records are prefixed with the program name, and
/// the process id when persistent. Warnings are shown unless `-w-` was given;
/// `RUST_LOG` overrides the level.
///
/// * `args`    - Command line.
/// * `options` - Parsed options, if parsing succeeded.
fn init_logging(args: &[String], options: Option<&Options>) {
    let program = args
        .first()
        .and_then(|a| Path::new(a).file_name())
        .map_or_else(|| "rtrace".to_string(), |n| n.to_string_lossy().into_owned());
    let prefix = match options {
        Some(o) if o.persist_file().is_some() => format!("{program}[{}]", process::id()),
        _ => program,
    };
    let level = match options {
        Some(o) if !o.warnings => log::LevelFilter::Error,
        _ => log::LevelFilter::Warn,
    };

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format(move |buf, record| writeln!(buf, "{prefix}: {}", record.args()));

    if let Some(path) = options.and_then(|o| o.error_file.as_deref()) {
        match open_error_file(path, args) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open error file {}: {e}", path.display()),
        }
    }
    builder.init();
}

/// Opens the error file for appending and writes the banner that separates
/// runs.
fn open_error_file(path: &Path, args: &[String]) -> Result<std::fs::File> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "**************\n*** PID {:5}: {}", process::id(), args.join(" "))?;
    file.flush()?;
    Ok(file)
}
