//! Run settings derived from the command line.

use super::output::*;
use super::trace::*;
use rtcore::app::Options;
use rtcore::codec::VectorFormat;
use rtcore::color::Rgb;
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use scene::TracerParams;
use std::time::{SystemTime, UNIX_EPOCH};

/// Worker backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// A fixed pool of OS threads.
    Threads,

    /// One exclusive data-parallel launch per bundle.
    Kernel,
}

/// Inputs to the worker count decision.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkerPolicy {
    /// Requested worker count (`-n`).
    pub requested: i64,

    /// Horizontal resolution (`-x`).
    pub xres: i64,

    /// Vertical resolution (`-y`).
    pub yres: i64,

    /// Rays per bundle, 0 for unbounded.
    pub flush_interval: usize,

    /// Output needs intersections only.
    pub cast_only: bool,

    /// Trace output is on.
    pub trace: bool,

    /// Backend in use.
    pub backend: Backend,

    /// A persist file was given.
    pub persist: bool,
}

impl WorkerPolicy {
    /// Returns the number of workers to run, reporting warnings through
    /// `ctx`.
    ///
    /// * `ctx` - Receives warnings.
    pub fn resolve(&self, ctx: &RunContext) -> Result<usize> {
        if self.requested <= 0 {
            return Err(RtError::Usage("bad number of processes".to_string()));
        }
        let mut n = self.requested as usize;
        if n > 1 {
            if self.trace {
                return Err(RtError::Usage("multiprocessing incompatible with trace output".to_string()));
            }
            if self.backend == Backend::Kernel {
                return Err(RtError::Usage(
                    "multiprocessing incompatible with GPU implementation".to_string(),
                ));
            }
            if self.persist {
                return Err(RtError::Usage("multiprocessing incompatible with persist file".to_string()));
            }
            if self.yres == 0 && self.xres > 0 && (self.xres as usize) < n {
                ctx.warn("number of cores should not exceed horizontal resolution");
            }
        }
        if self.cast_only && n > 1 {
            ctx.warn("multiprocessing not used for cast-only output");
            n = 1;
        }
        if self.flush_interval > 0 && n > self.flush_interval {
            ctx.warn("reducing number of processes to match flush interval");
            n = self.flush_interval;
        }
        let max_threads = num_cpus::get();
        if n > max_threads {
            ctx.warn(&format!("number of processes > max logical CPUs {max_threads}"));
            n = max_threads;
        }
        Ok(n)
    }
}

/// Everything a run of the pipeline needs, resolved once at startup.
#[derive(Clone, Debug)]
pub struct RtraceSettings {
    /// Input encoding.
    pub input_format: VectorFormat,

    /// Resolved output specification.
    pub output: OutputSpec,

    /// Trace event filter.
    pub trace_filter: TraceFilter,

    /// Horizontal resolution.
    pub xres: i64,

    /// Vertical resolution.
    pub yres: i64,

    /// Write the information header.
    pub header: bool,

    /// Command line written to the header.
    pub command_line: Vec<String>,

    /// Worker backend.
    pub backend: Backend,

    /// Number of workers.
    pub workers: usize,

    /// Tracer parameters.
    pub tracer: TracerParams,
}

impl RtraceSettings {
    /// Resolves settings from parsed options.
    ///
    /// * `options` - Command line options.
    /// * `ctx`     - Receives warnings.
    pub fn from_options(options: &Options, ctx: &RunContext) -> Result<Self> {
        let (input_format, output_format) = options.formats()?;
        let output = OutputSpec::parse(&options.output_spec, output_format, options.irradiance, ctx)?;
        let trace_filter = TraceFilter::from_specs(&options.trace)?;
        let backend = if options.gpu { Backend::Kernel } else { Backend::Threads };

        let policy = WorkerPolicy {
            requested: options.nprocs,
            xres: options.xres,
            yres: options.yres,
            flush_interval: flush_interval(options.xres, options.yres),
            cast_only: output.is_cast_only(),
            trace: output.is_trace(),
            backend,
            persist: options.persist_file().is_some(),
        };
        let workers = policy.resolve(ctx)?;

        let av = &options.ambient_value;
        let seed = if options.uncorrelated {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        } else {
            0
        };
        let tracer = TracerParams {
            irradiance: options.irradiance,
            limit_distance: options.limit_distance,
            ambient_bounces: options.ambient_bounces,
            ambient_divisions: options.ambient_divisions,
            ambient_resolution: options.ambient_resolution.max(1),
            ambient_value: Rgb::new(av[0], av[1], av[2]),
            reflection_limit: options.reflection_limit,
            weight_limit: options.weight_limit,
            seed,
        };

        Ok(Self {
            input_format,
            output,
            trace_filter,
            xres: options.xres,
            yres: options.yres,
            header: options.header,
            command_line: options.command_line_options().to_vec(),
            backend,
            workers,
            tracer,
        })
    }

    /// Returns the number of rays per bundle, 0 for unbounded.
    pub fn flush_interval(&self) -> usize {
        flush_interval(self.xres, self.yres)
    }

    /// Returns the number of rays to read, 0 for no limit.
    pub fn ray_budget(&self) -> u64 {
        ray_budget(self.xres, self.yres)
    }
}

/// Returns the flush interval for a resolution: `xres` when there is no
/// vertical resolution or the image is one pixel wide, 0 otherwise.
///
/// * `xres` - Horizontal resolution.
/// * `yres` - Vertical resolution.
pub fn flush_interval(xres: i64, yres: i64) -> usize {
    if yres == 0 || xres <= 1 {
        xres.max(0) as usize
    } else {
        0
    }
}

/// Returns the number of rays expected for a resolution, 0 for no limit.
///
/// * `xres` - Horizontal resolution.
/// * `yres` - Vertical resolution.
pub fn ray_budget(xres: i64, yres: i64) -> u64 {
    let count = if xres > 1 { xres * yres } else { yres };
    count.max(0) as u64
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
