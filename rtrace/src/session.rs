//! Session

use super::output::*;
use super::pool::*;
use super::queue::*;
use super::reader::*;
use super::run::*;
use super::settings::*;
use super::sink::*;
use ambient::AmbientCache;
use rtcore::app::Options;
use rtcore::context::{RunContext, RunStats};
use rtcore::error::Result;
use rtcore::ray::ArcRayTracer;
use scene::{load_scene, Scene, SceneTracer};
use std::io::{BufRead, Write};
use std::sync::Arc;

/// A loaded scene with its settings, ready to serve any number of ray
/// streams one after another.
pub struct Session {
    settings: RtraceSettings,
    scene: Arc<Scene>,
    ambient: Arc<AmbientCache>,
    ctx: Arc<RunContext>,
}

impl Session {
    /// Creates a new `Session`.
    ///
    /// * `settings` - Run settings.
    /// * `scene`    - The scene.
    /// * `ambient`  - Ambient cache.
    /// * `ctx`      - Run context.
    pub fn new(settings: RtraceSettings, scene: Arc<Scene>, ambient: Arc<AmbientCache>, ctx: Arc<RunContext>) -> Self {
        Self {
            settings,
            scene,
            ambient,
            ctx,
        }
    }

    /// Resolves settings and loads the scene named on the command line.
    ///
    /// * `options` - Command line options.
    /// * `ctx`     - Run context.
    pub fn from_options(options: &Options, ctx: Arc<RunContext>) -> Result<Self> {
        let settings = RtraceSettings::from_options(options, &ctx)?;
        let scene = Arc::new(load_scene(options.scene_path()?)?);
        let ambient = Arc::new(AmbientCache::new(options.ambient_file.clone()));
        Ok(Self::new(settings, scene, ambient, ctx))
    }

    /// Returns a session sharing the scene and settings but with its own
    /// ambient cache and run context. Siblings only meet through the
    /// ambient file.
    pub fn sibling(&self) -> Self {
        let ctx = Arc::new(RunContext::with_interrupt(self.ctx.interrupt_flag()));
        let ambient = Arc::new(AmbientCache::new(self.ambient.file().map(|p| p.to_path_buf())));
        Self::new(self.settings.clone(), Arc::clone(&self.scene), ambient, ctx)
    }

    /// Returns the settings.
    pub fn settings(&self) -> &RtraceSettings {
        &self.settings
    }

    /// Returns the run context.
    pub fn context(&self) -> &Arc<RunContext> {
        &self.ctx
    }

    /// Returns the ambient cache.
    pub fn ambient(&self) -> &Arc<AmbientCache> {
        &self.ambient
    }

    /// Traces every ray of `input` and writes the results to `output`. The
    /// ambient cache is loaded from its file first and written back at the
    /// end, also when the run fails.
    ///
    /// * `input`  - Ray stream.
    /// * `output` - Result stream.
    pub fn run<R>(&self, input: R, mut output: OutputStream) -> Result<RunStats>
    where
        R: BufRead + Send + 'static,
    {
        self.ctx.reset();
        self.ambient.load()?;

        let settings = &self.settings;
        if settings.header {
            write_header(&mut output, &settings.command_line, settings.output.format)?;
        }
        if settings.xres > 0 && settings.yres > 0 {
            write_resolution(&mut output, settings.xres, settings.yres)?;
        }
        output.flush()?;

        let tracer: ArcRayTracer = Arc::new(SceneTracer::new(
            Arc::clone(&self.scene),
            settings.tracer.clone(),
            Arc::clone(&self.ambient),
        ));
        let pool: Box<dyn WorkerPool> = match settings.backend {
            Backend::Threads => Box::new(ThreadPool::new(tracer)),
            Backend::Kernel => Box::new(KernelPool::new(tracer)),
        };
        let sink = ResultSink::new(
            output,
            settings.output.clone(),
            settings.trace_filter.clone(),
            Arc::clone(&self.ctx),
        )?;
        let mut queue = BundleQueue::new(
            pool,
            sink,
            settings.workers,
            settings.output.is_trace(),
            Arc::clone(&self.ctx),
        )?;

        let reader = RayReader::new(input, settings.input_format);
        let traced = run_rays(
            reader,
            &mut queue,
            settings.flush_interval(),
            settings.ray_budget(),
            &self.ctx,
        );
        let finished = queue.finish().map(drop);
        let synced = self.ambient.flush_to_disk().map(drop);

        traced.and(finished).and(synced)?;
        let stats = self.ctx.stats();
        info!(
            "generation {}: {} rays read, {} results, {} flushes",
            stats.generation, stats.rays_read, stats.results_emitted, stats.flushes
        );
        Ok(stats)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
