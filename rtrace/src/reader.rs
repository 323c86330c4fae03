//! Ray Reader

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use rtcore::codec::{read_vector, VectorFormat};
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use rtcore::ray::{RayBundle, RayQuery};
use std::io::BufRead;
use std::mem;
use std::thread;
use std::time::Duration;

/// How often a caller waiting on input checks the interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Decodes origin/direction pairs from an input stream into bundles.
pub struct RayReader<R: BufRead> {
    /// Input stream.
    input: R,

    /// Input encoding.
    format: VectorFormat,
}

impl<R: BufRead> RayReader<R> {
    /// Creates a new `RayReader`.
    ///
    /// * `input`  - Input stream.
    /// * `format` - Input encoding.
    pub fn new(input: R, format: VectorFormat) -> Self {
        Self { input, format }
    }

    /// Fills `bundle` with up to `capacity` rays. Reading stops early at end
    /// of stream or right after a flush sentinel, which is kept in the
    /// bundle. Returns the number of rays read, 0 at a clean end of stream.
    ///
    /// On malformed input the rays decoded before the error stay in
    /// `bundle` and the error is returned.
    ///
    /// * `capacity` - Maximum rays to read.
    /// * `bundle`   - Receives the rays.
    pub fn read_bundle(&mut self, capacity: usize, bundle: &mut RayBundle) -> Result<usize> {
        bundle.clear();
        while bundle.len() < capacity {
            let Some(origin) = read_vector(&mut self.input, self.format)? else {
                break;
            };
            let direction = read_vector(&mut self.input, self.format)?
                .ok_or_else(|| RtError::Format("unexpected end of input inside a ray".to_string()))?;

            let ray = RayQuery::new(origin, direction);
            bundle.push(ray);
            if ray.is_sentinel() {
                break;
            }
        }
        Ok(bundle.len())
    }

    /// Returns the input stream.
    pub fn into_inner(self) -> R {
        self.input
    }
}

/// Reads bundles on a dedicated thread so that a caller blocked on input
/// still notices an interrupt. A bundle is read only when one is requested;
/// input is never consumed ahead of the caller.
pub struct BundleFeed {
    /// Empty bundles to fill.
    requests: Sender<RayBundle>,

    /// Filled bundles with the outcome of the read.
    replies: Receiver<(Result<usize>, RayBundle)>,
}

impl BundleFeed {
    /// Starts the input thread. The thread ends after the feed is dropped
    /// and its current read returns.
    ///
    /// * `reader`   - Ray source.
    /// * `capacity` - Maximum rays per bundle.
    pub fn start<R>(mut reader: RayReader<R>, capacity: usize) -> Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let (requests, pending) = bounded::<RayBundle>(1);
        let (filled, replies) = bounded(1);
        thread::Builder::new()
            .name("rtrace-input".to_string())
            .spawn(move || {
                for mut bundle in pending {
                    let n = reader.read_bundle(capacity, &mut bundle);
                    if filled.send((n, bundle)).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| RtError::system("cannot start input thread", e))?;
        Ok(Self { requests, replies })
    }

    /// Reads the next bundle into `bundle`, with the same results as
    /// `RayReader::read_bundle()`. Returns an interrupt error as soon as
    /// `ctx` is interrupted, even while the read is blocked.
    ///
    /// * `bundle` - Receives the rays.
    /// * `ctx`    - Run context.
    pub fn read_bundle(&mut self, bundle: &mut RayBundle, ctx: &RunContext) -> Result<usize> {
        let gone = || RtError::Consistency("input thread ended".to_string());
        self.requests.send(mem::take(bundle)).map_err(|_| gone())?;
        let ticker = tick(INTERRUPT_POLL);
        loop {
            select! {
                recv(self.replies) -> reply => {
                    let (n, filled) = reply.map_err(|_| gone())?;
                    *bundle = filled;
                    return n;
                }
                recv(ticker) -> _ => {
                    if let Some(signo) = ctx.interrupted() {
                        return Err(RtError::interrupted(signo));
                    }
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
