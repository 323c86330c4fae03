//! Trace modifier filter.

use rtcore::error::{Result, RtError};
use rtcore::ray::RayRecord;
use std::collections::HashSet;
use std::fs;

/// Whether the listed modifiers are shown or hidden.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceMode {
    /// Show every traced ray.
    All,

    /// Show only rays whose modifier is listed.
    Include,

    /// Hide rays whose modifier is listed.
    Exclude,
}

/// Selects which trace events are written.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceFilter {
    mode: TraceMode,
    names: HashSet<String>,
}

impl Default for TraceFilter {
    fn default() -> Self {
        Self {
            mode: TraceMode::All,
            names: HashSet::new(),
        }
    }
}

impl TraceFilter {
    /// Builds a filter from `MODE:ARG` entries in command line order. `i`
    /// and `e` add one modifier name, `I` and `E` add every word of a file.
    /// Switching between include and exclude starts a new list.
    ///
    /// * `specs` - The entries.
    pub fn from_specs(specs: &[String]) -> Result<Self> {
        let mut filter = Self::default();
        for spec in specs {
            let (mode, arg) = spec
                .split_once(':')
                .ok_or_else(|| RtError::Usage(format!("bad trace specification '{spec}'")))?;
            let (list_mode, from_file) = match mode {
                "i" => (TraceMode::Include, false),
                "I" => (TraceMode::Include, true),
                "e" => (TraceMode::Exclude, false),
                "E" => (TraceMode::Exclude, true),
                _ => return Err(RtError::Usage(format!("bad trace specification '{spec}'"))),
            };
            if filter.mode != list_mode {
                filter.names.clear();
                filter.mode = list_mode;
            }
            if from_file {
                let which = if list_mode == TraceMode::Include { "include" } else { "exclude" };
                let text = fs::read_to_string(arg)
                    .map_err(|e| RtError::system(&format!("cannot open trace {which} file \"{arg}\""), e))?;
                filter.names.extend(text.split_whitespace().map(str::to_string));
            } else {
                filter.names.insert(arg.to_string());
            }
        }
        Ok(filter)
    }

    /// Returns the list mode.
    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    /// Returns true if the event for `rec` is written.
    ///
    /// * `rec` - The traced ray.
    pub fn accepts(&self, rec: &RayRecord) -> bool {
        match self.mode {
            TraceMode::All => true,
            TraceMode::Include => rec.hit.as_ref().map_or(false, |h| self.names.contains(&*h.modifier)),
            TraceMode::Exclude => rec.hit.as_ref().map_or(true, |h| !self.names.contains(&*h.modifier)),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
