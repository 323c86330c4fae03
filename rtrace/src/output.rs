//! Output specification and record formatting.

use bitflags::bitflags;
use rtcore::codec::{write_reals, OutputFormat};
use rtcore::context::RunContext;
use rtcore::error::{Result, RtError};
use rtcore::ray::{RayRecord, TraceEvent};
use std::io::Write;

bitflags! {
    /// Properties of a resolved output specification.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OutputFlags: u32 {
        /// No field needs shading; rays are only intersected.
        const CAST_ONLY = 0b0001;

        /// Trace fields are present.
        const TRACE = 0b0010;

        /// Trace mode was requested with `T`.
        const TRACE_SOURCES = 0b0100;
    }
}

/// One value written for a ray.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputField {
    /// `o` origin.
    Origin,
    /// `d` direction.
    Direction,
    /// `v` value.
    Value,
    /// `V` contribution to the primary ray.
    Contribution,
    /// `r` mirrored contribution.
    Mirrored,
    /// `R` mirrored distance.
    MirroredDist,
    /// `x` unmirrored contribution.
    Unmirrored,
    /// `X` unmirrored distance.
    UnmirroredDist,
    /// `l` effective length.
    EffectiveLength,
    /// `L` first intersection length.
    FirstLength,
    /// `c` local (u,v) coordinates.
    Local,
    /// `p` intersection point.
    Point,
    /// `n` perturbed normal.
    Normal,
    /// `N` unperturbed normal.
    UnperturbedNormal,
    /// `s` surface name.
    Surface,
    /// `w` weight.
    Weight,
    /// `W` coefficient.
    Coefficient,
    /// `m` modifier name.
    Modifier,
    /// `M` material name.
    Material,
    /// `~` spacer.
    Spacer,
}

impl OutputField {
    /// Returns the field for a specification letter.
    ///
    /// * `c` - The letter.
    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'o' => Self::Origin,
            'd' => Self::Direction,
            'v' => Self::Value,
            'V' => Self::Contribution,
            'r' => Self::Mirrored,
            'R' => Self::MirroredDist,
            'x' => Self::Unmirrored,
            'X' => Self::UnmirroredDist,
            'l' => Self::EffectiveLength,
            'L' => Self::FirstLength,
            'c' => Self::Local,
            'p' => Self::Point,
            'n' => Self::Normal,
            'N' => Self::UnperturbedNormal,
            's' => Self::Surface,
            'w' => Self::Weight,
            'W' => Self::Coefficient,
            'm' => Self::Modifier,
            'M' => Self::Material,
            '~' => Self::Spacer,
            _ => return None,
        })
    }

    /// Returns true if the field needs a shaded ray, not just an
    /// intersection.
    pub fn needs_shading(&self) -> bool {
        matches!(
            self,
            Self::Value
                | Self::Contribution
                | Self::Mirrored
                | Self::MirroredDist
                | Self::Unmirrored
                | Self::UnmirroredDist
                | Self::EffectiveLength
                | Self::Normal
                | Self::Coefficient
        )
    }

    /// Returns true for the colour-valued fields that may be written as
    /// packed RGBE.
    pub fn is_packable(&self) -> bool {
        matches!(self, Self::Value | Self::Mirrored | Self::Unmirrored)
    }

    /// Writes this field of a record.
    ///
    /// * `w`      - Output stream.
    /// * `format` - Encoding of real values.
    /// * `rec`    - The record.
    pub fn write(&self, w: &mut dyn Write, format: OutputFormat, rec: &RayRecord) -> Result<()> {
        let text = |w: &mut dyn Write, s: &str| -> Result<()> {
            w.write_all(s.as_bytes())?;
            w.write_all(b"\t")?;
            Ok(())
        };
        match self {
            Self::Origin => write_reals(w, format, &rec.origin.to_array()),
            Self::Direction => write_reals(w, format, &rec.direction.to_array()),
            Self::Value => write_reals(w, format, &rec.value.to_array()),
            Self::Contribution => write_reals(w, format, &rec.contribution().to_array()),
            Self::Mirrored => write_reals(w, format, &rec.mirror.to_array()),
            Self::MirroredDist => write_reals(w, format, &[rec.mirror_dist]),
            Self::Unmirrored => write_reals(w, format, &(rec.value - rec.mirror).to_array()),
            Self::UnmirroredDist => write_reals(w, format, &[rec.unmirror_dist]),
            Self::EffectiveLength => write_reals(w, format, &[rec.effective_dist()]),
            Self::FirstLength => write_reals(w, format, &[rec.length]),
            Self::Local => write_reals(w, format, &rec.uv),
            Self::Point => write_reals(w, format, &rec.point.to_array()),
            Self::Normal => write_reals(w, format, &rec.normal.to_array()),
            Self::UnperturbedNormal => write_reals(w, format, &rec.unperturbed_normal.to_array()),
            Self::Weight => write_reals(w, format, &[rec.weight]),
            Self::Coefficient => write_reals(w, format, &rec.coefficient.to_array()),
            Self::Surface => text(w, rec.hit.as_ref().map_or("*", |h| &*h.surface)),
            Self::Modifier => text(w, rec.hit.as_ref().map_or("*", |h| &*h.modifier)),
            Self::Material => text(w, rec.hit.as_ref().map_or("*", |h| &*h.material)),
            Self::Spacer => text(w, "~"),
        }
    }
}

/// A resolved `-o` specification.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputSpec {
    /// Fields written once per primary ray, in order.
    pub ray_fields: Vec<OutputField>,

    /// Fields written for every traced ray in trace mode.
    pub trace_fields: Vec<OutputField>,

    /// Output encoding.
    pub format: OutputFormat,

    /// Derived properties.
    pub flags: OutputFlags,
}

impl OutputSpec {
    /// Resolves an output specification.
    ///
    /// * `spec`       - Specification letters.
    /// * `format`     - Output encoding.
    /// * `irradiance` - Whether irradiance mode is on.
    /// * `ctx`        - Receives warnings.
    pub fn parse(spec: &str, format: OutputFormat, irradiance: bool, ctx: &RunContext) -> Result<Self> {
        if spec.is_empty() {
            return Err(RtError::Usage("empty output specification".to_string()));
        }
        let mut letters = spec.chars();
        let packable = match (letters.next().and_then(OutputField::from_char), letters.next()) {
            (Some(f), None) => f.is_packable(),
            _ => false,
        };
        if format == OutputFormat::Rgbe && !packable {
            return Err(RtError::Usage("color format only with -ov, -or, -ox".to_string()));
        }

        let mut ray_fields = Vec::new();
        let mut trace_fields = Vec::new();
        let mut flags = OutputFlags::CAST_ONLY;
        let mut in_trace = false;

        let chars: Vec<char> = spec.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            match c {
                't' | 'T' => {
                    if c == 'T' {
                        flags |= OutputFlags::TRACE_SOURCES;
                    }
                    // A trailing `t` selects nothing.
                    if i + 1 < chars.len() {
                        in_trace = true;
                        flags.remove(OutputFlags::CAST_ONLY);
                    }
                }
                c => {
                    let field = OutputField::from_char(c)
                        .ok_or_else(|| RtError::Usage(format!("unrecognized output option '{c}'")))?;
                    if field.needs_shading() {
                        flags.remove(OutputFlags::CAST_ONLY);
                    }
                    if in_trace {
                        trace_fields.push(field);
                    } else {
                        ray_fields.push(field);
                    }
                }
            }
        }
        if !trace_fields.is_empty() {
            flags |= OutputFlags::TRACE;
        }

        if irradiance && flags.contains(OutputFlags::CAST_ONLY) {
            return Err(RtError::Usage("-I+ option requires some value output".to_string()));
        }
        for f in ray_fields.iter() {
            if matches!(f, OutputField::Contribution | OutputField::Coefficient) {
                ctx.warn("-oVW options require trace mode");
            }
            if irradiance
                && matches!(
                    f,
                    OutputField::Mirrored
                        | OutputField::MirroredDist
                        | OutputField::Unmirrored
                        | OutputField::UnmirroredDist
                )
            {
                ctx.warn("-orRxX options incompatible with -I+");
            }
        }

        Ok(Self {
            ray_fields,
            trace_fields,
            format,
            flags,
        })
    }

    /// Returns true if only intersections are needed.
    pub fn is_cast_only(&self) -> bool {
        self.flags.contains(OutputFlags::CAST_ONLY)
    }

    /// Returns true in trace mode.
    pub fn is_trace(&self) -> bool {
        self.flags.contains(OutputFlags::TRACE)
    }

    /// Returns true if a result writes nothing.
    pub fn discards_results(&self) -> bool {
        self.ray_fields.is_empty()
    }

    /// Writes the per-ray fields of a result.
    ///
    /// * `w`   - Output stream.
    /// * `rec` - The result.
    pub fn write_result(&self, w: &mut dyn Write, rec: &RayRecord) -> Result<()> {
        self.write_fields(w, &self.ray_fields, rec, 0)
    }

    /// Writes a trace event, indented by its depth.
    ///
    /// * `w`     - Output stream.
    /// * `event` - The event.
    pub fn write_event(&self, w: &mut dyn Write, event: &TraceEvent) -> Result<()> {
        self.write_fields(w, &self.trace_fields, &event.record, event.depth)
    }

    fn write_fields(&self, w: &mut dyn Write, fields: &[OutputField], rec: &RayRecord, tabs: usize) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        for _ in 0..tabs {
            w.write_all(b"\t")?;
        }
        for f in fields {
            f.write(w, self.format, rec)?;
        }
        if self.format == OutputFormat::Ascii {
            w.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Writes the information header.
///
/// * `w`            - Output stream.
/// * `command_line` - Program arguments preceding the scene argument.
/// * `format`       - Output encoding.
pub fn write_header(w: &mut dyn Write, command_line: &[String], format: OutputFormat) -> Result<()> {
    writeln!(w, "{}", command_line.join(" "))?;
    writeln!(w, "SOFTWARE= raystream {}", env!("CARGO_PKG_VERSION"))?;
    if matches!(format, OutputFormat::Float | OutputFormat::Double) {
        writeln!(w, "BigEndian={}", cfg!(target_endian = "big") as u8)?;
    }
    writeln!(w, "FORMAT={}", format.name())?;
    writeln!(w)?;
    Ok(())
}

/// Writes the resolution string `-Y <yres> +X <xres>`.
///
/// * `w`    - Output stream.
/// * `xres` - Horizontal resolution.
/// * `yres` - Vertical resolution.
pub fn write_resolution(w: &mut dyn Write, xres: i64, yres: i64) -> Result<()> {
    writeln!(w, "-Y {yres} +X {xres}")?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rtcore::color::Rgb;
    use rtcore::geometry::Vector3;
    use rtcore::ray::{HitInfo, RayQuery};
    use std::sync::Arc;

    fn spec(s: &str) -> Result<OutputSpec> {
        OutputSpec::parse(s, OutputFormat::Ascii, false, &RunContext::new())
    }

    fn record() -> RayRecord {
        let q = RayQuery::new(Vector3::new(1.0, 2.0, 3.0), Vector3::new(0.0, 0.0, 1.0));
        let mut r = RayRecord::miss(&q);
        r.value = Rgb::new(0.5, 0.25, 1.0);
        r.length = 2.0;
        r.hit = Some(HitInfo {
            surface: Arc::from("ball"),
            modifier: Arc::from("paint"),
            material: Arc::from("white"),
        });
        r
    }

    #[test]
    fn resolves_fields_and_flags() {
        let s = spec("ov").unwrap();
        assert_eq!(s.ray_fields, vec![OutputField::Origin, OutputField::Value]);
        assert!(!s.is_cast_only());
        assert!(!s.is_trace());

        let s = spec("odsmM").unwrap();
        assert!(s.is_cast_only());

        let s = spec("vtLw").unwrap();
        assert_eq!(s.ray_fields, vec![OutputField::Value]);
        assert_eq!(s.trace_fields, vec![OutputField::FirstLength, OutputField::Weight]);
        assert!(s.is_trace());
        assert!(!s.is_cast_only());

        let s = spec("Tp").unwrap();
        assert!(s.discards_results());
        assert!(s.flags.contains(OutputFlags::TRACE_SOURCES));

        // Trailing `t` is ignored.
        let s = spec("vt").unwrap();
        assert!(!s.is_trace());
    }

    #[test]
    fn rejects_bad_specs() {
        assert_eq!(spec(""), Err(RtError::Usage("empty output specification".to_string())));
        assert_eq!(spec("vq"), Err(RtError::Usage("unrecognized output option 'q'".to_string())));
        let ctx = RunContext::new();
        assert!(OutputSpec::parse("vo", OutputFormat::Rgbe, false, &ctx).is_err());
        assert!(OutputSpec::parse("o", OutputFormat::Rgbe, false, &ctx).is_err());
        assert!(OutputSpec::parse("x", OutputFormat::Rgbe, false, &ctx).is_ok());
        assert!(OutputSpec::parse("od", OutputFormat::Ascii, true, &ctx).is_err());
    }

    #[test]
    fn warnings_are_counted() {
        let ctx = RunContext::new();
        OutputSpec::parse("vVW", OutputFormat::Ascii, false, &ctx).unwrap();
        assert_eq!(ctx.stats().warnings, 2);
        OutputSpec::parse("vr", OutputFormat::Ascii, true, &ctx).unwrap();
        assert_eq!(ctx.stats().warnings, 3);
    }

    #[test]
    fn ascii_record() {
        let s = spec("vsL~m").unwrap();
        let mut out = Vec::new();
        s.write_result(&mut out, &record()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "5.000000e-01\t2.500000e-01\t1.000000e+00\tball\t2.000000e+00\t~\tpaint\t\n"
        );
    }

    #[test]
    fn names_for_misses() {
        let s = spec("sM").unwrap();
        let mut out = Vec::new();
        let r = RayRecord::miss(&RayQuery::default());
        s.write_result(&mut out, &r).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "*\t*\t\n");
    }

    #[test]
    fn binary_and_packed() {
        let ctx = RunContext::new();
        let s = OutputSpec::parse("vL", OutputFormat::Float, false, &ctx).unwrap();
        let mut out = Vec::new();
        s.write_result(&mut out, &record()).unwrap();
        assert_eq!(out.len(), 16);

        let s = OutputSpec::parse("v", OutputFormat::Rgbe, false, &ctx).unwrap();
        let mut out = Vec::new();
        s.write_result(&mut out, &record()).unwrap();
        assert_eq!(out, Rgb::new(0.5, 0.25, 1.0).to_rgbe().to_vec());
    }

    #[test]
    fn trace_event_indents() {
        let s = spec("tw").unwrap();
        let mut out = Vec::new();
        s.write_event(&mut out, &TraceEvent { depth: 2, record: record() }).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\t\t1.000000e+00\t\n");
    }

    #[test]
    fn header_lines() {
        let mut out = Vec::new();
        write_header(&mut out, &["rtrace".to_string(), "-ovd".to_string()], OutputFormat::Double).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rtrace -ovd");
        assert!(lines[1].starts_with("SOFTWARE= raystream "));
        assert!(lines[2].starts_with("BigEndian="));
        assert_eq!(lines[3], "FORMAT=double");
        assert_eq!(lines[4], "");

        let mut out = Vec::new();
        write_resolution(&mut out, 4, 3).unwrap();
        assert_eq!(out, b"-Y 3 +X 4\n");
    }
}
