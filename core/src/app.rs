//! Application related stuff

use crate::codec::{parse_format_spec, OutputFormat, VectorFormat};
use crate::error::{Result, RtError};
use crate::geometry::Float;
use clap::{ArgAction, Parser, ValueEnum};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Name of the hidden option used when the persistence supervisor respawns
/// the program.
pub const PERSIST_ROLE_ARG: &str = "--persist-role";

/// Role of a respawned persistent process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PersistRole {
    /// Single-mode child that serves activations one at a time.
    Child,

    /// Parallel-mode daemon that runs sibling pipelines.
    Parallel,
}

/// Program options. Radiance-style short options are rewritten by
/// `expand_args()` into the long forms below before clap sees them.
#[derive(Parser, Clone, Debug)]
#[command(name = "rtrace", version, about = "Trace rays read from the standard input.", args_override_self = true)]
pub struct Options {
    /// Number of worker threads.
    #[arg(long = "nprocs", value_name = "NUM", default_value_t = 1, allow_negative_numbers = true)]
    pub nprocs: i64,

    /// Horizontal resolution, or flush interval when `yres` is 0.
    #[arg(long = "xres", value_name = "NUM", default_value_t = 0, allow_negative_numbers = true)]
    pub xres: i64,

    /// Vertical resolution.
    #[arg(long = "yres", value_name = "NUM", default_value_t = 0, allow_negative_numbers = true)]
    pub yres: i64,

    /// Input and output format letters.
    #[arg(long = "format", value_name = "IO", default_value = "aa")]
    pub format: String,

    /// Output specification.
    #[arg(long = "outspec", value_name = "SPEC", default_value = "v")]
    pub output_spec: String,

    /// Compute irradiance at the ray origin.
    #[arg(long = "irradiance", action = ArgAction::Set, default_value_t = false)]
    pub irradiance: bool,

    /// Limit ray distance to the length of the direction vector.
    #[arg(long = "limit-distance", action = ArgAction::Set, default_value_t = false)]
    pub limit_distance: bool,

    /// Write an information header.
    #[arg(long = "header", action = ArgAction::Set, default_value_t = true)]
    pub header: bool,

    /// Report warnings.
    #[arg(long = "warnings", action = ArgAction::Set, default_value_t = true)]
    pub warnings: bool,

    /// Uncorrelated (time seeded) sampling.
    #[arg(long = "uncorrelated", action = ArgAction::Set, default_value_t = false)]
    pub uncorrelated: bool,

    /// Use the exclusive data-parallel kernel backend.
    #[arg(long = "gpu", action = ArgAction::Set, default_value_t = false)]
    pub gpu: bool,

    /// Trace list entries, `i:` or `e:` followed by a modifier name, `I:`
    /// or `E:` followed by a file of names.
    #[arg(long = "trace", value_name = "MODE:NAME")]
    pub trace: Vec<String>,

    /// Persist file, single mode.
    #[arg(long = "persist", value_name = "FILE")]
    pub persist: Option<PathBuf>,

    /// Persist file, parallel mode.
    #[arg(long = "persist-parallel", value_name = "FILE")]
    pub persist_parallel: Option<PathBuf>,

    /// Append diagnostics to this file instead of stderr.
    #[arg(long = "errfile", value_name = "FILE")]
    pub error_file: Option<PathBuf>,

    /// Number of ambient bounces.
    #[arg(long = "ambient-bounces", value_name = "NUM", default_value_t = 0)]
    pub ambient_bounces: u32,

    /// Number of ambient divisions.
    #[arg(long = "ambient-divisions", value_name = "NUM", default_value_t = 128)]
    pub ambient_divisions: u32,

    /// Ambient resolution.
    #[arg(long = "ambient-resolution", value_name = "NUM", default_value_t = 32)]
    pub ambient_resolution: u32,

    /// Ambient value used when bounces run out.
    #[arg(
        long = "ambient-value",
        value_name = "R,G,B",
        value_delimiter = ',',
        default_values_t = [0.0, 0.0, 0.0],
        allow_negative_numbers = true
    )]
    pub ambient_value: Vec<Float>,

    /// Ambient backing file.
    #[arg(long = "ambient-file", value_name = "FILE")]
    pub ambient_file: Option<PathBuf>,

    /// Reflection depth limit.
    #[arg(long = "reflection-limit", value_name = "NUM", default_value_t = 8, allow_negative_numbers = true)]
    pub reflection_limit: i32,

    /// Ray weight limit.
    #[arg(long = "weight-limit", value_name = "WEIGHT", default_value_t = 2e-3)]
    pub weight_limit: Float,

    /// Print the current settings and exit.
    #[arg(long = "defaults")]
    pub print_defaults: bool,

    /// Set by the persistence supervisor on respawned processes.
    #[arg(long = "persist-role", hide = true, value_enum)]
    pub persist_role: Option<PersistRole>,

    /// Scene file.
    #[arg(value_name = "SCENE")]
    pub scene: Option<PathBuf>,

    /// Command line as typed, for the header.
    #[arg(skip)]
    pub command_line: Vec<String>,
}

impl Options {
    /// Parses options from a Radiance-style argument list. Help and version
    /// requests print and exit like `Parser::parse()`.
    ///
    /// * `args` - Arguments including the program name.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let expanded = expand_args(args)?;
        let mut options = match Options::try_parse_from(&expanded) {
            Ok(o) => o,
            Err(e) => match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => e.exit(),
                _ => {
                    let msg = e.to_string();
                    let first = msg.lines().next().unwrap_or_default();
                    return Err(RtError::Usage(first.trim_start_matches("error: ").to_string()));
                }
            },
        };
        if options.ambient_value.len() != 3 {
            return Err(RtError::Usage("ambient value needs three components".to_string()));
        }
        options.command_line = args
            .iter()
            .filter(|a| !a.starts_with(PERSIST_ROLE_ARG))
            .cloned()
            .collect();
        Ok(options)
    }

    /// Returns the scene path.
    pub fn scene_path(&self) -> Result<&Path> {
        self.scene
            .as_deref()
            .ok_or_else(|| RtError::Usage("missing scene argument".to_string()))
    }

    /// Returns the parsed input and output formats.
    pub fn formats(&self) -> Result<(VectorFormat, OutputFormat)> {
        parse_format_spec(&self.format)
    }

    /// Returns the persist file and whether it is the parallel variant.
    pub fn persist_file(&self) -> Option<(&Path, bool)> {
        match (&self.persist_parallel, &self.persist) {
            (Some(p), _) => Some((p.as_path(), true)),
            (None, Some(p)) => Some((p.as_path(), false)),
            _ => None,
        }
    }

    /// Returns the command line minus the trailing scene argument.
    pub fn command_line_options(&self) -> &[String] {
        match self.command_line.split_last() {
            Some((last, rest)) if self.scene.as_deref() == Some(Path::new(last)) => rest,
            _ => &self.command_line,
        }
    }

    /// Returns the current settings in command line form, one per line with
    /// a comment.
    pub fn print_defaults(&self) -> String {
        let mut s = String::new();
        let sign = |b: bool| if b { '+' } else { '-' };
        let (inform, outform) = self
            .formats()
            .unwrap_or((VectorFormat::Ascii, OutputFormat::Ascii));

        if self.irradiance {
            s.push_str("-I+\t\t\t\t# immediate irradiance on\n");
        }
        let _ = writeln!(s, "-n {:<2}\t\t\t\t# number of rendering processes", self.nprocs);
        let _ = writeln!(
            s,
            "-x {:<9}\t\t\t# {}",
            self.xres,
            if self.xres != 0 && self.yres != 0 { "x resolution" } else { "flush interval" }
        );
        let _ = writeln!(s, "-y {:<9}\t\t\t# y resolution", self.yres);
        let _ = writeln!(
            s,
            "-ld{}\t\t\t\t# limit distance {}",
            sign(self.limit_distance),
            if self.limit_distance { "on" } else { "off" }
        );
        let _ = writeln!(
            s,
            "-h{}\t\t\t\t# {} header",
            sign(self.header),
            if self.header { "output" } else { "no" }
        );
        let _ = writeln!(
            s,
            "-f{}{}\t\t\t\t# format input/output = {}/{}",
            inform.as_char(),
            outform.as_char(),
            OutputFormat::from(inform).name(),
            outform.name()
        );
        let _ = write!(s, "-o{:<9}\t\t\t# output", self.output_spec);
        for c in self.output_spec.chars() {
            let name = match c {
                't' | 'T' => "trace",
                'o' => "origin",
                'd' => "direction",
                'r' => "reflect_contrib",
                'R' => "reflect_length",
                'x' => "unreflect_contrib",
                'X' => "unreflect_length",
                'v' => "value",
                'V' => "contribution",
                'l' => "length",
                'L' => "first_length",
                'c' => "local",
                'p' => "point",
                'n' => "normal",
                'N' => "unperturbed_normal",
                's' => "surface",
                'w' => "weight",
                'W' => "coefficient",
                'm' => "modifier",
                'M' => "material",
                '~' | '-' => "stroke",
                _ => continue,
            };
            let _ = write!(s, " {name}");
        }
        s.push('\n');
        let _ = writeln!(
            s,
            "-w{}\t\t\t\t# warning messages {}",
            sign(self.warnings),
            if self.warnings { "on" } else { "off" }
        );
        let _ = writeln!(s, "-ab {:<9}\t\t\t# ambient bounces", self.ambient_bounces);
        let _ = writeln!(s, "-ad {:<9}\t\t\t# ambient divisions", self.ambient_divisions);
        let _ = writeln!(s, "-ar {:<9}\t\t\t# ambient resolution", self.ambient_resolution);
        let _ = writeln!(
            s,
            "-av {:.6} {:.6} {:.6}\t# ambient value",
            self.ambient_value.first().copied().unwrap_or_default(),
            self.ambient_value.get(1).copied().unwrap_or_default(),
            self.ambient_value.get(2).copied().unwrap_or_default()
        );
        if let Some(af) = &self.ambient_file {
            let _ = writeln!(s, "-af {}\t\t\t# ambient file", af.display());
        }
        let _ = writeln!(s, "-lr {:<9}\t\t\t# limit reflection", self.reflection_limit);
        let _ = writeln!(s, "-lw {:<9.6}\t\t\t# limit weight", self.weight_limit);
        let _ = writeln!(
            s,
            "-u{}\t\t\t\t# {}",
            sign(self.uncorrelated),
            if self.uncorrelated {
                "uncorrelated Monte Carlo sampling"
            } else {
                "correlated quasi-Monte Carlo sampling"
            }
        );
        let _ = writeln!(
            s,
            "-g{}\t\t\t\t# kernel backend {}",
            sign(self.gpu),
            if self.gpu { "on" } else { "off" }
        );
        s
    }
}

/// Boolean switches and their long names, in the order they are emitted.
const TOGGLES: [(&str, &str, bool); 6] = [
    ("-I", "irradiance", false),
    ("-ld", "limit-distance", false),
    ("-h", "header", true),
    ("-w", "warnings", true),
    ("-u", "uncorrelated", false),
    ("-g", "gpu", false),
];

/// Kind of value an option expects.
#[derive(Copy, Clone)]
enum Arg {
    Int,
    Real,
    Word,
}

/// Rewrites a Radiance-style command line into clap long options.
///
/// Short options take their values as separate words (`-n 4`, `-ab 2`,
/// `-av .1 .1 .1`) or inline letters (`-fad`, `-ovd`). Boolean switches
/// accept a trailing `+`, `-`, `y`, `n`, `t`, `f`, `1` or `0` and toggle
/// when given bare. Tokens that already start with `--` pass through
/// unchanged. Everything from the first non-option word on is positional.
///
/// * `args` - Arguments including the program name.
pub fn expand_args(args: &[String]) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(args.len());
    let mut toggles: Vec<Option<bool>> = vec![None; TOGGLES.len()];
    let mut it = args.iter().enumerate().peekable();

    if let Some((_, prog)) = it.next() {
        out.push(prog.clone());
    }

    let bad = |tok: &str| RtError::Usage(format!("command line error at '{tok}'"));

    let mut positional: Vec<String> = Vec::new();
    while let Some((_, tok)) = it.next() {
        if !tok.starts_with('-') || tok == "-" {
            positional.push(tok.clone());
            positional.extend(it.by_ref().map(|(_, t)| t.clone()));
            break;
        }
        if tok.starts_with("--") {
            out.push(tok.clone());
            continue;
        }

        // Fetch `n` values of the given kind following `tok`.
        let mut values = |n: usize, kind: Arg| -> Result<Vec<String>> {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                let (_, next) = it.next().ok_or_else(|| bad(tok))?;
                let ok = match kind {
                    Arg::Int => next.parse::<i64>().is_ok(),
                    Arg::Real => next.parse::<Float>().map_or(false, |f| f.is_finite()),
                    Arg::Word => true,
                };
                if !ok {
                    return Err(bad(tok));
                }
                v.push(next.clone());
            }
            Ok(v)
        };

        let long = |name: &str, value: &str| format!("--{name}={value}");

        match tok.as_str() {
            "-version" => out.push("--version".to_string()),
            "-defaults" | "-help" => out.push("--defaults".to_string()),
            "-n" => out.push(long("nprocs", &values(1, Arg::Int)?[0])),
            "-x" => out.push(long("xres", &values(1, Arg::Int)?[0])),
            "-y" => out.push(long("yres", &values(1, Arg::Int)?[0])),
            "-e" => out.push(long("errfile", &values(1, Arg::Word)?[0])),
            "-P" => out.push(long("persist", &values(1, Arg::Word)?[0])),
            "-PP" => out.push(long("persist-parallel", &values(1, Arg::Word)?[0])),
            "-ab" => out.push(long("ambient-bounces", &values(1, Arg::Int)?[0])),
            "-ad" => out.push(long("ambient-divisions", &values(1, Arg::Int)?[0])),
            "-ar" => out.push(long("ambient-resolution", &values(1, Arg::Int)?[0])),
            "-af" => out.push(long("ambient-file", &values(1, Arg::Word)?[0])),
            "-av" => out.push(long("ambient-value", &values(3, Arg::Real)?.join(","))),
            "-lr" => out.push(long("reflection-limit", &values(1, Arg::Int)?[0])),
            "-lw" => out.push(long("weight-limit", &values(1, Arg::Real)?[0])),
            "-ti" | "-te" | "-tI" | "-tE" => {
                let mode = &tok[2..];
                out.push(long("trace", &format!("{mode}:{}", values(1, Arg::Word)?[0])));
            }
            t if t.starts_with("-o") => out.push(long("outspec", &t[2..])),
            t if t.starts_with("-f") => {
                let io: Vec<char> = t[2..].chars().collect();
                let spec = match io.as_slice() {
                    [i] if "afd".contains(*i) => format!("{i}{i}"),
                    [i, o] if "afd".contains(*i) && "afdc".contains(*o) => format!("{i}{o}"),
                    _ => return Err(bad(t)),
                };
                out.push(long("format", &spec));
            }
            t => {
                // Longest prefix first so `-ld` is not taken for something else.
                let (idx, suffix) = TOGGLES
                    .iter()
                    .enumerate()
                    .filter(|(_, (flag, _, _))| t.starts_with(flag))
                    .max_by_key(|(_, (flag, _, _))| flag.len())
                    .map(|(i, (flag, _, _))| (i, &t[flag.len()..]))
                    .ok_or_else(|| bad(t))?;
                let current = toggles[idx].unwrap_or(TOGGLES[idx].2);
                let value = match suffix {
                    "" => !current,
                    "+" | "y" | "Y" | "t" | "T" | "1" => true,
                    "-" | "n" | "N" | "f" | "F" | "0" => false,
                    _ => return Err(bad(t)),
                };
                toggles[idx] = Some(value);
            }
        }
    }

    for ((_, name, _), value) in TOGGLES.iter().zip(toggles) {
        if let Some(v) = value {
            out.push(format!("--{name}={v}"));
        }
    }

    match positional.as_slice() {
        [] => {}
        [scene] => out.push(scene.clone()),
        [_, extra, ..] => return Err(bad(extra)),
    }

    Ok(out)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn expands_short_options() {
        let out = expand_args(&args("rtrace -n 2 -x 4 -y 0 -fad -ovd -ab 1 -av .1 .2 .3 scene.rad")).unwrap();
        assert_eq!(
            out,
            args(
                "rtrace --nprocs=2 --xres=4 --yres=0 --format=ad --outspec=vd --ambient-bounces=1 \
                 --ambient-value=.1,.2,.3 scene.rad"
            )
        );
    }

    #[test]
    fn single_format_letter_applies_to_both() {
        let out = expand_args(&args("rtrace -ff s")).unwrap();
        assert_eq!(out[1], "--format=ff");
        assert!(expand_args(&args("rtrace -fca s")).is_err());
        assert!(expand_args(&args("rtrace -fac s")).is_ok());
    }

    #[test]
    fn toggles_resolve_against_defaults() {
        let out = expand_args(&args("rtrace -h -I -ld+ -ld -w- s")).unwrap();
        assert!(out.contains(&"--header=false".to_string()));
        assert!(out.contains(&"--irradiance=true".to_string()));
        assert!(out.contains(&"--limit-distance=false".to_string()));
        assert!(out.contains(&"--warnings=false".to_string()));
        assert!(!out.iter().any(|a| a.starts_with("--gpu")));
    }

    #[test]
    fn rejects_bad_tokens() {
        assert_eq!(
            expand_args(&args("rtrace -q s")),
            Err(RtError::Usage("command line error at '-q'".to_string()))
        );
        assert_eq!(
            expand_args(&args("rtrace -n x s")),
            Err(RtError::Usage("command line error at '-n'".to_string()))
        );
        assert_eq!(
            expand_args(&args("rtrace -hx s")),
            Err(RtError::Usage("command line error at '-hx'".to_string()))
        );
        assert_eq!(
            expand_args(&args("rtrace a b")),
            Err(RtError::Usage("command line error at 'b'".to_string()))
        );
        assert!(expand_args(&args("rtrace -n")).is_err());
    }

    #[test]
    fn trace_lists_keep_order() {
        let out = expand_args(&args("rtrace -ti a -te b -tI f.txt s")).unwrap();
        assert_eq!(out[1..4], args("--trace=i:a --trace=e:b --trace=I:f.txt")[..]);
    }

    #[test]
    fn parses_options() {
        let o = Options::from_args(&args("rtrace -n 3 -x 2 -fdf -ovn -h- -PP lock s.rad")).unwrap();
        assert_eq!(o.nprocs, 3);
        assert_eq!(o.xres, 2);
        assert_eq!(o.formats().unwrap(), (VectorFormat::Double, OutputFormat::Float));
        assert_eq!(o.output_spec, "vn");
        assert!(!o.header);
        assert_eq!(o.persist_file(), Some((Path::new("lock"), true)));
        assert_eq!(o.scene_path().unwrap(), Path::new("s.rad"));
        assert_eq!(o.command_line_options().len(), 10);
    }

    #[test]
    fn negative_process_count_reaches_policy() {
        let o = Options::from_args(&args("rtrace -n -2 s")).unwrap();
        assert_eq!(o.nprocs, -2);
    }

    #[test]
    fn missing_scene() {
        let o = Options::from_args(&args("rtrace -n 1")).unwrap();
        assert_eq!(o.scene_path(), Err(RtError::Usage("missing scene argument".to_string())));
    }

    #[test]
    fn defaults_listing() {
        let o = Options::from_args(&args("rtrace s")).unwrap();
        let d = o.print_defaults();
        assert!(d.contains("-n 1 "));
        assert!(d.contains("# flush interval"));
        assert!(d.contains("-h+"));
        assert!(d.contains("-faa"));
        assert!(d.contains("# output value\n"));
        assert!(!d.contains("-I+"));
    }
}
