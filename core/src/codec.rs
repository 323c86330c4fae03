//! Vector codec for the ray input and result output streams.

use crate::color::Rgb;
use crate::error::{Result, RtError};
use crate::geometry::{Float, Vector3};
use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, BufRead, Write};

/// Maximum length of an ascii token.
const MAX_WORD: usize = 128;

/// Encoding of ray vectors on the input stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VectorFormat {
    /// Whitespace separated decimal numbers.
    Ascii,
    /// Native-endian 32-bit floats.
    Float,
    /// Native-endian 64-bit floats.
    Double,
}

impl VectorFormat {
    /// Returns the format for a format selector character.
    ///
    /// * `c` - One of `a`, `f` or `d`.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a' => Some(Self::Ascii),
            'f' => Some(Self::Float),
            'd' => Some(Self::Double),
            _ => None,
        }
    }

    /// Returns the selector character.
    pub fn as_char(&self) -> char {
        match self {
            Self::Ascii => 'a',
            Self::Float => 'f',
            Self::Double => 'd',
        }
    }
}

/// Encoding of result values on the output stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// `%e` formatted text, tab separated, one record per line.
    Ascii,
    /// Native-endian 32-bit floats.
    Float,
    /// Native-endian 64-bit floats.
    Double,
    /// Four byte packed colour with a shared exponent.
    Rgbe,
}

impl OutputFormat {
    /// Returns the format for a format selector character.
    ///
    /// * `c` - One of `a`, `f`, `d` or `c`.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'a' => Some(Self::Ascii),
            'f' => Some(Self::Float),
            'd' => Some(Self::Double),
            'c' => Some(Self::Rgbe),
            _ => None,
        }
    }

    /// Returns the selector character.
    pub fn as_char(&self) -> char {
        match self {
            Self::Ascii => 'a',
            Self::Float => 'f',
            Self::Double => 'd',
            Self::Rgbe => 'c',
        }
    }

    /// Returns the name written in `FORMAT=` header lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Float => "float",
            Self::Double => "double",
            Self::Rgbe => "32-bit_rle_rgbe",
        }
    }

    /// Returns true for the binary encodings.
    pub fn is_binary(&self) -> bool {
        !matches!(self, Self::Ascii)
    }
}

impl From<VectorFormat> for OutputFormat {
    fn from(f: VectorFormat) -> Self {
        match f {
            VectorFormat::Ascii => Self::Ascii,
            VectorFormat::Float => Self::Float,
            VectorFormat::Double => Self::Double,
        }
    }
}

/// Parses a `-f` selector such as `a`, `fd` or `ac` into input and output
/// formats. A missing output selector matches the input format.
///
/// * `spec` - The selector string.
pub fn parse_format_spec(spec: &str) -> Result<(VectorFormat, OutputFormat)> {
    let mut chars = spec.chars();
    let bad = || RtError::Usage(format!("bad i/o format '{spec}'"));
    let input = chars.next().and_then(VectorFormat::from_char).ok_or_else(bad)?;
    let output = match chars.next() {
        None => OutputFormat::from(input),
        Some(c) => OutputFormat::from_char(c).ok_or_else(bad)?,
    };
    if chars.next().is_some() {
        return Err(bad());
    }
    Ok((input, output))
}

/// Reads one vector. Returns `None` on a clean end of stream before the
/// first component; a partial or malformed vector is a `Format` error.
///
/// Ascii input is a stream of whitespace separated words and line breaks
/// carry no meaning, so a line with too few words borrows the next line's
/// words. Only a non-numeric word or an end of stream inside a vector is
/// rejected.
///
/// * `reader` - The input stream.
/// * `format` - Input encoding.
pub fn read_vector<R: BufRead>(reader: &mut R, format: VectorFormat) -> Result<Option<Vector3>> {
    match format {
        VectorFormat::Ascii => {
            let mut v = [0.0; 3];
            for (i, c) in v.iter_mut().enumerate() {
                match read_word(reader)? {
                    None if i == 0 => return Ok(None),
                    None => return Err(RtError::Format("unexpected end of input in vector".into())),
                    Some(word) => *c = parse_float(&word)?,
                }
            }
            Ok(Some(Vector3::from(v)))
        }
        VectorFormat::Float | VectorFormat::Double => {
            if reader.fill_buf()?.is_empty() {
                return Ok(None);
            }
            let mut v = [0.0; 3];
            for c in v.iter_mut() {
                let r = if format == VectorFormat::Float {
                    reader.read_f32::<NativeEndian>().map(Float::from)
                } else {
                    reader.read_f64::<NativeEndian>()
                };
                *c = r.map_err(|e| match e.kind() {
                    io::ErrorKind::UnexpectedEof => RtError::Format("short binary read".into()),
                    _ => RtError::from(e),
                })?;
            }
            Ok(Some(Vector3::from(v)))
        }
    }
}

/// Writes one vector in an input encoding.
///
/// * `writer` - The output stream.
/// * `format` - Encoding.
/// * `v`      - The vector.
pub fn write_vector<W: Write>(writer: &mut W, format: VectorFormat, v: &Vector3) -> Result<()> {
    match format {
        VectorFormat::Ascii => write!(writer, "{} {} {} ", v.x, v.y, v.z)?,
        VectorFormat::Float => {
            for c in v.to_array() {
                writer.write_f32::<NativeEndian>(c as f32)?;
            }
        }
        VectorFormat::Double => {
            for c in v.to_array() {
                writer.write_f64::<NativeEndian>(c)?;
            }
        }
    }
    Ok(())
}

/// Writes real values in an output encoding.
///
/// * `writer` - The output stream.
/// * `format` - Encoding.
/// * `values` - The values.
pub fn write_reals<W: Write + ?Sized>(writer: &mut W, format: OutputFormat, values: &[Float]) -> Result<()> {
    match format {
        OutputFormat::Ascii => {
            for &v in values {
                write!(writer, "{}\t", format_exp(v))?;
            }
        }
        OutputFormat::Float => {
            for &v in values {
                writer.write_f32::<NativeEndian>(v as f32)?;
            }
        }
        OutputFormat::Double => {
            for &v in values {
                writer.write_f64::<NativeEndian>(v)?;
            }
        }
        OutputFormat::Rgbe => {
            if values.len() != 3 {
                return Err(RtError::Consistency(format!(
                    "packed colour output called with {} components",
                    values.len()
                )));
            }
            writer.write_all(&Rgb::new(values[0], values[1], values[2]).to_rgbe())?;
        }
    }
    Ok(())
}

/// Formats a value like C's `%e`, e.g. `1.000000e+00`.
///
/// * `v` - The value.
pub fn format_exp(v: Float) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{v:.6e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => s,
    }
}

/// Reads a whitespace delimited word. Returns `None` at end of stream.
fn read_word<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut word = String::new();
    loop {
        let (consumed, done) = {
            let buf = reader.fill_buf()?;
            if buf.is_empty() {
                break;
            }
            let mut consumed = 0;
            let mut done = false;
            for &b in buf {
                consumed += 1;
                if b.is_ascii_whitespace() {
                    if !word.is_empty() {
                        done = true;
                        break;
                    }
                } else {
                    if word.len() >= MAX_WORD {
                        return Err(RtError::Format("input token too long".into()));
                    }
                    word.push(b as char);
                }
            }
            (consumed, done)
        };
        reader.consume(consumed);
        if done {
            break;
        }
    }
    Ok(if word.is_empty() { None } else { Some(word) })
}

/// Parses a decimal floating point token, rejecting `inf`, `nan` and other
/// non-numeric spellings that `str::parse` would accept.
fn parse_float(word: &str) -> Result<Float> {
    let numeric = word
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && word.chars().any(|c| c.is_ascii_digit());
    if !numeric {
        return Err(RtError::Format(format!("bad number '{word}' in input")));
    }
    word.parse::<Float>()
        .map_err(|_| RtError::Format(format!("bad number '{word}' in input")))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
