//! Scene file loader.
//!
//! One directive per line, `#` starts a comment:
//!
//! ```text
//! sky <r> <g> <b>
//! material <name> light|plastic|mirror <r> <g> <b>
//! alias <name> <modifier>
//! sphere <name> <modifier> <cx> <cy> <cz> <radius>
//! ```

use super::scene::*;
use super::sphere::*;
use rtcore::color::Rgb;
use rtcore::error::{Result, RtError};
use rtcore::geometry::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Loads a scene file.
///
/// * `path` - Scene file path.
pub fn load_scene(path: &Path) -> Result<Scene> {
    let text = fs::read_to_string(path)
        .map_err(|e| RtError::system(&format!("cannot load scene \"{}\"", path.display()), e))?;
    let scene = parse_scene(&text, &path.display().to_string())?;
    info!(
        "loaded {} spheres and {} materials from {}",
        scene.spheres.len(),
        scene.materials.len(),
        path.display()
    );
    Ok(scene)
}

/// Parses scene text.
///
/// * `text`   - Scene description.
/// * `source` - Name used in error messages.
pub fn parse_scene(text: &str, source: &str) -> Result<Scene> {
    let mut scene = Scene::default();

    // Modifier name to material index, aliases included.
    let mut modifiers: HashMap<String, usize> = HashMap::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default();
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&directive, args)) = words.split_first() else {
            continue;
        };
        let err = |msg: String| RtError::Usage(format!("{source}:{}: {msg}", lineno + 1));
        let reals = |vals: &[&str]| -> Result<Vec<Float>> {
            vals.iter()
                .map(|w| {
                    w.parse::<Float>()
                        .ok()
                        .filter(|v| v.is_finite())
                        .ok_or_else(|| err(format!("bad number '{w}'")))
                })
                .collect()
        };

        match (directive, args.len()) {
            ("sky", 3) => {
                let c = reals(args)?;
                scene.sky = Rgb::new(c[0], c[1], c[2]);
            }
            ("material", 5) => {
                let name = args[0];
                let kind = MaterialKind::from_keyword(args[1])
                    .ok_or_else(|| err(format!("unknown material type '{}'", args[1])))?;
                let c = reals(&args[2..])?;
                if modifiers.contains_key(name) {
                    return Err(err(format!("duplicate modifier '{name}'")));
                }
                modifiers.insert(name.to_string(), scene.materials.len());
                scene.materials.push(Material {
                    name: Arc::from(name),
                    kind,
                    color: Rgb::new(c[0], c[1], c[2]),
                });
            }
            ("alias", 2) => {
                let (name, target) = (args[0], args[1]);
                let idx = *modifiers
                    .get(target)
                    .ok_or_else(|| err(format!("undefined modifier '{target}'")))?;
                if modifiers.contains_key(name) {
                    return Err(err(format!("duplicate modifier '{name}'")));
                }
                modifiers.insert(name.to_string(), idx);
            }
            ("sphere", 6) => {
                let (name, modifier) = (args[0], args[1]);
                let material = *modifiers
                    .get(modifier)
                    .ok_or_else(|| err(format!("undefined modifier '{modifier}'")))?;
                let v = reals(&args[2..])?;
                if v[3] <= 0.0 {
                    return Err(err(format!("bad radius for sphere '{name}'")));
                }
                scene.spheres.push(Sphere {
                    name: Arc::from(name),
                    modifier: Arc::from(modifier),
                    material,
                    center: Point3::new(v[0], v[1], v[2]),
                    radius: v[3],
                });
            }
            ("sky" | "material" | "alias" | "sphere", n) => {
                return Err(err(format!("wrong number of arguments ({n}) for '{directive}'")));
            }
            _ => return Err(err(format!("unknown directive '{directive}'"))),
        }
    }

    if scene.spheres.is_empty() {
        warn!("{source}: scene has no objects");
    }
    Ok(scene)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TEXT: &str = "
        # a small test scene
        sky 0.1 0.2 0.3
        material white plastic .5 .5 .5
        material lamp light 10 10 10   # bright
        alias paint white
        sphere ball paint 0 0 -5 1
        sphere bulb lamp 0 5 0 .5
    ";

    #[test]
    fn parses_directives() {
        let s = parse_scene(TEXT, "test").unwrap();
        assert_eq!(s.sky, Rgb::new(0.1, 0.2, 0.3));
        assert_eq!(s.materials.len(), 2);
        assert_eq!(s.spheres.len(), 2);
        let ball = &s.spheres[0];
        assert_eq!(&*ball.modifier, "paint");
        assert_eq!(&*s.material_of(ball).name, "white");
        assert_eq!(s.material_of(&s.spheres[1]).kind, MaterialKind::Light);
    }

    #[test]
    fn reports_line_numbers() {
        let e = parse_scene("sky 0 0 0\nsphere a nope 0 0 0 1\n", "x.scn").unwrap_err();
        assert_eq!(e, RtError::Usage("x.scn:2: undefined modifier 'nope'".to_string()));

        let e = parse_scene("material m glass 1 1 1", "x.scn").unwrap_err();
        assert!(matches!(e, RtError::Usage(ref m) if m.contains("unknown material type")));

        assert!(parse_scene("sky 1 1", "x").is_err());
        assert!(parse_scene("sky 1 1 nan", "x").is_err());
        assert!(parse_scene("cube 1", "x").is_err());
        assert!(parse_scene("material m plastic 1 1 1\nsphere s m 0 0 0 -1", "x").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(TEXT.as_bytes()).unwrap();
        let s = load_scene(f.path()).unwrap();
        assert_eq!(s.spheres.len(), 2);
        assert!(matches!(
            load_scene(Path::new("/nonexistent/scene")),
            Err(RtError::System(_))
        ));
    }
}
