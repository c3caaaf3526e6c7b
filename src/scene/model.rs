use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use image::{Rgb, RgbImage};
use log::{info, warn};
use nalgebra as na;
use na::{vector, Vector2, Vector3};
use obj::raw::object::Polygon;
use obj::raw::{parse_obj, RawObj};

use super::color::Color;

/// Extensions tried, in order, for every texture next to the mesh.
const TEXTURE_EXTENSIONS: [&str; 2] = ["tga", "png"];

/// Indices of position, uv and normal of one triangle corner in the model pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corner {
    pub position: usize,
    pub uv: usize,
    pub normal: usize,
}

/// Image used for texture lookups.
/// (0, 0) in uv is the bottom left corner of the image.
pub struct Texture {
    image: RgbImage,
}

impl Texture {
    pub fn load(path: &Path) -> Result<Texture, Box<dyn Error>> {
        return Ok(Texture::from_image(image::open(path)?.into_rgb8()));
    }

    pub fn from_image(image: RgbImage) -> Texture {
        return Texture { image };
    }

    pub fn width(&self) -> u32 {
        return self.image.width();
    }

    pub fn height(&self) -> u32 {
        return self.image.height();
    }

    /// Pixel at image coordinates, None outside of the image.
    pub fn pixel(&self, x: i32, y: i32) -> Option<Rgb<u8>> {
        if x < 0 || y < 0 || x as u32 >= self.width() || y as u32 >= self.height() {
            return None;
        }
        return Some(*self.image.get_pixel(x as u32, y as u32));
    }

    /// Nearest pixel at normalized uv, clamped to the border. None only for an empty image.
    pub fn sample(&self, uv: Vector2<f32>) -> Option<Rgb<u8>> {
        if self.width() == 0 || self.height() == 0 {
            return None;
        }
        let max_x = (self.width() - 1) as f32;
        let max_y = (self.height() - 1) as f32;
        // Image rows go top to bottom, v goes bottom to top.
        let x = (uv.x * self.width() as f32).clamp(0.0, max_x);
        let y = ((1.0 - uv.y) * self.height() as f32).clamp(0.0, max_y);
        return self.pixel(x as i32, y as i32);
    }
}

/// Triangle mesh with its textures. Read-only for the renderer.
pub struct Model {
    positions: Vec<Vector3<f32>>,
    uvs: Vec<Vector2<f32>>,     // Normalized texture coordinates.
    normals: Vec<Vector3<f32>>, // Not necessarily unit length.
    faces: Vec<[Corner; 3]>,
    diffuse_map: Option<Texture>,
    normal_map: Option<Texture>, // Tangent space normals.
    specular_map: Option<Texture>,
}

impl Model {
    /// Loads a wavefront obj file together with textures named after it:
    /// `<name>_diffuse`, `<name>_nm_tangent` and `<name>_spec`. Missing textures are not an error.
    pub fn load(path: &Path) -> Result<Model, Box<dyn Error>> {
        let mut model = Model::from_reader(BufReader::new(File::open(path)?))?;
        info!("Number of vertices - {}", model.vertex_count());
        info!("Number of faces    - {}", model.face_count());

        model.diffuse_map = load_texture(path, "_diffuse");
        model.normal_map = load_texture(path, "_nm_tangent");
        model.specular_map = load_texture(path, "_spec");

        return Ok(model);
    }

    /// Parses obj data without any textures attached.
    /// Lines, which can't be used, are dropped before parsing.
    pub fn from_reader<R: BufRead>(mut reader: R) -> Result<Model, Box<dyn Error>> {
        let mut contents = String::new();
        reader.read_to_string(&mut contents)?;
        let raw = parse_obj(sanitize_obj(&contents).as_bytes())?;
        return Ok(Model::from_raw(raw));
    }

    fn from_raw(raw: RawObj) -> Model {
        let mut model = Model {
            positions: raw
                .positions
                .iter()
                .map(|position| vector![position.0, position.1, position.2])
                .collect(),
            uvs: raw.tex_coords.iter().map(|uv| vector![uv.0, uv.1]).collect(),
            normals: raw
                .normals
                .iter()
                .map(|normal| vector![normal.0, normal.1, normal.2])
                .collect(),
            faces: Vec::with_capacity(raw.polygons.len()),
            diffuse_map: None,
            normal_map: None,
            specular_map: None,
        };

        // Uniform representation of all polygon kinds, missing attributes as None.
        let mut missing_uv: Option<usize> = None;
        for polygon in raw.polygons.iter() {
            let corners: Vec<(usize, Option<usize>, Option<usize>)> = match polygon {
                Polygon::P(indices) => indices.iter().map(|&p| (p, None, None)).collect(),
                Polygon::PT(indices) => indices.iter().map(|&(p, t)| (p, Some(t), None)).collect(),
                Polygon::PN(indices) => indices.iter().map(|&(p, n)| (p, None, Some(n))).collect(),
                Polygon::PTN(indices) => indices
                    .iter()
                    .map(|&(p, t, n)| (p, Some(t), Some(n)))
                    .collect(),
            };
            if corners.len() < 3 || !model.corners_in_range(&corners) {
                continue;
            }

            // Fan triangulation, so quads and other convex polygons are supported as well.
            for i in 1..corners.len() - 1 {
                let triangle = [corners[0], corners[i], corners[i + 1]];
                let face_normal = model.face_normal([triangle[0].0, triangle[1].0, triangle[2].0]);
                let mut face_normal_index: Option<usize> = None;
                let mut face = [Corner { position: 0, uv: 0, normal: 0 }; 3];
                for (corner, (p, t, n)) in face.iter_mut().zip(triangle) {
                    corner.position = p;
                    corner.uv = match t {
                        Some(t) => t,
                        None => *missing_uv.get_or_insert_with(|| {
                            model.uvs.push(Vector2::zeros());
                            model.uvs.len() - 1
                        }),
                    };
                    corner.normal = match n {
                        Some(n) => n,
                        None => *face_normal_index.get_or_insert_with(|| {
                            model.normals.push(face_normal);
                            model.normals.len() - 1
                        }),
                    };
                }
                model.faces.push(face);
            }
        }

        return model;
    }

    fn corners_in_range(&self, corners: &[(usize, Option<usize>, Option<usize>)]) -> bool {
        return corners.iter().all(|&(p, t, n)| {
            p < self.positions.len()
                && t.map_or(true, |t| t < self.uvs.len())
                && n.map_or(true, |n| n < self.normals.len())
        });
    }

    fn face_normal(&self, positions: [usize; 3]) -> Vector3<f32> {
        let a = self.positions[positions[0]];
        let b = self.positions[positions[1]];
        let c = self.positions[positions[2]];
        return (b - a)
            .cross(&(c - a))
            .try_normalize(f32::EPSILON)
            .unwrap_or(Vector3::z());
    }

    pub fn vertex_count(&self) -> usize {
        return self.positions.len();
    }

    pub fn face_count(&self) -> usize {
        return self.faces.len();
    }

    pub fn face(&self, face: usize) -> [Corner; 3] {
        return self.faces[face];
    }

    /// Raw vertex position from the pool.
    pub fn vert(&self, index: usize) -> Vector3<f32> {
        return self.positions[index];
    }

    pub fn vertex(&self, face: usize, corner: usize) -> Vector3<f32> {
        return self.positions[self.faces[face][corner].position];
    }

    pub fn uv(&self, face: usize, corner: usize) -> Vector2<f32> {
        return self.uvs[self.faces[face][corner].uv];
    }

    pub fn normal(&self, face: usize, corner: usize) -> Vector3<f32> {
        return self.normals[self.faces[face][corner].normal];
    }

    pub fn set_diffuse_map(&mut self, texture: Texture) {
        self.diffuse_map = Some(texture);
    }

    pub fn set_normal_map(&mut self, texture: Texture) {
        self.normal_map = Some(texture);
    }

    pub fn set_specular_map(&mut self, texture: Texture) {
        self.specular_map = Some(texture);
    }

    /// Diffuse color at uv, white without a diffuse texture.
    pub fn diffuse(&self, uv: Vector2<f32>) -> Color {
        match self.diffuse_map.as_ref().and_then(|texture| texture.sample(uv)) {
            Some(Rgb([r, g, b])) => return Color::new(r, g, b),
            None => return Color::WHITE,
        }
    }

    /// Unit normal in tangent space at uv, (0, 0, 1) without a normal map.
    pub fn normal_tangent(&self, uv: Vector2<f32>) -> Vector3<f32> {
        match self.normal_map.as_ref().and_then(|texture| texture.sample(uv)) {
            Some(Rgb(channels)) => {
                let normal = Vector3::from_fn(|i, _| channels[i] as f32 / 255.0 * 2.0 - 1.0);
                return normal.try_normalize(f32::EPSILON).unwrap_or(Vector3::z());
            }
            None => return Vector3::z(),
        }
    }

    /// Specular intensity in [0, 1] at uv, 0.0 without a specular texture.
    pub fn specular(&self, uv: Vector2<f32>) -> f32 {
        match self.specular_map.as_ref().and_then(|texture| texture.sample(uv)) {
            Some(Rgb([value, _, _])) => return value as f32 / 255.0,
            None => return 0.0,
        }
    }
}

/// Looks for `<stem><suffix>.<ext>` next to the model. Failures are only reported.
fn load_texture(model_path: &Path, suffix: &str) -> Option<Texture> {
    let stem = model_path.file_stem()?.to_string_lossy().into_owned();
    for extension in TEXTURE_EXTENSIONS {
        let texture_path = model_path.with_file_name(format!("{}{}.{}", stem, suffix, extension));
        if !texture_path.exists() {
            continue;
        }
        match Texture::load(&texture_path) {
            Ok(texture) => {
                info!("texture file {} loading ok", texture_path.display());
                return Some(texture);
            }
            Err(error) => {
                warn!("texture file {} loading failed: {}", texture_path.display(), error);
            }
        }
    }
    warn!("no {} texture found for {}", suffix, model_path.display());
    return None;
}

/// Keeps only well-formed `v`, `vt`, `vn` and `f` statements, everything else is silently dropped.
/// Faces referencing vertices, that are not defined before them, are dropped as well.
fn sanitize_obj(contents: &str) -> String {
    fn parse_floats(tokens: &[&str]) -> Option<Vec<f32>> {
        return tokens.iter().map(|token| token.parse::<f32>().ok()).collect();
    }

    // Obj indices are 1-based, negative ones are relative to the end of the pool.
    fn index_is_valid(token: &str, count: usize, optional: bool) -> bool {
        if token.is_empty() {
            return optional;
        }
        match token.parse::<i64>() {
            Ok(index) if index > 0 => return index as usize <= count,
            Ok(index) if index < 0 => return index.unsigned_abs() as usize <= count,
            _ => return false,
        }
    }

    let mut output = String::with_capacity(contents.len());
    let (mut n_positions, mut n_uvs, mut n_normals) = (0usize, 0usize, 0usize);
    for line in contents.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some((&statement, arguments)) = tokens.split_first() else {
            continue;
        };
        match statement {
            "v" => match parse_floats(arguments) {
                Some(values) if values.len() >= 3 => {
                    // Extra components (vertex colors) are not used.
                    output.push_str(&format!("v {} {} {}\n", values[0], values[1], values[2]));
                    n_positions += 1;
                }
                _ => continue,
            },
            "vt" => match parse_floats(arguments) {
                Some(values) if !values.is_empty() => {
                    let v = values.get(1).copied().unwrap_or(0.0);
                    output.push_str(&format!("vt {} {}\n", values[0], v));
                    n_uvs += 1;
                }
                _ => continue,
            },
            "vn" => match parse_floats(arguments) {
                Some(values) if values.len() >= 3 => {
                    output.push_str(&format!("vn {} {} {}\n", values[0], values[1], values[2]));
                    n_normals += 1;
                }
                _ => continue,
            },
            "f" => {
                if arguments.len() < 3 {
                    continue;
                }
                // Corners of one face share a single layout out of #, #/#, #//# and #/#/#.
                let layout = |argument: &str| {
                    let parts: Vec<&str> = argument.split('/').collect();
                    (parts.len(), parts.get(1).map_or(false, |t| t.is_empty()))
                };
                let face_layout = layout(arguments[0]);
                let well_formed = arguments.iter().all(|argument| {
                    let parts: Vec<&str> = argument.split('/').collect();
                    layout(*argument) == face_layout
                        && parts.len() <= 3
                        && index_is_valid(parts[0], n_positions, false)
                        && parts.get(1).map_or(true, |t| index_is_valid(t, n_uvs, parts.len() == 3))
                        && parts.get(2).map_or(true, |n| index_is_valid(n, n_normals, false))
                });
                if well_formed {
                    output.push_str(&format!("f {}\n", arguments.join(" ")));
                }
            }
            _ => continue,
        }
    }

    return output;
}
