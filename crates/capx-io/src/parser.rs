//! Deck grammar reader.
//!
//! Recognizes the `C D T Q S N F E`/`e` directive set: conductor and
//! dielectric sub-file inclusion, triangular/quadrilateral/segment panels,
//! conductor renaming, in-line sub-file anchoring, and end-of-file. Complex
//! permittivity is accepted in `a+jb`/`a-jb` form.
//!
//! Mirrors the recursive-descent shape of the original `Parse3DInputFile`/
//! `Parse2DInputFile` pair: one file (or in-line anchor) is read line by
//! line, and `C`/`D` directives recurse into either a previously-anchored
//! in-line block or a file on disk resolved relative to the including
//! file's directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use nalgebra::{Vector2, Vector3};
use num_complex::Complex64;

use capx_core::geom::triangulate_quad;
use capx_core::{Conductor, ConductorRegistry, Dimension, Element, ElementFlags, ElementId, Panel, Segment, Tree, Triangle};

use crate::error::Error;

/// Output of parsing one deck: the leaf arena, the finalized conductor
/// registry, and the leaves belonging to each final registry group.
#[derive(Debug)]
pub struct ParsedDeck {
    pub tree: Tree,
    pub registry: ConductorRegistry,
    pub leaves_by_group: BTreeMap<u32, Vec<ElementId>>,
    pub dimension: Dimension,
    /// Set if any permittivity value in the deck carried a non-zero
    /// imaginary part. Only the real part of each permittivity currently
    /// reaches [`Conductor`] (it stores a plain `f64`); the imaginary
    /// contribution is not yet threaded through the kernel, so this flag
    /// exists purely so callers can decide whether to reject a deck that
    /// needs complex-permittivity support the solver doesn't have yet.
    pub complex_permittivity: bool,
}

/// One conductor or dielectric group, tracked locally while parsing so `N`
/// can rename or merge groups without mutable access into a
/// [`ConductorRegistry`]'s private fields; registry entries are only
/// created once, at the end, from whatever groups remain alive.
struct GroupBuilder {
    name: String,
    is_dielectric: bool,
    outer_perm: Complex64,
    inner_perm: Complex64,
    dielectric_refpoint: Vector3<f64>,
    leaves: Vec<ElementId>,
    dead: bool,
}

/// Accumulated translation plus the builder index panels should register
/// under, threaded through nested `C`/`D` recursion. `None` at the top
/// level, where every panel's conductor comes from its own `<cond>` token.
type GroupCtx = Option<(usize, Vector3<f64>)>;

struct Parser {
    tree: Tree,
    groups: Vec<GroupBuilder>,
    complex_permittivity: bool,
    open_group: Option<usize>,
    instance_counter: HashMap<String, u32>,
    dimension: Dimension,
}

/// Parse a deck from `path`, producing the leaf arena and conductor
/// registry the rest of the solver consumes.
///
/// # Errors
/// Returns [`Error::Open`] if `path` cannot be read, or [`Error::Syntax`]
/// for any malformed directive, encountered anywhere in the recursive
/// sub-file chain.
pub fn parse_deck(path: &Path, dimension: Dimension) -> Result<ParsedDeck, Error> {
    let mut parser = Parser {
        tree: Tree::new(),
        groups: Vec::new(),
        complex_permittivity: false,
        open_group: None,
        instance_counter: HashMap::new(),
        dimension,
    };
    parser.parse_file(path, None)?;
    parser.finish()
}

fn syntax(path: &Path, line: usize, message: impl Into<String>) -> Error {
    Error::Syntax { path: path.to_path_buf(), line, message: message.into() }
}

fn read_lines(path: &Path) -> Result<Vec<String>, Error> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| Error::Open { path: path.to_path_buf(), source })?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Strip a trailing `*` comment, FasterCap's convention for end-of-line
/// and whole-line remarks.
fn strip_comment(line: &str) -> &str {
    match line.find('*') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn parse_floats(path: &Path, line_no: usize, tokens: &[&str]) -> Result<Vec<f64>, Error> {
    tokens
        .iter()
        .map(|t| {
            t.parse::<f64>()
                .map_err(|_| syntax(path, line_no, format!("expected a number, found '{t}'")))
        })
        .collect()
}

/// Parse a permittivity token, accepting a plain real number or FasterCap's
/// `a+jb`/`a-jb` complex syntax (`a` or `b` may be omitted, e.g. `-j0.5`).
fn parse_complex(path: &Path, line_no: usize, token: &str) -> Result<Complex64, Error> {
    let Some(j_pos) = token.find('j') else {
        let re: f64 = token
            .parse()
            .map_err(|_| syntax(path, line_no, format!("invalid permittivity '{token}'")))?;
        return Ok(Complex64::new(re, 0.0));
    };
    let (before, after) = token.split_at(j_pos);
    let after = &after[1..];
    let (re, sign) = if before.is_empty() {
        (0.0, '+')
    } else {
        let sign = before
            .chars()
            .last()
            .filter(|c| *c == '+' || *c == '-')
            .ok_or_else(|| syntax(path, line_no, format!("invalid permittivity '{token}'")))?;
        let re_str = &before[..before.len() - 1];
        let re = if re_str.is_empty() {
            0.0
        } else {
            re_str
                .parse()
                .map_err(|_| syntax(path, line_no, format!("invalid permittivity '{token}'")))?
        };
        (re, sign)
    };
    let mag: f64 = after
        .parse()
        .map_err(|_| syntax(path, line_no, format!("invalid permittivity '{token}'")))?;
    let im = if sign == '-' { -mag } else { mag };
    Ok(Complex64::new(re, im))
}

impl Parser {
    fn find_live_group(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| !g.dead && g.name == name)
    }

    /// Create a fresh, uniquely-named group for a `C`/`D` directive's own
    /// file name, disambiguating repeats the way the deck format requires:
    /// a second `C`/`D` using the same file name without a chaining `+`/`-`
    /// is a brand new, distinct conductor, not a merge.
    fn new_named_group(
        &mut self,
        file: &str,
        is_dielectric: bool,
        outer_perm: Complex64,
        inner_perm: Complex64,
        refpoint: Vector3<f64>,
    ) -> usize {
        let count = self.instance_counter.entry(file.to_string()).or_insert(0);
        *count += 1;
        let name = if *count == 1 { file.to_string() } else { format!("{file}#{count}") };
        self.groups.push(GroupBuilder {
            name,
            is_dielectric,
            outer_perm,
            inner_perm,
            dielectric_refpoint: refpoint,
            leaves: Vec::new(),
            dead: false,
        });
        self.groups.len() - 1
    }

    fn top_level_group(&mut self, name: &str) -> usize {
        match self.find_live_group(name) {
            Some(idx) => idx,
            None => {
                self.groups.push(GroupBuilder {
                    name: name.to_string(),
                    is_dielectric: false,
                    outer_perm: Complex64::new(1.0, 0.0),
                    inner_perm: Complex64::new(1.0, 0.0),
                    dielectric_refpoint: Vector3::zeros(),
                    leaves: Vec::new(),
                    dead: false,
                });
                self.groups.len() - 1
            }
        }
    }

    /// Read one on-disk file and process its body, skipping the mandatory
    /// title line. `ctx` is `None` for the top-level deck and `Some` when
    /// this file was pulled in by a `C`/`D` directive.
    fn parse_file(&mut self, path: &Path, ctx: GroupCtx) -> Result<(), Error> {
        let lines = read_lines(path)?;
        let body: Vec<&str> = lines.iter().map(String::as_str).skip(1).collect();
        self.process_body(path, &body, 2, ctx)
    }

    /// Process a directive body, whether it came from a file (after its
    /// title line) or from an in-line `F`-anchored block. `start_line` is
    /// the 1-based line number of `body[0]`, used for diagnostics.
    fn process_body(
        &mut self,
        path: &Path,
        body: &[&str],
        start_line: usize,
        ctx: GroupCtx,
    ) -> Result<(), Error> {
        let mut anchors: HashMap<String, Vec<String>> = HashMap::new();
        let mut current_anchor: Option<String> = None;

        for (offset_idx, raw) in body.iter().enumerate() {
            let line_no = start_line + offset_idx;
            let content = strip_comment(raw).trim();
            if content.is_empty() {
                continue;
            }
            let tokens: Vec<&str> = content.split_whitespace().collect();

            match tokens[0] {
                "F" => {
                    let name = tokens
                        .get(1)
                        .ok_or_else(|| syntax(path, line_no, "F directive requires a name"))?;
                    current_anchor = Some((*name).to_string());
                    anchors.entry((*name).to_string()).or_default();
                }
                "T" | "Q" | "S" | "N" => {
                    if let Some(anchor) = &current_anchor {
                        anchors.get_mut(anchor).expect("anchor opened above").push((*raw).to_string());
                    } else {
                        self.dispatch_panel_directive(path, line_no, &tokens, ctx)?;
                    }
                }
                "C" => {
                    self.handle_conductor_directive(path, line_no, &tokens, &anchors, ctx)?;
                }
                "D" => {
                    self.handle_dielectric_directive(path, line_no, &tokens, &anchors, ctx)?;
                }
                "E" | "e" => return Ok(()),
                other => {
                    return Err(syntax(path, line_no, format!("unrecognized directive '{other}'")))
                }
            }
        }
        Ok(())
    }

    fn dispatch_panel_directive(
        &mut self,
        path: &Path,
        line_no: usize,
        tokens: &[&str],
        ctx: GroupCtx,
    ) -> Result<(), Error> {
        if tokens[0] == "N" {
            return self.handle_rename(path, line_no, tokens);
        }
        let wrong_dimension = match (tokens[0], self.dimension) {
            ("T" | "Q", Dimension::D2) => true,
            ("S", Dimension::D3) => true,
            _ => false,
        };
        if wrong_dimension {
            return Err(syntax(path, line_no, format!("{} directive is not valid for this problem's dimensionality", tokens[0])));
        }
        let cond_name = tokens
            .get(1)
            .ok_or_else(|| syntax(path, line_no, format!("{} directive requires a conductor name", tokens[0])))?;
        let (gid, offset) = match ctx {
            Some((base_gid, offset)) => (self.resolve_subfile_group(base_gid, cond_name), offset),
            None => (self.top_level_group(cond_name), Vector3::zeros()),
        };
        match tokens[0] {
            "T" => self.create_triangle(path, line_no, tokens, gid, offset),
            "Q" => self.create_quad(path, line_no, tokens, gid, offset),
            "S" => self.create_segment(path, line_no, tokens, gid, offset),
            _ => unreachable!(),
        }
    }

    /// Resolve the group a panel inside an included `C`/`D` sub-file
    /// belongs to. Dielectric sub-files collapse every panel into the
    /// including directive's single group regardless of the panel's own
    /// declared name; conductor sub-files instead concatenate the panel's
    /// own name onto the including group's name, so differently-named
    /// panels inside one included conductor file become distinct
    /// conductors (mirrors `strcat(name, tmpname)` in the original
    /// autorefine pass for `isdiel == false`).
    fn resolve_subfile_group(&mut self, base_gid: usize, cond_name: &str) -> usize {
        if self.groups[base_gid].is_dielectric {
            return base_gid;
        }
        let derived_name = format!("{}{}", self.groups[base_gid].name, cond_name);
        match self.find_live_group(&derived_name) {
            Some(idx) => idx,
            None => {
                let base = &self.groups[base_gid];
                let (outer_perm, inner_perm) = (base.outer_perm, base.inner_perm);
                self.groups.push(GroupBuilder {
                    name: derived_name,
                    is_dielectric: false,
                    outer_perm,
                    inner_perm,
                    dielectric_refpoint: Vector3::zeros(),
                    leaves: Vec::new(),
                    dead: false,
                });
                self.groups.len() - 1
            }
        }
    }

    fn handle_rename(&mut self, path: &Path, line_no: usize, tokens: &[&str]) -> Result<(), Error> {
        let old = *tokens
            .get(1)
            .ok_or_else(|| syntax(path, line_no, "N directive requires an old and a new name"))?;
        let new = *tokens
            .get(2)
            .ok_or_else(|| syntax(path, line_no, "N directive requires an old and a new name"))?;
        let Some(old_idx) = self.find_live_group(old) else {
            return Err(syntax(path, line_no, format!("N directive references unknown conductor '{old}'")));
        };
        match self.find_live_group(new) {
            Some(new_idx) if new_idx != old_idx => {
                // MergeConductors: fold the old group's leaves into the
                // already-existing target and drop the old group.
                let old_leaves = std::mem::take(&mut self.groups[old_idx].leaves);
                self.groups[new_idx].leaves.extend(old_leaves);
                self.groups[old_idx].dead = true;
            }
            _ => {
                self.groups[old_idx].name = new.to_string();
            }
        }
        Ok(())
    }

    fn handle_conductor_directive(
        &mut self,
        path: &Path,
        line_no: usize,
        tokens: &[&str],
        anchors: &HashMap<String, Vec<String>>,
        ctx: GroupCtx,
    ) -> Result<(), Error> {
        let chained = tokens.last().copied() == Some("+");
        let numeric_end = tokens.len() - usize::from(chained);
        if numeric_end < 6 {
            return Err(syntax(path, line_no, "C directive requires <file> <outerperm> <x> <y> <z>"));
        }
        let file = tokens[1];
        let outer_perm = parse_complex(path, line_no, tokens[2])?;
        if outer_perm.im != 0.0 {
            self.complex_permittivity = true;
        }
        let nums = parse_floats(path, line_no, &tokens[3..numeric_end])?;
        if nums.len() != 3 {
            return Err(syntax(path, line_no, "C directive requires exactly x y z after the permittivity"));
        }
        let local_offset = Vector3::new(nums[0], nums[1], nums[2]);
        let base_offset = ctx.map_or_else(Vector3::zeros, |(_, o)| o);
        let total_offset = base_offset + local_offset;

        let gid = match self.open_group {
            Some(gid) => gid,
            None => self.new_named_group(file, false, outer_perm, outer_perm, Vector3::zeros()),
        };
        self.open_group = if chained { Some(gid) } else { None };

        self.instantiate_subfile(path, file, anchors, Some((gid, total_offset)))
    }

    fn handle_dielectric_directive(
        &mut self,
        path: &Path,
        line_no: usize,
        tokens: &[&str],
        anchors: &HashMap<String, Vec<String>>,
        ctx: GroupCtx,
    ) -> Result<(), Error> {
        let swapped = tokens.last().copied() == Some("-");
        let numeric_end = tokens.len() - usize::from(swapped);
        if numeric_end < 10 {
            return Err(syntax(
                path,
                line_no,
                "D directive requires <file> <outer> <inner> <x> <y> <z> <refx> <refy> <refz>",
            ));
        }
        let file = tokens[1];
        let mut outer_perm = parse_complex(path, line_no, tokens[2])?;
        let mut inner_perm = parse_complex(path, line_no, tokens[3])?;
        if outer_perm.im != 0.0 || inner_perm.im != 0.0 {
            self.complex_permittivity = true;
        }
        if swapped {
            std::mem::swap(&mut outer_perm, &mut inner_perm);
        }
        let nums = parse_floats(path, line_no, &tokens[4..numeric_end])?;
        if nums.len() != 6 {
            return Err(syntax(
                path,
                line_no,
                "D directive requires exactly x y z refx refy refz after the permittivities",
            ));
        }
        let local_offset = Vector3::new(nums[0], nums[1], nums[2]);
        let base_offset = ctx.map_or_else(Vector3::zeros, |(_, o)| o);
        let total_offset = base_offset + local_offset;
        let refpoint = total_offset + Vector3::new(nums[3], nums[4], nums[5]);

        let gid = self.new_named_group(file, true, outer_perm, inner_perm, refpoint);
        self.instantiate_subfile(path, file, anchors, Some((gid, total_offset)))
    }

    fn instantiate_subfile(
        &mut self,
        path: &Path,
        file: &str,
        anchors: &HashMap<String, Vec<String>>,
        ctx: GroupCtx,
    ) -> Result<(), Error> {
        if let Some(lines) = anchors.get(file) {
            let body: Vec<&str> = lines.iter().map(String::as_str).collect();
            self.process_body(path, &body, 1, ctx)
        } else {
            let sub_path = path
                .parent()
                .map(|dir| dir.join(file))
                .unwrap_or_else(|| PathBuf::from(file));
            self.parse_file(&sub_path, ctx)
        }
    }

    fn create_triangle(
        &mut self,
        path: &Path,
        line_no: usize,
        tokens: &[&str],
        gid: usize,
        offset: Vector3<f64>,
    ) -> Result<(), Error> {
        let nums = parse_floats(path, line_no, &tokens[2..])?;
        if nums.len() != 9 && nums.len() != 12 {
            return Err(syntax(path, line_no, "T directive requires 9 coordinates plus an optional reference point"));
        }
        let vert = |i: usize| Vector3::new(nums[i], nums[i + 1], nums[i + 2]) + offset;
        let tri = Triangle::new([vert(0), vert(3), vert(6)]);
        let refpoint = if nums.len() == 12 {
            Some(Vector3::new(nums[9], nums[10], nums[11]) + offset)
        } else {
            None
        };
        self.push_leaf3(gid, tri, refpoint);
        Ok(())
    }

    fn create_quad(
        &mut self,
        path: &Path,
        line_no: usize,
        tokens: &[&str],
        gid: usize,
        offset: Vector3<f64>,
    ) -> Result<(), Error> {
        let nums = parse_floats(path, line_no, &tokens[2..])?;
        if nums.len() != 12 && nums.len() != 15 {
            return Err(syntax(path, line_no, "Q directive requires 12 coordinates plus an optional reference point"));
        }
        let vert = |i: usize| Vector3::new(nums[i], nums[i + 1], nums[i + 2]) + offset;
        let quad = [vert(0), vert(3), vert(6), vert(9)];
        let refpoint = if nums.len() == 15 {
            Some(Vector3::new(nums[12], nums[13], nums[14]) + offset)
        } else {
            None
        };
        for tri in triangulate_quad(quad) {
            self.push_leaf3(gid, tri, refpoint);
        }
        Ok(())
    }

    fn create_segment(
        &mut self,
        path: &Path,
        line_no: usize,
        tokens: &[&str],
        gid: usize,
        offset: Vector3<f64>,
    ) -> Result<(), Error> {
        let nums = parse_floats(path, line_no, &tokens[2..])?;
        if nums.len() != 4 && nums.len() != 6 {
            return Err(syntax(path, line_no, "S directive requires 4 coordinates plus an optional reference point"));
        }
        let vert = |i: usize| Vector2::new(nums[i] + offset.x, nums[i + 1] + offset.y);
        let seg = Segment::new([vert(0), vert(2)]);
        let refpoint = if nums.len() == 6 {
            Vector2::new(nums[4] + offset.x, nums[5] + offset.y)
        } else {
            let rp = self.groups[gid].dielectric_refpoint;
            Vector2::new(rp.x, rp.y)
        };
        let is_diel = self.groups[gid].is_dielectric;
        let mut elem = Element::leaf_from_panel(Panel::Segment2D(seg), gid as u32, None);
        elem.flags.set(ElementFlags::IS_DIEL, is_diel);
        if is_diel {
            elem.flags.set(ElementFlags::OUTPERM_NORMAL_DIR, seg.outperm_normal_dir(refpoint));
        }
        let id = self.tree.push(elem);
        self.groups[gid].leaves.push(id);
        Ok(())
    }

    /// Shared leaf-push for 3D triangle panels: builds the element, sets
    /// the dielectric-orientation flag from `refpoint` (or, absent one,
    /// the owning group's own dielectric reference point) when the group
    /// is a dielectric interface, and records the leaf under `gid`.
    fn push_leaf3(&mut self, gid: usize, tri: Triangle, refpoint: Option<Vector3<f64>>) {
        let is_diel = self.groups[gid].is_dielectric;
        let mut elem = Element::leaf_from_panel(Panel::Triangle3D(tri), gid as u32, None);
        elem.flags.set(ElementFlags::IS_DIEL, is_diel);
        if is_diel {
            let rp = refpoint.unwrap_or(self.groups[gid].dielectric_refpoint);
            elem.flags.set(ElementFlags::OUTPERM_NORMAL_DIR, tri.outperm_normal_dir(rp));
        }
        let id = self.tree.push(elem);
        self.groups[gid].leaves.push(id);
    }

    /// Finalize: fold every live group into a [`ConductorRegistry`], then
    /// look each group back up by name (registration order is not the
    /// registry's final order, since `finalize` sorts dielectrics before
    /// conductors) to remap every leaf's `conductor` field to its final
    /// group id.
    fn finish(mut self) -> Result<ParsedDeck, Error> {
        let mut registry = ConductorRegistry::new();
        for group in self.groups.iter().filter(|g| !g.dead) {
            registry
                .register(Conductor {
                    name: group.name.clone(),
                    is_dielectric: group.is_dielectric,
                    outer_perm: group.outer_perm.re,
                    inner_perm: group.inner_perm.re,
                    group: 0,
                })
                .map_err(Error::Core)?;
        }
        let registry = registry.finalize().map_err(Error::Core)?;

        let mut leaves_by_group: BTreeMap<u32, Vec<ElementId>> = BTreeMap::new();
        for group in self.groups.iter().filter(|g| !g.dead) {
            let final_id = registry
                .find_by_name(&group.name)
                .expect("every live group was just registered")
                .group;
            for &leaf in &group.leaves {
                self.tree.get_mut(leaf).conductor = final_id;
            }
            leaves_by_group.entry(final_id).or_default().extend(group.leaves.iter().copied());
        }

        Ok(ParsedDeck {
            tree: self.tree,
            registry,
            leaves_by_group,
            dimension: self.dimension,
            complex_permittivity: self.complex_permittivity,
        })
    }
}
