/*
  Copyright© 2023 Raúl Wolters(1)

  This file is part of rustronomy-flst.

  rustronomy is free software: you can redistribute it and/or modify it under
  the terms of the European Union Public License version 1.2 or later, as
  published by the European Commission.

  rustronomy is distributed in the hope that it will be useful, but WITHOUT ANY
  WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
  A PARTICULAR PURPOSE. See the European Union Public License for more details.

  You should have received a copy of the EUPL in an/all official language(s) of
  the European Union along with rustronomy.  If not, see
  <https://ec.europa.eu/info/european-union-public-licence_en/>.

  (1) Resident of the Kingdom of the Netherlands; agreement between licensor and
  licensee subject to Dutch law as per article 15 of the EUPL.
*/

//! Top-down extraction of the tree of shapes (Fast Level Set Transform).

use std::fmt;

use ndarray as nd;
use ndarray::ShapeBuilder;
use num_traits::ToPrimitive;
use rayon::prelude::*;

use crate::edgel::{Dir, Edgel, Point, Raster};
use crate::shape::{Shape, ShapeId, ShapeKind};
use crate::FlstError;

//Marks a pixel that no shape has claimed (yet)
const UNCLAIMED: usize = usize::MAX;

/// Memory layout of a flat pixel buffer handed to [`ShapeTree::from_slice`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelOrder {
  /// `buf[y * width + x]`
  #[default]
  RowMajor,
  /// `buf[x * height + y]`
  ColumnMajor,
}

/// Tree of shapes of a grayscale image.
///
/// The tree owns every shape in a single arena, one pixel buffer that all
/// shapes take a contiguous slice of, and for every pixel the smallest shape
/// containing it. The topology never changes after construction. Shape levels
/// and `ignored` flags can be changed afterwards.
#[derive(Debug, Clone)]
pub struct ShapeTree {
  pub(crate) width: usize,
  pub(crate) height: usize,
  pub(crate) shapes: Vec<Shape>,
  pub(crate) pixels: Vec<Point>,
  pub(crate) smallest: Vec<ShapeId>,
}

/// Configures the extraction of a [`ShapeTree`].
#[derive(Debug, Clone)]
pub struct TreeBuilder {
  contours: bool,
}

impl Default for TreeBuilder {
  fn default() -> Self {
    TreeBuilder { contours: true }
  }
}

impl TreeBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record the level line of every shape (on by default). Turning this off
  /// saves a lot of memory on large, noisy images.
  pub fn set_contours(mut self, contours: bool) -> Self {
    self.contours = contours;
    self
  }

  /// Extract the tree of shapes of `img`, indexed as `img[[y, x]]`.
  pub fn build(&self, img: nd::ArrayView2<f64>) -> Result<ShapeTree, FlstError> {
    let raster = Raster::from_view(img)?;
    Extraction::new(&raster, self.contours).run()
  }
}

impl ShapeTree {
  /// Extract the tree of shapes of `img` (indexed as `img[[y, x]]`), recording
  /// contours.
  pub fn new(img: nd::ArrayView2<f64>) -> Result<Self, FlstError> {
    TreeBuilder::new().build(img)
  }

  pub fn builder() -> TreeBuilder {
    TreeBuilder::new()
  }

  /// Same as [`ShapeTree::new`] for any numeric pixel type. Pixels that do not
  /// convert to a finite `f64` are rejected.
  pub fn from_image<T>(img: nd::ArrayView2<T>) -> Result<Self, FlstError>
  where
    T: ToPrimitive + Copy,
  {
    let img = img.mapv(|px| px.to_f64().unwrap_or(f64::NAN));
    Self::new(img.view())
  }

  /// Extract the tree of shapes of a flat `width`x`height` buffer.
  pub fn from_slice(
    buf: &[f64],
    width: usize,
    height: usize,
    order: PixelOrder,
  ) -> Result<Self, FlstError> {
    let expected = width.checked_mul(height).ok_or(FlstError::SizeMismatch {
      expected: usize::MAX,
      actual: buf.len(),
    })?;
    if expected != buf.len() {
      return Err(FlstError::SizeMismatch { expected, actual: buf.len() });
    }
    let view = match order {
      PixelOrder::RowMajor => nd::ArrayView2::from_shape((height, width), buf),
      PixelOrder::ColumnMajor => nd::ArrayView2::from_shape((height, width).f(), buf),
    }
    .map_err(|_| FlstError::SizeMismatch { expected, actual: buf.len() })?;
    Self::new(view)
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  /// Number of shapes, ignored ones included
  pub fn len(&self) -> usize {
    self.shapes.len()
  }

  /// A tree always has a root, so this is always `false`
  pub fn is_empty(&self) -> bool {
    self.shapes.is_empty()
  }

  pub fn root(&self) -> ShapeId {
    ShapeId::ROOT
  }

  pub fn shapes(&self) -> &[Shape] {
    &self.shapes
  }

  pub fn shape(&self, id: ShapeId) -> &Shape {
    &self.shapes[id.0]
  }

  /// Ids of all shapes in arena order
  pub fn ids(&self) -> impl Iterator<Item = ShapeId> {
    (0..self.shapes.len()).map(ShapeId)
  }

  /// All pixels of a shape, those of its descendants included. The first
  /// [`Shape::private_area`] pixels are the shape's own.
  pub fn pixels(&self, id: ShapeId) -> &[Point] {
    let s = &self.shapes[id.0];
    &self.pixels[s.offset..s.offset + s.area]
  }

  /// Pixels that belong to this shape and to none of its raw children
  pub fn private_pixels(&self, id: ShapeId) -> &[Point] {
    let s = &self.shapes[id.0];
    &self.pixels[s.offset..s.offset + s.private_area]
  }

  /// Smallest shape containing the pixel, ignoring the `ignored` flags
  pub fn raw_smallest_shape_at(&self, index: usize) -> Option<ShapeId> {
    self.smallest.get(index).copied()
  }

  /// Smallest unignored shape containing the pixel at linear (row-major) index
  pub fn smallest_shape_at(&self, index: usize) -> Option<ShapeId> {
    self.smallest.get(index).map(|&s| self.visible(s))
  }

  /// Smallest unignored shape containing pixel `(x, y)`
  pub fn smallest_shape(&self, x: usize, y: usize) -> Option<ShapeId> {
    if x >= self.width || y >= self.height {
      return None;
    }
    self.smallest_shape_at(y * self.width + x)
  }

  #[inline(always)]
  fn visible(&self, id: ShapeId) -> ShapeId {
    if self.shapes[id.0].ignored {
      //the root is never ignored, so there always is a true parent
      self.find_parent(id).unwrap_or(ShapeId::ROOT)
    } else {
      id
    }
  }

  pub fn set_level(&mut self, id: ShapeId, level: f64) {
    self.shapes[id.0].level = level;
  }

  /// Logically delete a shape. Its pixels are handed to its true parent by
  /// every lookup and traversal, but nothing is removed from the arena.
  pub fn ignore(&mut self, id: ShapeId) -> Result<(), FlstError> {
    if id == ShapeId::ROOT {
      return Err(FlstError::RootIgnored);
    }
    self.shapes[id.0].ignored = true;
    Ok(())
  }

  /// Undo [`ShapeTree::ignore`]
  pub fn restore(&mut self, id: ShapeId) {
    self.shapes[id.0].ignored = false;
  }

  /// Grain filter: ignore every shape (except the root) whose area is smaller
  /// than `min_area`. Returns the number of shapes that were newly ignored.
  pub fn filter_area(&mut self, min_area: usize) -> usize {
    //the root is never filtered
    let count = self.shapes[1..]
      .par_iter_mut()
      .filter(|shape| shape.area < min_area && !shape.ignored)
      .map(|shape| {
        shape.ignored = true;
      })
      .count();
    log::debug!("grain filter (area < {min_area}) ignored {count} shapes");
    count
  }

  /// Paint every pixel with the level of its smallest unignored shape.
  pub fn reconstruct(&self) -> nd::Array2<f64> {
    let mut out = nd::Array2::<f64>::zeros((self.height, self.width));
    let width = self.width;
    nd::Zip::indexed(&mut out).par_for_each(|(y, x), px| {
      let s = self.visible(self.smallest[y * width + x]);
      *px = self.shapes[s.0].level;
    });
    out
  }
}

impl fmt::Display for ShapeTree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, ">---------[Tree of shapes {}x{}]---------", self.width, self.height)?;
    for id in self.pre_order(ShapeId::ROOT) {
      let s = &self.shapes[id.0];
      writeln!(
        f,
        ">  {id} {} level = {:.2e} - area = {} - private = {}",
        s.kind, s.level, s.area, s.private_area
      )?;
    }
    Ok(())
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              EXTRACTION                                    //
////////////////////////////////////////////////////////////////////////////////

//Shape under construction whose children are still being extracted
struct Frame {
  id: ShapeId,
  seeds: Vec<Edgel>,
  next_seed: usize,
  next_offset: usize,
}

struct Extraction<'a> {
  img: &'a Raster,
  contours: bool,
  shapes: Vec<Shape>,
  pixels: Vec<Point>,
  //Smallest shape claiming each pixel so far, or UNCLAIMED
  owner: Vec<usize>,
  //A closed trace never visits more edgels than this
  max_steps: usize,
  #[cfg(feature = "progress")]
  bar: indicatif::ProgressBar,
}

impl<'a> Extraction<'a> {
  fn new(img: &'a Raster, contours: bool) -> Self {
    let area = img.len();
    Extraction {
      img,
      contours,
      //2x the pixel count bounds the number of shapes
      shapes: Vec::with_capacity(2 * area),
      pixels: vec![Point::default(); area],
      owner: vec![UNCLAIMED; area],
      max_steps: 8 * area + 8,
      #[cfg(feature = "progress")]
      bar: crate::set_up_bar(area as u64),
    }
  }

  fn run(mut self) -> Result<ShapeTree, FlstError> {
    let area = self.img.len();

    /*(1) The root is a synthetic upper set traced along the outer border of
      the image. Its parent level is -inf, so every pixel qualifies.
    */
    self.shapes.push(Shape::new(None, None, 0));
    let root = ShapeId::ROOT;
    let seeds = self.extract(root, Edgel::new(0, 0, Dir::South), f64::NEG_INFINITY)?;
    let mut stack = vec![Frame {
      id: root,
      seeds,
      next_seed: 0,
      next_offset: self.shapes[root.0].private_area,
    }];

    /*(2) Depth-first creation of the children. A child's pixels are placed
      right after its parent's private pixels and its preceding siblings'
      subtrees, so every subtree occupies one contiguous range of the arena.
    */
    while let Some(top) = stack.last_mut() {
      if top.next_seed < top.seeds.len() {
        let seed = top.seeds[top.next_seed];
        top.next_seed += 1;
        let (parent, offset) = (top.id, top.next_offset);

        let child = self.add_child(parent, offset);
        let parent_level = self.shapes[parent.0].level;
        let seeds = self.extract(child, seed, parent_level)?;
        let next_offset = offset + self.shapes[child.0].private_area;
        stack.push(Frame { id: child, seeds, next_seed: 0, next_offset });
      } else {
        //all children done: close the shape and grow its parent
        let done = top.next_offset;
        let id = top.id;
        stack.pop();
        let shape = &mut self.shapes[id.0];
        shape.area = done - shape.offset;
        if let Some(parent) = stack.last_mut() {
          parent.next_offset = done;
        }
      }
    }

    #[cfg(feature = "progress")]
    self.bar.finish();

    //(3) Check the bookkeeping and hand the arena over
    if self.shapes[root.0].area != area {
      return Err(FlstError::Corrupt(format!(
        "root covers {} pixels, image has {area}",
        self.shapes[root.0].area
      )));
    }
    let smallest = self
      .owner
      .iter()
      .enumerate()
      .map(|(i, &o)| {
        if o == UNCLAIMED {
          Err(FlstError::Corrupt(format!("pixel {i} belongs to no shape")))
        } else {
          Ok(ShapeId(o))
        }
      })
      .collect::<Result<Vec<_>, _>>()?;

    log::debug!(
      "extracted {} shapes from a {}x{} image",
      self.shapes.len(),
      self.img.width,
      self.img.height
    );

    Ok(ShapeTree {
      width: self.img.width,
      height: self.img.height,
      shapes: self.shapes,
      pixels: self.pixels,
      smallest,
    })
  }

  /// Prepend a new child to `parent`. Everything but the family links and the
  /// pixel offset is filled in by `init_shape`.
  fn add_child(&mut self, parent: ShapeId, offset: usize) -> ShapeId {
    let id = ShapeId(self.shapes.len());
    let sibling = self.shapes[parent.0].child;
    self.shapes.push(Shape::new(Some(parent), sibling, offset));
    self.shapes[parent.0].child = Some(id);
    id
  }

  /// Build one shape from a seed edgel on its boundary and return one seed
  /// edgel per child.
  fn extract(
    &mut self,
    id: ShapeId,
    seed: Edgel,
    parent_level: f64,
  ) -> Result<Vec<Edgel>, FlstError> {
    self.init_shape(id, seed, parent_level)?;
    let seeds = self.find_children(id)?;
    log::trace!(
      "shape {id}: {} level {} with {} private pixels, {} children",
      self.shapes[id.0].kind,
      self.shapes[id.0].level,
      self.shapes[id.0].private_area,
      seeds.len()
    );
    #[cfg(feature = "progress")]
    self.bar.inc(self.shapes[id.0].private_area as u64);
    Ok(seeds)
  }

  /// Follow the boundary of the shape starting at `seed`. Records the contour,
  /// releases the pixels the parent had provisionally marked along it and
  /// finds the extremal gray level, whose pixel becomes the first private one.
  fn init_shape(&mut self, id: ShapeId, seed: Edgel, parent_level: f64) -> Result<(), FlstError> {
    let img = self.img;
    let first_index = img.index(seed.pt)?;
    let kind =
      if img.gray[first_index] < parent_level { ShapeKind::Lower } else { ShapeKind::Upper };
    let parent = self.shapes[id.0].parent.map_or(UNCLAIMED, |p| p.0);

    let mut level = match kind {
      ShapeKind::Lower => f64::NEG_INFINITY,
      ShapeKind::Upper => f64::INFINITY,
    };
    let mut extremum = seed.pt;
    let mut contour = Vec::new();

    let mut cur = seed;
    let mut steps = 0;
    loop {
      let j = img.index(cur.pt)?;
      let v = img.gray[j];
      if self.contours && !cur.dir.is_diagonal() {
        contour.push(cur.origin());
      }
      if !kind.holds(v, level) {
        level = v;
        extremum = cur.pt;
      }
      if self.owner[j] != UNCLAIMED && self.owner[j] != parent {
        return Err(FlstError::Corrupt(format!(
          "pixel ({}, {}) on the boundary of shape {id} is owned by shape #{}",
          cur.pt.x, cur.pt.y, self.owner[j]
        )));
      }
      self.owner[j] = UNCLAIMED;

      cur.next(img, kind, parent_level);
      steps += 1;
      if cur == seed {
        break;
      }
      if steps > self.max_steps {
        return Err(FlstError::Corrupt(format!("boundary of shape {id} does not close")));
      }
    }

    let shape = &mut self.shapes[id.0];
    shape.kind = kind;
    shape.level = level;
    shape.contour = contour;
    shape.private_area = 0;
    self.claim(id, extremum)
  }

  /// Add a pixel to the private area of shape `id`
  fn claim(&mut self, id: ShapeId, pt: Point) -> Result<(), FlstError> {
    let i = self.img.index(pt)?;
    let shape = &mut self.shapes[id.0];
    let slot = shape.offset + shape.private_area;
    if slot >= self.pixels.len() {
      return Err(FlstError::Corrupt(format!("shape {id} overflows the pixel arena")));
    }
    self.pixels[slot] = pt;
    shape.private_area += 1;
    self.owner[i] = id.0;
    Ok(())
  }

  /// Flood the private area of the shape and collect one seed per child.
  fn find_children(&mut self, id: ShapeId) -> Result<Vec<Edgel>, FlstError> {
    let mut seeds = Vec::new();
    //the private area grows while we walk it
    let mut i = 0;
    while i < self.shapes[id.0].private_area {
      let pt = self.pixels[self.shapes[id.0].offset + i];
      if self.owner[self.img.index(pt)?] != id.0 {
        return Err(FlstError::Corrupt(format!(
          "private pixel ({}, {}) of shape {id} is owned by another shape",
          pt.x, pt.y
        )));
      }
      let edgel = |dir| Edgel { pt, dir };

      let east = self.add_neighbor(id, edgel(Dir::East), &mut seeds)?;
      let north = self.add_neighbor(id, edgel(Dir::North), &mut seeds)?;
      let west = self.add_neighbor(id, edgel(Dir::West), &mut seeds)?;
      let south = self.add_neighbor(id, edgel(Dir::South), &mut seeds)?;

      if north && east {
        self.add_neighbor(id, edgel(Dir::NorthEast), &mut seeds)?;
      }
      if north && west {
        self.add_neighbor(id, edgel(Dir::NorthWest), &mut seeds)?;
      }
      if south && west {
        self.add_neighbor(id, edgel(Dir::SouthWest), &mut seeds)?;
      }
      if south && east {
        self.add_neighbor(id, edgel(Dir::SouthEast), &mut seeds)?;
      }
      i += 1;
    }
    Ok(seeds)
  }

  /// Look at the exterior pixel of `e`. At the level of the shape it joins the
  /// private area. Otherwise it starts a child, whose boundary is followed
  /// right away. Returns whether the diagonal neighbours next to this edge
  /// must be examined as well.
  fn add_neighbor(
    &mut self,
    id: ShapeId,
    mut e: Edgel,
    seeds: &mut Vec<Edgel>,
  ) -> Result<bool, FlstError> {
    if !e.inverse(self.img) {
      self.shapes[id.0].touches_border = true;
      return Ok(false);
    }
    let i = self.img.index(e.pt)?;
    let level = self.shapes[id.0].level;
    let v = self.img.gray[i];
    if self.owner[i] == UNCLAIMED {
      if v == level {
        self.claim(id, e.pt)?;
      } else {
        seeds.push(e);
        self.find_child(id, e)?;
      }
    }
    //diagonal neighbours are only looked at between two darker cardinal ones
    Ok(v < level)
  }

  /// Follow the boundary of a child of `id` from `seed`. Exterior pixels at
  /// the level of `id` are added to its private area, interior pixels are
  /// marked as owned by `id` so that the child is not found twice.
  fn find_child(&mut self, id: ShapeId, seed: Edgel) -> Result<(), FlstError> {
    let img = self.img;
    let level = self.shapes[id.0].level;
    let kind = if img.gray[img.index(seed.pt)?] < level { ShapeKind::Lower } else { ShapeKind::Upper };

    let mut cur = seed;
    let mut steps = 0;
    loop {
      let i = img.index(cur.pt)?;
      if self.owner[i] != UNCLAIMED && self.owner[i] != id.0 {
        return Err(FlstError::Corrupt(format!(
          "pixel ({}, {}) inside a child of shape {id} is owned by shape #{}",
          cur.pt.x, cur.pt.y, self.owner[i]
        )));
      }
      self.owner[i] = id.0;
      if let Some(ext) = cur.exterior(img) {
        let k = img.index(ext)?;
        if self.owner[k] == UNCLAIMED && img.gray[k] == level {
          self.claim(id, ext)?;
        }
      }

      cur.next(img, kind, level);
      steps += 1;
      if cur == seed {
        break;
      }
      if steps > self.max_steps {
        return Err(FlstError::Corrupt(format!("boundary of a child of {id} does not close")));
      }
    }
    Ok(())
  }
}
