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

//! Oriented unit edges between pixels ("edgels") and the state machine that
//! walks them around a single level line.

use ndarray as nd;

use crate::shape::ShapeKind;
use crate::FlstError;

/// Integer pixel coordinate. `x` is the column, `y` the row (growing downwards).
///
/// Contour points use the same type but denote lattice vertices, i.e. pixel
/// corners, so they range over `0..=width` and `0..=height`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
  pub x: i32,
  pub y: i32,
}

impl Point {
  pub const fn new(x: i32, y: i32) -> Self {
    Point { x, y }
  }

  #[inline(always)]
  fn shifted(self, (dx, dy): (i32, i32)) -> Self {
    Point { x: self.x + dx, y: self.y + dy }
  }
}

/// Neighbourhood used to decide whether two pixels touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Four,
  Eight,
}

////////////////////////////////////////////////////////////////////////////////
//                                  RASTER                                    //
////////////////////////////////////////////////////////////////////////////////

/// Row-major, finite copy of the input image. Every trace reads from this.
#[derive(Debug, Clone)]
pub(crate) struct Raster {
  pub(crate) width: usize,
  pub(crate) height: usize,
  pub(crate) gray: Vec<f64>,
}

impl Raster {
  pub(crate) fn from_view(img: nd::ArrayView2<f64>) -> Result<Self, FlstError> {
    let (height, width) = img.dim();
    if width == 0 || height == 0 {
      return Err(FlstError::EmptyImage);
    }
    //ndarray iterates in logical (row-major) order, whatever the memory layout
    let gray: Vec<f64> = img.iter().copied().collect();
    if let Some(index) = gray.iter().position(|v| !v.is_finite()) {
      return Err(FlstError::NonFinite { index });
    }
    Ok(Raster { width, height, gray })
  }

  #[inline(always)]
  pub(crate) fn len(&self) -> usize {
    self.gray.len()
  }

  #[inline(always)]
  pub(crate) fn contains(&self, pt: Point) -> bool {
    pt.x >= 0 && pt.y >= 0 && (pt.x as usize) < self.width && (pt.y as usize) < self.height
  }

  /// Linear index of an in-image point
  #[inline(always)]
  pub(crate) fn index(&self, pt: Point) -> Result<usize, FlstError> {
    if self.contains(pt) {
      Ok(pt.y as usize * self.width + pt.x as usize)
    } else {
      Err(FlstError::Corrupt(format!("boundary trace left the image at ({}, {})", pt.x, pt.y)))
    }
  }

  /// Gray value of a point that is known to lie inside the image
  #[inline(always)]
  fn at(&self, pt: Point) -> f64 {
    self.gray[pt.y as usize * self.width + pt.x as usize]
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                DIRECTIONS                                  //
////////////////////////////////////////////////////////////////////////////////

/// Direction of an edgel. The four cardinal directions are used while walking
/// along a level line. The diagonal ones only exist halfway through a turn,
/// they are resolved back to a cardinal direction on the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dir {
  East,
  North,
  West,
  South,
  NorthEast,
  NorthWest,
  SouthWest,
  SouthEast,
}

impl Dir {
  #[inline(always)]
  pub(crate) fn is_diagonal(self) -> bool {
    matches!(self, Dir::NorthEast | Dir::NorthWest | Dir::SouthWest | Dir::SouthEast)
  }

  fn opposite(self) -> Self {
    match self {
      Dir::East => Dir::West,
      Dir::North => Dir::South,
      Dir::West => Dir::East,
      Dir::South => Dir::North,
      Dir::NorthEast => Dir::SouthWest,
      Dir::NorthWest => Dir::SouthEast,
      Dir::SouthWest => Dir::NorthEast,
      Dir::SouthEast => Dir::NorthWest,
    }
  }

  /// Offset from the interior pixel to the exterior one
  fn exterior_offset(self) -> (i32, i32) {
    match self {
      Dir::East => (0, 1),
      Dir::North => (1, 0),
      Dir::West => (0, -1),
      Dir::South => (-1, 0),
      Dir::NorthEast => (1, 1),
      Dir::NorthWest => (1, -1),
      Dir::SouthWest => (-1, -1),
      Dir::SouthEast => (-1, 1),
    }
  }

  /// Offset of one step straight ahead. Only meaningful for cardinal directions.
  fn step(self) -> (i32, i32) {
    match self {
      Dir::East => (1, 0),
      Dir::North => (0, -1),
      Dir::West => (-1, 0),
      Dir::South => (0, 1),
      _ => (0, 0),
    }
  }

  /// Cardinal direction a pivot state was started from (for right pivots
  /// under 4-connectivity: the direction it ends in)
  fn base(self) -> Self {
    match self {
      Dir::NorthEast => Dir::East,
      Dir::NorthWest => Dir::North,
      Dir::SouthWest => Dir::West,
      Dir::SouthEast => Dir::South,
      cardinal => cardinal,
    }
  }

  fn rotate_left(self) -> Self {
    match self {
      Dir::East => Dir::North,
      Dir::North => Dir::West,
      Dir::West => Dir::South,
      Dir::South => Dir::East,
      diagonal => diagonal,
    }
  }

  fn rotate_right(self) -> Self {
    match self {
      Dir::East => Dir::South,
      Dir::North => Dir::East,
      Dir::West => Dir::North,
      Dir::South => Dir::West,
      diagonal => diagonal,
    }
  }

  fn turn_left(self, connect: Connectivity) -> Self {
    match connect {
      Connectivity::Four => self.rotate_left(),
      Connectivity::Eight => match self {
        Dir::East => Dir::NorthEast,
        Dir::North => Dir::NorthWest,
        Dir::West => Dir::SouthWest,
        Dir::South => Dir::SouthEast,
        diagonal => diagonal,
      },
    }
  }

  fn turn_right(self, connect: Connectivity) -> Self {
    match connect {
      Connectivity::Eight => self.rotate_right(),
      Connectivity::Four => match self {
        Dir::East => Dir::SouthEast,
        Dir::North => Dir::NorthEast,
        Dir::West => Dir::NorthWest,
        Dir::South => Dir::SouthWest,
        diagonal => diagonal,
      },
    }
  }
}

////////////////////////////////////////////////////////////////////////////////
//                                  EDGELS                                    //
////////////////////////////////////////////////////////////////////////////////

/// Boundary cursor: the interior pixel `pt` lies on the left of `dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Edgel {
  pub(crate) pt: Point,
  pub(crate) dir: Dir,
}

impl Edgel {
  pub(crate) const fn new(x: i32, y: i32, dir: Dir) -> Self {
    Edgel { pt: Point::new(x, y), dir }
  }

  /// Exterior pixel of the edgel, `None` for an edgel on the image border
  pub(crate) fn exterior(&self, img: &Raster) -> Option<Point> {
    let ext = self.pt.shifted(self.dir.exterior_offset());
    img.contains(ext).then_some(ext)
  }

  /// Swap to the same edge seen from the exterior pixel. Fails (and leaves the
  /// edgel untouched) on the image border.
  pub(crate) fn inverse(&mut self, img: &Raster) -> bool {
    match self.exterior(img) {
      Some(ext) => {
        self.pt = ext;
        self.dir = self.dir.opposite();
        true
      }
      None => false,
    }
  }

  /// Lattice vertex at which a cardinal edgel starts
  pub(crate) fn origin(&self) -> Point {
    debug_assert!(!self.dir.is_diagonal(), "origin of a pivoting edgel");
    let mut p = self.pt;
    if matches!(self.dir, Dir::East | Dir::North) {
      p.y += 1;
    }
    if matches!(self.dir, Dir::North | Dir::West) {
      p.x += 1;
    }
    p
  }

  /// Advance to the next edgel along the level line of `kind` at `level`.
  pub(crate) fn next(&mut self, img: &Raster, kind: ShapeKind, level: f64) {
    let connect = kind.connectivity();

    //(1) finish a pending turn
    if self.dir.is_diagonal() {
      let base = self.dir.base();
      self.dir = match connect {
        Connectivity::Four => {
          self.pt = self.pt.shifted(base.step());
          base
        }
        Connectivity::Eight => base.rotate_left(),
      };
      return;
    }

    /*(2) look at the pixel straight ahead ("left") and the one diagonally
      ahead ("right"), the latter being the exterior pixel of the left edgel.
    */
    let left = Edgel { pt: self.pt.shifted(self.dir.step()), dir: self.dir };
    let mut right = *self;
    let mut left_in = img.contains(left.pt);
    let mut right_in = false;
    if left_in {
      left_in = kind.holds(img.at(left.pt), level);
      if let Some(ext) = left.exterior(img) {
        right.pt = ext;
        right_in = kind.holds(img.at(ext), level);
      }
    }

    //(3) go straight, pivot left in place or pivot right
    if left_in && !right_in {
      *self = left;
    } else if !left_in && (!right_in || connect == Connectivity::Four) {
      self.dir = self.dir.turn_left(connect);
    } else {
      *self = if connect == Connectivity::Four { left } else { right };
      self.dir = self.dir.turn_right(connect);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn raster(width: usize, height: usize, gray: Vec<f64>) -> Raster {
    Raster { width, height, gray }
  }

  fn trace(img: &Raster, start: Edgel, kind: ShapeKind, level: f64) -> Vec<Point> {
    let mut contour = Vec::new();
    let mut cur = start;
    loop {
      if !cur.dir.is_diagonal() {
        contour.push(cur.origin());
      }
      cur.next(img, kind, level);
      if cur == start {
        break;
      }
      assert!(contour.len() < 64, "trace did not close");
    }
    contour
  }

  #[test]
  fn single_bright_pixel_has_four_corners() {
    let mut gray = vec![0.0; 9];
    gray[4] = 10.0;
    let img = raster(3, 3, gray);
    let contour = trace(&img, Edgel::new(1, 1, Dir::South), ShapeKind::Upper, 0.0);
    assert_eq!(
      contour,
      vec![Point::new(1, 1), Point::new(1, 2), Point::new(2, 2), Point::new(2, 1)]
    );
  }

  #[test]
  fn single_dark_pixel_has_four_corners() {
    let mut gray = vec![5.0; 9];
    gray[4] = 1.0;
    let img = raster(3, 3, gray);
    let contour = trace(&img, Edgel::new(1, 1, Dir::South), ShapeKind::Lower, 5.0);
    assert_eq!(contour.len(), 4);
  }

  #[test]
  fn diagonal_pixels_connect_only_for_upper_sets() {
    //two bright pixels touching at a corner
    let gray = vec![
      9.0, 0.0, 0.0, //
      0.0, 9.0, 0.0, //
      0.0, 0.0, 0.0,
    ];
    let img = raster(3, 3, gray);
    let upper = trace(&img, Edgel::new(1, 1, Dir::South), ShapeKind::Upper, 0.0);
    assert_eq!(upper.len(), 8);

    let dark = vec![
      0.0, 9.0, 9.0, //
      9.0, 0.0, 9.0, //
      9.0, 9.0, 9.0,
    ];
    let img = raster(3, 3, dark);
    let lower = trace(&img, Edgel::new(1, 1, Dir::South), ShapeKind::Lower, 9.0);
    assert_eq!(lower.len(), 4);
  }

  #[test]
  fn inverse_fails_on_border() {
    let img = raster(2, 2, vec![0.0; 4]);
    let mut e = Edgel::new(0, 0, Dir::South);
    assert!(!e.inverse(&img));
    assert_eq!(e, Edgel::new(0, 0, Dir::South));
    let mut e = Edgel::new(0, 0, Dir::North);
    assert!(e.inverse(&img));
    assert_eq!(e, Edgel::new(1, 0, Dir::South));
  }

  #[test]
  fn image_border_trace_closes() {
    //the root trace walks around the whole image
    let img = raster(4, 3, (0..12).map(f64::from).collect());
    let contour = trace(&img, Edgel::new(0, 0, Dir::South), ShapeKind::Upper, f64::NEG_INFINITY);
    assert_eq!(contour.len(), 2 * (4 + 3));
  }
}
