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

//! Nodes of the tree of shapes and the navigation primitives that skip over
//! ignored (logically deleted) shapes.

use std::fmt;

use crate::edgel::{Connectivity, Point};
use crate::tree::ShapeTree;

/// Orientation of the level set a shape was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
  /// Connected component of `{u < λ}`, uses 4-connectivity
  Lower,
  /// Connected component of `{u > λ}`, uses 8-connectivity
  Upper,
}

impl ShapeKind {
  /// Lower sets use 4-connectivity and upper sets 8-connectivity, so that
  /// level lines of both kinds never cross.
  #[inline(always)]
  pub fn connectivity(self) -> Connectivity {
    match self {
      ShapeKind::Lower => Connectivity::Four,
      ShapeKind::Upper => Connectivity::Eight,
    }
  }

  /// Strict comparison of `value` against `level`
  #[inline(always)]
  pub fn holds(self, value: f64, level: f64) -> bool {
    match self {
      ShapeKind::Lower => value < level,
      ShapeKind::Upper => value > level,
    }
  }
}

impl fmt::Display for ShapeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ShapeKind::Lower => write!(f, "lower"),
      ShapeKind::Upper => write!(f, "upper"),
    }
  }
}

/// Index of a shape in the arena of its [`ShapeTree`]. The root is always
/// [`ShapeId::ROOT`]. Ids follow the order in which shapes were discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId(pub(crate) usize);

impl ShapeId {
  pub const ROOT: ShapeId = ShapeId(0);

  #[inline(always)]
  pub fn index(self) -> usize {
    self.0
  }
}

impl fmt::Display for ShapeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// A shape: connected component of a level set with its holes filled.
///
/// The pixels of a shape are not stored in the shape itself. A shape only
/// knows the offset of its pixels in the pixel arena of the tree; see
/// [`ShapeTree::pixels`] and [`ShapeTree::private_pixels`].
#[derive(Debug, Clone)]
pub struct Shape {
  pub(crate) kind: ShapeKind,
  pub(crate) level: f64,
  pub(crate) ignored: bool,
  pub(crate) touches_border: bool,
  pub(crate) contour: Vec<Point>,
  pub(crate) offset: usize,
  pub(crate) private_area: usize,
  pub(crate) area: usize,
  pub(crate) parent: Option<ShapeId>,
  pub(crate) child: Option<ShapeId>,
  pub(crate) sibling: Option<ShapeId>,
}

impl Shape {
  pub(crate) fn new(parent: Option<ShapeId>, sibling: Option<ShapeId>, offset: usize) -> Self {
    Shape {
      kind: ShapeKind::Upper,
      level: 0.0,
      ignored: false,
      touches_border: false,
      contour: Vec::new(),
      offset,
      private_area: 0,
      area: 0,
      parent,
      child: None,
      sibling,
    }
  }

  pub fn kind(&self) -> ShapeKind {
    self.kind
  }

  /// Gray level of the shape. Right after extraction this is the extremal
  /// gray value on the inner border of the shape; passes like the level line
  /// projection overwrite it.
  pub fn level(&self) -> f64 {
    self.level
  }

  pub fn is_ignored(&self) -> bool {
    self.ignored
  }

  /// Does the shape meet the border of the image?
  pub fn touches_border(&self) -> bool {
    self.touches_border
  }

  /// Closed level line in trace order, as lattice vertices. Empty when the
  /// tree was built without contours.
  pub fn contour(&self) -> &[Point] {
    &self.contour
  }

  /// Number of pixels of the shape, including those of all its descendants
  pub fn area(&self) -> usize {
    self.area
  }

  /// Number of pixels that belong to this shape but to none of its children
  pub fn private_area(&self) -> usize {
    self.private_area
  }

  /// Parent in the raw tree, ignoring the `ignored` flags
  pub fn raw_parent(&self) -> Option<ShapeId> {
    self.parent
  }

  /// First child in the raw tree, ignoring the `ignored` flags
  pub fn raw_child(&self) -> Option<ShapeId> {
    self.child
  }

  /// Next sibling in the raw tree, ignoring the `ignored` flags
  pub fn raw_sibling(&self) -> Option<ShapeId> {
    self.sibling
  }
}

////////////////////////////////////////////////////////////////////////////////
//                         LAZY DELETION NAVIGATION                           //
////////////////////////////////////////////////////////////////////////////////

impl ShapeTree {
  #[inline(always)]
  fn ignored(&self, id: ShapeId) -> bool {
    self.shapes[id.0].ignored
  }

  /// First unignored shape of the raw subtree rooted at `id`, searching depth
  /// first in child order.
  fn first_kept(&self, id: ShapeId) -> Option<ShapeId> {
    let mut stack = vec![id];
    let mut children = Vec::new();
    while let Some(s) = stack.pop() {
      if !self.ignored(s) {
        return Some(s);
      }
      //push in reverse so that the first child is searched first
      children.clear();
      let mut c = self.shapes[s.0].child;
      while let Some(child) = c {
        children.push(child);
        c = self.shapes[child.0].sibling;
      }
      stack.extend(children.iter().rev());
    }
    None
  }

  /// First unignored shape in `start` or its raw siblings after it
  fn first_kept_from(&self, start: Option<ShapeId>) -> Option<ShapeId> {
    let mut s = start;
    while let Some(id) = s {
      if let Some(hit) = self.first_kept(id) {
        return Some(hit);
      }
      s = self.shapes[id.0].sibling;
    }
    None
  }

  /// True parent of a shape: its nearest unignored ancestor.
  pub fn find_parent(&self, id: ShapeId) -> Option<ShapeId> {
    let mut s = self.shapes[id.0].parent;
    while let Some(p) = s {
      if !self.ignored(p) {
        return Some(p);
      }
      s = self.shapes[p.0].parent;
    }
    None
  }

  /// First true child of a shape.
  pub fn find_child(&self, id: ShapeId) -> Option<ShapeId> {
    self.first_kept_from(self.shapes[id.0].child)
  }

  /// Next true sibling of a shape.
  pub fn find_sibling(&self, id: ShapeId) -> Option<ShapeId> {
    /*Walk up the raw ancestors one at a time. While the raw parent is ignored,
      the siblings of every ignored ancestor are true siblings of `id` too and
      must be searched before climbing further.
    */
    let mut s = id;
    loop {
      if let Some(hit) = self.first_kept_from(self.shapes[s.0].sibling) {
        return Some(hit);
      }
      let parent = self.shapes[s.0].parent?;
      if !self.ignored(parent) {
        //raw parent is also the true parent: we really are the last child
        return None;
      }
      s = parent;
    }
  }

  /// Previous true sibling of a shape.
  pub fn find_prev_sibling(&self, id: ShapeId) -> Option<ShapeId> {
    let parent = self.find_parent(id)?;
    let mut next = self.find_child(parent);
    let mut prev = None;
    while let Some(s) = next {
      if s == id {
        return prev;
      }
      prev = Some(s);
      next = self.find_sibling(s);
    }
    None
  }

  /// Deepest first descendant of a shape
  fn go_bottom(&self, mut id: ShapeId) -> ShapeId {
    while let Some(child) = self.find_child(id) {
      id = child;
    }
    id
  }

  /// Next true sibling of the shape or of its closest ancestor that has one
  fn uncle(&self, mut id: ShapeId) -> Option<ShapeId> {
    loop {
      if let Some(s) = self.find_sibling(id) {
        return Some(s);
      }
      id = self.find_parent(id)?;
    }
  }

  fn advance(&self, order: Order, id: ShapeId) -> Option<ShapeId> {
    match order {
      Order::Pre => self.find_child(id).or_else(|| self.uncle(id)),
      Order::Post => match self.find_sibling(id) {
        Some(s) => Some(self.go_bottom(s)),
        None => self.find_parent(id),
      },
    }
  }

  /// Iterate over the true subtree of `id` in pre-order (parents first).
  /// Iterating from an ignored shape yields nothing.
  pub fn pre_order(&self, id: ShapeId) -> ShapeIter<'_> {
    ShapeIter::new(self, Order::Pre, id)
  }

  /// Iterate over the true subtree of `id` in post-order (children first).
  /// Iterating from an ignored shape yields nothing.
  pub fn post_order(&self, id: ShapeId) -> ShapeIter<'_> {
    ShapeIter::new(self, Order::Post, id)
  }
}

/// Traversal order of a [`ShapeIter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
  Pre,
  Post,
}

/// Walks a subtree of the tree of shapes, skipping ignored shapes.
#[derive(Debug, Clone)]
pub struct ShapeIter<'a> {
  tree: &'a ShapeTree,
  order: Order,
  cur: Option<ShapeId>,
  end: Option<ShapeId>,
}

impl<'a> ShapeIter<'a> {
  fn new(tree: &'a ShapeTree, order: Order, start: ShapeId) -> Self {
    if tree.ignored(start) {
      return ShapeIter { tree, order, cur: Some(start), end: Some(start) };
    }
    let (cur, end) = match order {
      Order::Pre => (start, tree.uncle(start)),
      Order::Post => (tree.go_bottom(start), tree.advance(Order::Post, start)),
    };
    ShapeIter { tree, order, cur: Some(cur), end }
  }
}

impl<'a> Iterator for ShapeIter<'a> {
  type Item = ShapeId;

  fn next(&mut self) -> Option<ShapeId> {
    if self.cur == self.end {
      return None;
    }
    let item = self.cur?;
    self.cur = self.tree.advance(self.order, item);
    Some(item)
  }
}
