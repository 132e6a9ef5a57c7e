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

//! Projection of an image onto the level lines of another one.
//!
//! The projection of `u1` onto the level lines of `u0` is the image closest
//! (in the least squares sense) to `u1` that has the same tree of shapes as
//! `u0`: every upper shape of `u0` stays at least as bright as its parent and
//! every lower shape at most as bright. It is computed by mirroring the tree
//! of shapes of `u0` into a [`RegressionTree`] and solving the isotonic
//! regression on it.

use ndarray as nd;

#[cfg(feature = "plots")]
use plotters::prelude::*;

use crate::isotonic::{RegressionTree, Sign};
use crate::shape::{ShapeId, ShapeKind};
use crate::tree::ShapeTree;
use crate::FlstError;

#[derive(Debug, Clone)]
/// Builder for configuring a level line projection.
///
/// Enabling the `plots` feature gate adds two new methods to the
/// `ProjectionBuilder` struct: `set_plot_colour_map` and `set_plot_folder`. If
/// no output folder is specified, no plots will be generated.
pub struct ProjectionBuilder {
  //Plotting options
  #[cfg(feature = "plots")]
  plot_path: Option<std::path::PathBuf>,
  #[cfg(feature = "plots")]
  plot_colour_map:
    fn(count: f64, min: f64, max: f64) -> Result<RGBColor, Box<dyn std::error::Error>>,

  //Basic options
  min_area: usize,
  contours: bool,
}

impl Default for ProjectionBuilder {
  fn default() -> Self {
    ProjectionBuilder {
      #[cfg(feature = "plots")]
      plot_path: None,
      #[cfg(feature = "plots")]
      plot_colour_map: crate::plotting::grey_scale,
      min_area: 1,
      contours: false,
    }
  }
}

impl ProjectionBuilder {
  /// creates a new `ProjectionBuilder` that keeps every shape
  pub fn new() -> Self {
    Self::default()
  }

  /// Shapes of `u0` with fewer than `min_area` pixels are ignored before the
  /// regression runs, so that their pixels follow their parent. The default
  /// of 1 keeps every shape; 0 is rejected by [`ProjectionBuilder::build`].
  pub fn set_min_area(mut self, min_area: usize) -> Self {
    self.min_area = min_area;
    self
  }

  /// Record level lines while extracting the tree of `u0` (off by default).
  /// The projection itself never needs them, and on deeply nested images they
  /// take memory quadratic in the image size.
  pub fn set_contours(mut self, contours: bool) -> Self {
    self.contours = contours;
    self
  }

  #[cfg(feature = "plots")]
  /// Set a custom colour map to be used by `plotters` when generating images
  /// of the projection.
  pub fn set_plot_colour_map(
    mut self,
    colour_map: fn(count: f64, min: f64, max: f64) -> Result<RGBColor, Box<dyn std::error::Error>>,
  ) -> Self {
    self.plot_colour_map = colour_map;
    self
  }

  #[cfg(feature = "plots")]
  /// Set output folder for the reference, data and projection images.
  pub fn set_plot_folder(mut self, path: &std::path::Path) -> Self {
    self.plot_path = Some(path.to_path_buf());
    self
  }

  /// Build a `LevelLineProjection` from the current builder configuration.
  pub fn build(self) -> Result<LevelLineProjection, FlstError> {
    if self.min_area == 0 {
      return Err(FlstError::Config("minimum shape area must be at least 1".to_string()));
    }
    #[cfg(feature = "plots")]
    if let Some(ref path) = self.plot_path {
      if !path.is_dir() {
        return Err(FlstError::Config(format!("plot folder {path:?} is not a directory")));
      }
    }
    Ok(LevelLineProjection {
      #[cfg(feature = "plots")]
      plot_path: self.plot_path,
      #[cfg(feature = "plots")]
      plot_colour_map: self.plot_colour_map,
      min_area: self.min_area,
      contours: self.contours,
    })
  }
}

/// Configured level line projection, see [`ProjectionBuilder`].
#[derive(Debug, Clone)]
pub struct LevelLineProjection {
  #[cfg(feature = "plots")]
  plot_path: Option<std::path::PathBuf>,
  #[cfg(feature = "plots")]
  plot_colour_map:
    fn(count: f64, min: f64, max: f64) -> Result<RGBColor, Box<dyn std::error::Error>>,
  min_area: usize,
  contours: bool,
}

impl LevelLineProjection {
  /// Project `u1` onto the level lines of `u0`. Both images are indexed as
  /// `img[[y, x]]` and must have the same dimensions.
  ///
  /// Projecting `u0` onto itself gives back `u0` up to rounding: every level
  /// is recomputed as a quotient of accumulated sums, which is exact for
  /// integer gray levels but may be off by an ulp otherwise.
  pub fn project(
    &self,
    u0: nd::ArrayView2<f64>,
    u1: nd::ArrayView2<f64>,
  ) -> Result<nd::Array2<f64>, FlstError> {
    #[cfg(feature = "debug")]
    let start = std::time::Instant::now();

    //(1) Cheap checks before the expensive tree extraction
    if u0.dim() != u1.dim() {
      let (h0, w0) = u0.dim();
      let (h1, w1) = u1.dim();
      return Err(FlstError::ShapeMismatch { expected: (w0, h0), actual: (w1, h1) });
    }

    //(2) Tree of shapes of the reference image
    let mut tree = ShapeTree::builder().set_contours(self.contours).build(u0)?;

    #[cfg(feature = "debug")]
    let perf = crate::performance_monitoring::PerfReport {
      tree_ms: start.elapsed().as_millis() as usize,
      ..Default::default()
    };

    #[cfg(feature = "debug")]
    let output = self.run(&mut tree, u1, perf, start);
    #[cfg(not(feature = "debug"))]
    let output = self.run(&mut tree, u1);
    output
  }

  /// Project `u1` onto the level lines of an existing tree. The regression
  /// values are written back as the levels of the tree's shapes; shapes below
  /// the minimum area are ignored in `tree` as well.
  pub fn project_tree(
    &self,
    tree: &mut ShapeTree,
    u1: nd::ArrayView2<f64>,
  ) -> Result<nd::Array2<f64>, FlstError> {
    #[cfg(feature = "debug")]
    let output = self.run(tree, u1, Default::default(), std::time::Instant::now());
    #[cfg(not(feature = "debug"))]
    let output = self.run(tree, u1);
    output
  }

  fn run(
    &self,
    tree: &mut ShapeTree,
    u1: nd::ArrayView2<f64>,
    #[cfg(feature = "debug")] mut perf: crate::performance_monitoring::PerfReport,
    #[cfg(feature = "debug")] start: std::time::Instant,
  ) -> Result<nd::Array2<f64>, FlstError> {
    let (height, width) = u1.dim();
    if (width, height) != (tree.width(), tree.height()) {
      return Err(FlstError::ShapeMismatch {
        expected: (tree.width(), tree.height()),
        actual: (width, height),
      });
    }

    #[cfg(feature = "plots")]
    let reference = self.plot_path.as_ref().map(|_| tree.reconstruct());

    //(1) Grain filter
    if self.min_area > 1 {
      tree.filter_area(self.min_area);
    }

    //(2) Mirror the tree and solve
    #[cfg(feature = "debug")]
    let dp_start = std::time::Instant::now();
    let (mut regression, ids) = regression_tree(tree, u1)?;
    regression.solve();
    #[cfg(feature = "debug")]
    {
      perf.dp_ms = dp_start.elapsed().as_millis() as usize;
      perf.shapes = tree.len();
      perf.nodes = regression.len();
    }

    //(3) Write the result back and paint it
    for (k, &id) in ids.iter().enumerate() {
      tree.set_level(id, regression.node(k).value());
    }
    let output = tree.reconstruct();
    log::debug!(
      "projected {}x{} image onto {} shapes, score {:.3e}",
      width,
      height,
      regression.len(),
      regression.score()
    );

    #[cfg(feature = "plots")]
    if let (Some(path), Some(reference)) = (self.plot_path.as_ref(), reference) {
      for (name, img) in
        [("reference.png", reference.view()), ("data.png", u1), ("projection.png", output.view())]
      {
        if let Err(err) = crate::plotting::plot_slice(img, &path.join(name), self.plot_colour_map)
        {
          log::warn!("Could not make {name}. Error: {err}")
        }
      }
    }

    #[cfg(feature = "debug")]
    {
      perf.total_ms = start.elapsed().as_millis() as usize;
      println!("{perf}");
    }

    Ok(output)
  }
}

/// Mirror the unignored shapes of `tree` into a regression tree with `u1` as
/// data. Node `k` of the regression tree corresponds to shape `ids[k]`; the
/// nodes are numbered in pre-order, so node 0 is the root.
///
/// Each node gets the mean of `u1` over the pixels for which it is the
/// smallest enclosing shape as target and the number of those pixels as
/// weight. Lower shapes may not exceed their parent, upper shapes may not go
/// below it.
pub fn regression_tree(
  tree: &ShapeTree,
  u1: nd::ArrayView2<f64>,
) -> Result<(RegressionTree, Vec<ShapeId>), FlstError> {
  let (height, width) = u1.dim();
  if (width, height) != (tree.width(), tree.height()) {
    return Err(FlstError::ShapeMismatch {
      expected: (tree.width(), tree.height()),
      actual: (width, height),
    });
  }

  //(1) Number the shapes
  let ids: Vec<ShapeId> = tree.pre_order(tree.root()).collect();
  let mut node_of: Vec<Option<usize>> = vec![None; tree.len()];
  for (k, id) in ids.iter().enumerate() {
    node_of[id.index()] = Some(k);
  }

  //(2) Topology and constraints
  let mut parents = Vec::with_capacity(ids.len());
  let mut signs = Vec::with_capacity(ids.len());
  for &id in &ids {
    match tree.find_parent(id) {
      None => {
        parents.push(None);
        signs.push(Sign::Free);
      }
      Some(p) => {
        let node = node_of[p.index()]
          .ok_or_else(|| FlstError::Corrupt(format!("parent {p} of {id} is not in the tree")))?;
        parents.push(Some(node));
        signs.push(match tree.shape(id).kind() {
          ShapeKind::Lower => Sign::Negative,
          ShapeKind::Upper => Sign::Positive,
        });
      }
    }
  }

  //(3) Data term: mean of u1 over the exclusive pixels of each shape
  let mut sums = vec![0.0f64; ids.len()];
  let mut counts = vec![0usize; ids.len()];
  for ((y, x), &v) in u1.indexed_iter() {
    let index = y * width + x;
    if !v.is_finite() {
      return Err(FlstError::NonFinite { index });
    }
    let node = tree
      .smallest_shape_at(index)
      .and_then(|s| node_of[s.index()])
      .ok_or_else(|| FlstError::Corrupt(format!("pixel {index} has no enclosing shape")))?;
    sums[node] += v;
    counts[node] += 1;
  }
  let weights: Vec<f64> = counts.iter().map(|&n| n as f64).collect();
  let targets: Vec<f64> = sums
    .iter()
    .zip(&counts)
    .map(|(&sum, &n)| if n == 0 { 0.0 } else { sum / n as f64 })
    .collect();

  let regression = RegressionTree::new(&parents, &signs, &weights, &targets)?;
  Ok((regression, ids))
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn zero_min_area_is_rejected() {
    assert!(matches!(ProjectionBuilder::new().set_min_area(0).build(), Err(FlstError::Config(_))));
  }

  #[test]
  fn dimensions_must_agree() {
    let u0 = nd::Array2::<f64>::zeros((3, 4));
    let u1 = nd::Array2::<f64>::zeros((4, 3));
    let err = ProjectionBuilder::new().build().unwrap().project(u0.view(), u1.view()).unwrap_err();
    assert_eq!(err, FlstError::ShapeMismatch { expected: (4, 3), actual: (3, 4) });
  }

  #[test]
  fn bright_spot_is_mirrored() {
    let mut u0 = nd::Array2::<f64>::zeros((3, 3));
    u0[[1, 1]] = 5.0;
    let tree = ShapeTree::new(u0.view()).unwrap();
    let u1 = nd::Array2::<f64>::from_elem((3, 3), 2.0);
    let (regression, ids) = regression_tree(&tree, u1.view()).unwrap();
    assert_eq!(regression.len(), 2);
    assert_eq!(ids[0], tree.root());
    assert_eq!(regression.node(0).weight(), 8.0);
    assert_eq!(regression.node(1).weight(), 1.0);
    assert_eq!(regression.node(1).sign(), Sign::Positive);
    assert_eq!(regression.node(1).parent(), Some(0));
  }
}
