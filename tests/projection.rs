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

use ndarray as nd;
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rustronomy_flst::prelude::*;

//This constant determines the randomly generated images' sizes (rows, cols)
const RF_SIZE: (usize, usize) = (48, 32);

fn reference() -> nd::Array2<f64> {
  nd::Array2::<u8>::random(RF_SIZE, Uniform::new(0, 6)).mapv(f64::from)
}

fn data() -> nd::Array2<f64> {
  nd::Array2::<f64>::random(RF_SIZE, Uniform::new(-10.0, 10.0))
}

fn distance(a: &nd::Array2<f64>, b: &nd::Array2<f64>) -> f64 {
  a.iter().zip(b).map(|(a, b)| (a - b).powi(2)).sum()
}

#[test]
fn self_projection_is_identity() {
  let u0 = reference();
  let projection = ProjectionBuilder::new().build().unwrap();
  let out = projection.project(u0.view(), u0.view()).unwrap();
  assert_eq!(out, u0);
}

#[test]
fn self_projection_of_continuous_data() {
  //levels are recomputed from sums, so only rounding errors are allowed
  let u0 = nd::Array2::<f64>::random(RF_SIZE, Uniform::new(0.0, 1.0));
  let projection = ProjectionBuilder::new().build().unwrap();
  let out = projection.project(u0.view(), u0.view()).unwrap();
  for (got, want) in out.iter().zip(&u0) {
    assert!((got - want).abs() < 1e-12, "{got} != {want}");
  }
}

#[test]
fn projection_respects_the_level_lines() {
  let u0 = reference();
  let u1 = data();
  let mut tree = ShapeTree::new(u0.view()).unwrap();
  let projection = ProjectionBuilder::new().build().unwrap();
  let out = projection.project_tree(&mut tree, u1.view()).unwrap();

  //the levels were written back into the tree
  assert_eq!(tree.reconstruct(), out);
  for id in tree.pre_order(tree.root()).skip(1) {
    let parent = tree.find_parent(id).unwrap();
    let (lvl, parent_lvl) = (tree.shape(id).level(), tree.shape(parent).level());
    match tree.shape(id).kind() {
      ShapeKind::Upper => assert!(lvl >= parent_lvl, "{id} is below its parent"),
      ShapeKind::Lower => assert!(lvl <= parent_lvl, "{id} is above its parent"),
    }
  }

  //u0 itself has the right level lines, so the projection is at least as close
  assert!(distance(&out, &u1) <= distance(&u0, &u1) + 1e-6);
  //and so does any constant image
  let mean = u1.mean().unwrap();
  assert!(distance(&out, &u1) <= distance(&nd::Array2::from_elem(RF_SIZE, mean), &u1) + 1e-6);
}

#[test]
fn projection_is_the_same_through_both_entry_points() {
  let u0 = reference();
  let u1 = data();
  let projection = ProjectionBuilder::new().set_contours(false).build().unwrap();
  let direct = projection.project(u0.view(), u1.view()).unwrap();
  let mut tree = ShapeTree::new(u0.view()).unwrap();
  let via_tree = projection.project_tree(&mut tree, u1.view()).unwrap();
  assert_eq!(direct, via_tree);
}

#[test]
fn constant_reference_gives_the_mean() {
  let u0 = nd::Array2::<f64>::from_elem(RF_SIZE, 1.0);
  let u1 = data();
  let out = ProjectionBuilder::new().build().unwrap().project(u0.view(), u1.view()).unwrap();
  let mean = u1.mean().unwrap();
  assert!(out.iter().all(|&v| (v - mean).abs() < 1e-9));
}

#[test]
fn grain_filter_removes_small_shapes() {
  let u0 = reference();
  let u1 = data();
  //no shape but the root covers the whole image
  let total = RF_SIZE.0 * RF_SIZE.1;
  let projection = ProjectionBuilder::new().set_min_area(total).build().unwrap();
  let mut tree = ShapeTree::new(u0.view()).unwrap();
  let out = projection.project_tree(&mut tree, u1.view()).unwrap();
  assert_eq!(tree.pre_order(tree.root()).count(), 1);
  let mean = u1.mean().unwrap();
  assert!(out.iter().all(|&v| (v - mean).abs() < 1e-9));
}

#[test]
fn bad_data_is_rejected() {
  let u0 = reference();
  let projection = ProjectionBuilder::new().build().unwrap();

  let small = nd::Array2::<f64>::zeros((RF_SIZE.0, RF_SIZE.1 - 1));
  assert_eq!(
    projection.project(u0.view(), small.view()).unwrap_err(),
    FlstError::ShapeMismatch {
      expected: (RF_SIZE.1, RF_SIZE.0),
      actual: (RF_SIZE.1 - 1, RF_SIZE.0)
    }
  );

  let mut u1 = data();
  u1[[0, 3]] = f64::INFINITY;
  assert_eq!(
    projection.project(u0.view(), u1.view()).unwrap_err(),
    FlstError::NonFinite { index: 3 }
  );
}

#[cfg(feature = "plots")]
#[test]
fn plots_are_written() {
  let folder = std::env::temp_dir().join("rustronomy_flst_plots");
  std::fs::create_dir_all(&folder).unwrap();
  let projection = ProjectionBuilder::new()
    .set_plot_folder(&folder)
    .set_plot_colour_map(color_maps::grey_scale)
    .build()
    .unwrap();
  projection.project(reference().view(), data().view()).unwrap();
  for name in ["reference.png", "data.png", "projection.png"] {
    assert!(folder.join(name).exists());
  }
}
