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

#![doc(
  html_logo_url = "https://raw.githubusercontent.com/smups/rustronomy/main/logos/Rustronomy_ferris.png?raw=true"
)]
//! Rustronomy-flst is a pure-rust implementation of the Fast Level Set
//! Transform (Monasse & Guichard, 2000[^1]), which decomposes a grayscale
//! image into its *tree of shapes*, together with a tree-structured isotonic
//! regression that uses this tree.
//!
//! # Features
//! 1. The *tree of shapes* of an image: the connected components of its upper
//! level sets (`u > λ`, 8-connected) and lower level sets (`u < λ`,
//! 4-connected) with their holes filled, nested into a single tree. Every shape
//! knows its level, area, pixels and (optionally) its level line.
//! 2. *Isotonic regression on a tree*: least squares fit of per-node targets
//! under the constraint that every node is above (or below) its parent.
//! 3. The *level line projection*: the image closest to some data `u1` whose
//! level lines are those of a reference image `u0`.
//!
//! In addition, `rustronomy-flst` provides extra functionality which can be
//! accessed via cargo feature gates. A list of all additional features [can be found
//! below](#cargo-feature-gates).
//!
//! # Quickstart
//! To use the latest release of Rustronomy-flst in a cargo project, add
//! the rustronomy-flst crate as a dependency to your `Cargo.toml` file:
//! ```toml
//! [dependencies]
//! rustronomy-flst = "0.1.0"
//! ```
//!
//! ## Short example: projecting noise onto the level lines of a random field
//! `rustronomy-flst` uses the "builder pattern" to configure the projection
//! before executing it.
//! ```rust
//! use rustronomy_flst::prelude::*;
//! use ndarray_rand::{rand_distr::Uniform, RandomExt};
//!
//! //Reference image with integer gray levels and some data to project
//! let u0 = nd::Array2::<u8>::random((64, 64), Uniform::new(0, 8)).mapv(f64::from);
//! let u1 = nd::Array2::<f64>::random((64, 64), Uniform::new(0.0, 8.0));
//! //The tree of shapes on its own
//! let tree = ShapeTree::new(u0.view()).unwrap();
//! assert_eq!(tree.shape(tree.root()).area(), 64 * 64);
//! //Set-up and run the projection
//! let projection = ProjectionBuilder::new().build().unwrap();
//! let output = projection.project(u0.view(), u1.view()).unwrap();
//! ```
//! [^1]: P. Monasse and F. Guichard. **Fast computation of a contrast-invariant image representation.** *IEEE Transactions on Image Processing*, 9(5):860–872, 2000.
//!
//! # Cargo feature gates
//! *By default, all features behind cargo feature gates are **disabled***
//! - `jemalloc`: this feature enables the [jemalloc allocator](https://jemalloc.net).
//! Building a tree of shapes allocates a lot of small contour buffers, which
//! jemalloc handles well. To compile `rustronomy-flst` with the `jemalloc`
//! feature, jemalloc must be installed on the host system.
//! - `plots`: with this feature enabled, the projection writes images of the
//! reference, data and result to a folder. Plotting support adds the `plotters`
//! crate as a dependency, [see the `plotters` documentation for details](https://docs.rs/plotters/).
//! - `progress`: this feature enables a progress bar over the pixels claimed
//! while a tree of shapes is extracted. Enabling this feature adds the
//! `indicatif` crate as a dependency.
//! - `debug`: this feature prints a performance report after every projection.
//! Enabling this feature does not add additional dependencies.
//!
//! Regardless of features, milestones are logged through the `log` facade.

//Set Jemalloc as the global allocator for this crate
#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

mod edgel;
mod error;
mod shape;
mod tree;

pub mod isotonic;
pub mod projection;

pub use edgel::{Connectivity, Point};
pub use error::FlstError;
pub use isotonic::{isotonic_regression_tree, Message, RegressionTree, Sign};
pub use projection::{LevelLineProjection, ProjectionBuilder};
pub use shape::{Order, Shape, ShapeId, ShapeIter, ShapeKind};
pub use tree::{PixelOrder, ShapeTree, TreeBuilder};

//Utility prelude for batch import
pub mod prelude {
  pub use ndarray as nd;
  pub use crate::{
    FlstError, LevelLineProjection, ProjectionBuilder, RegressionTree, ShapeId, ShapeKind,
    ShapeTree, Sign,
  };
  #[cfg(feature = "plots")]
  pub mod color_maps {
    pub use crate::plotting::grey_scale;
  }
}

////////////////////////////////////////////////////////////////////////////////
//                              HELPER FUNCTIONS                              //
////////////////////////////////////////////////////////////////////////////////

#[cfg(feature = "progress")]
pub(crate) fn set_up_bar(pixels: u64) -> indicatif::ProgressBar {
  const TEMPLATE: &str = "{spinner}[{elapsed}/{duration}] pixels {pos}/{len}{bar:60}";
  let bar = indicatif::ProgressBar::new(pixels);
  if let Ok(style) = indicatif::ProgressStyle::with_template(TEMPLATE) {
    bar.set_style(style);
  }
  bar
}

////////////////////////////////////////////////////////////////////////////////
//                             OPTIONAL MODULES                               //
////////////////////////////////////////////////////////////////////////////////
#[cfg(feature = "debug")]
mod performance_monitoring {

  #[derive(Clone, Debug, Default)]
  pub struct PerfReport {
    pub tree_ms: usize,
    pub dp_ms: usize,
    pub total_ms: usize,
    pub shapes: usize,
    pub nodes: usize,
  }

  impl std::fmt::Display for PerfReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      writeln!(f, ">---------[Performance Summary]---------")?;
      writeln!(f, ">  Tree of shapes: {}ms ({} shapes)", self.tree_ms, self.shapes)?;
      writeln!(f, ">  Isotonic regression: {}ms ({} nodes)", self.dp_ms, self.nodes)?;
      writeln!(f, ">--------------------------------+ total")?;
      writeln!(
        f,
        ">  {}ms with {}ms overhead (Δt)",
        self.total_ms,
        self.total_ms.saturating_sub(self.tree_ms + self.dp_ms)
      )
    }
  }
}

#[cfg(feature = "plots")]
/// This module contains the code required to generate images from the input
/// and output of a projection.
pub mod plotting {
  use ndarray as nd;
  use num_traits::ToPrimitive;
  use plotters::prelude::*;
  use std::{error::Error, path::Path};

  //Colour for nan px
  const NAN_COL: RGBColor = BLACK;

  /// Save an image indexed as `slice[[y, x]]` as a png, one pixel per element.
  pub fn plot_slice<'a, T>(
    slice: nd::ArrayView2<'a, T>,
    file_name: &Path,
    color_map: fn(count: T, min: T, max: T) -> Result<RGBColor, Box<dyn Error>>,
  ) -> Result<(), Box<dyn Error>>
  where
    T: std::fmt::Display + std::cmp::PartialOrd + ToPrimitive + Copy,
  {
    //Get min and max vals of slice
    let first = *slice.iter().next().ok_or("cannot plot an empty slice")?;
    let min = slice.iter().fold(first, |f: T, x: &T| if *x < f { *x } else { f });
    let max = slice.iter().fold(first, |f: T, x: &T| if *x > f { *x } else { f });

    //Get the size of the slice
    let y_size = slice.shape()[0] as u32;
    let x_size = slice.shape()[1] as u32;

    //Make new fig
    let root = BitMapBackend::new(file_name, (x_size, y_size)).into_drawing_area();
    root.fill(&WHITE)?;

    //make empty drawing area in fig
    let mut chart = ChartBuilder::on(&root).build_cartesian_2d(0..x_size, 0..y_size)?;
    chart.configure_mesh().disable_mesh().disable_axes().draw()?;
    let plotting_area = chart.plotting_area();

    //fill pixels
    for ((y, x), px) in slice.indexed_iter() {
      plotting_area.draw_pixel((x as u32, y as u32), &color_map(*px, min, max)?)?
    }

    //save file
    root.present()?;

    #[cfg(feature = "debug")]
    println!("slice saved as png: {file_name:?}; max:{max:2}, min:{min:2}");
    Ok(())
  }

  #[inline(always)]
  pub fn grey_scale<T>(count: T, min: T, max: T) -> Result<RGBColor, Box<dyn Error>>
  where
    T: std::fmt::Display + std::cmp::PartialOrd + ToPrimitive,
  {
    let (count, min, max) = match (count.to_f64(), min.to_f64(), max.to_f64()) {
      (Some(c), Some(lo), Some(hi)) => (c, lo, hi),
      _ => return Err(format!("cannot convert {count} to a grey value").into()),
    };
    if !count.is_finite() {
      //This is a NAN pixel, fill it with the NaN colour
      Ok(NAN_COL)
    } else if max <= min {
      Ok(RGBColor(128, 128, 128))
    } else {
      //Grayscale value
      let gray = (255.0 * (count - min) / (max - min)).clamp(0.0, 255.0) as u8;
      Ok(RGBColor(gray, gray, gray))
    }
  }
}
